//! HTTP surface over the note pipeline.
//!
//! Every route except `/health` resolves the caller's owner from an
//! `Authorization: Bearer <token>` header before the handler runs.

use axum::extract::{Query, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use second_brain_core::{
    build_graph, Assistant, BrainGraph, ChatAnswer, Embedder, Enricher, Generator,
    GraphEdgeStrategy, IngestionService, NewNote, Note, NoteStore, OwnerId, PipelineConfig,
    PipelineError, RankedNote, RetrievalService, SearchRequest, TagCount,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::error;

pub type SharedEmbedder = Arc<dyn Embedder>;
pub type SharedStore = Arc<dyn NoteStore>;
pub type SharedGenerator = Arc<dyn Generator>;

pub type Ingestion = IngestionService<SharedEmbedder, Arc<dyn Enricher>, SharedStore>;
pub type Retrieval = RetrievalService<SharedEmbedder, SharedStore>;
pub type NoteAssistant = Assistant<SharedEmbedder, SharedGenerator, SharedStore>;

/// The capability set a deployment runs with. `generator` is absent in
/// offline mode, which disables chat and rewrite.
pub struct Capabilities {
    pub embedder: SharedEmbedder,
    pub enricher: Arc<dyn Enricher>,
    pub generator: Option<SharedGenerator>,
    pub store: SharedStore,
}

#[derive(Clone)]
pub struct AppState {
    pub ingestion: Arc<Ingestion>,
    pub retrieval: Arc<Retrieval>,
    pub assistant: Option<Arc<NoteAssistant>>,
    tokens: Arc<HashMap<String, OwnerId>>,
}

impl AppState {
    pub fn new(
        capabilities: Capabilities,
        config: PipelineConfig,
        tokens: HashMap<String, OwnerId>,
    ) -> Self {
        let Capabilities {
            embedder,
            enricher,
            generator,
            store,
        } = capabilities;

        let assistant = generator.map(|generator| {
            Arc::new(Assistant::new(
                embedder.clone(),
                generator,
                store.clone(),
                config,
            ))
        });

        Self {
            ingestion: Arc::new(IngestionService::new(
                embedder.clone(),
                enricher,
                store.clone(),
            )),
            retrieval: Arc::new(RetrievalService::new(embedder, store, config)),
            assistant,
            tokens: Arc::new(tokens),
        }
    }

    fn owner_for(&self, token: &str) -> Option<OwnerId> {
        self.tokens.get(token).cloned()
    }

    fn assistant(&self) -> Result<&NoteAssistant, ApiError> {
        self.assistant.as_deref().ok_or_else(|| ApiError {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: "no generation provider is configured".to_string(),
        })
    }
}

/// Parses `owner:token` pairs into a token lookup table.
pub fn parse_api_tokens<I, S>(entries: I) -> Result<HashMap<String, OwnerId>, String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut tokens = HashMap::new();
    for entry in entries {
        let entry = entry.as_ref().trim();
        if entry.is_empty() {
            continue;
        }
        let (owner, token) = entry
            .split_once(':')
            .map(|(owner, token)| (owner.trim(), token.trim()))
            .filter(|(owner, token)| !owner.is_empty() && !token.is_empty())
            .ok_or_else(|| format!("expected owner:token, got `{entry}`"))?;
        tokens.insert(token.to_string(), OwnerId::new(owner));
    }
    Ok(tokens)
}

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/notes", post(create_note).get(list_notes))
        .route("/search", post(search))
        .route("/tags", get(tags))
        .route("/graph", get(graph))
        .route("/chat", post(chat))
        .route("/rewrite", post(rewrite))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_owner));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn require_owner(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let owner = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .and_then(|token| state.owner_for(token));

    match owner {
        Some(owner) => {
            request.extensions_mut().insert(owner);
            next.run(request).await
        }
        None => ApiError::from(PipelineError::Unauthorized).into_response(),
    }
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let status = match &err {
            PipelineError::Validation(_) => StatusCode::BAD_REQUEST,
            PipelineError::Unauthorized => StatusCode::UNAUTHORIZED,
            PipelineError::Capability(_) | PipelineError::Store(_) => {
                error!(error = %err, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let message = match err {
            PipelineError::Validation(message) => message,
            other => other.to_string(),
        };
        Self { status, message }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn create_note(
    State(state): State<AppState>,
    Extension(owner): Extension<OwnerId>,
    Json(input): Json<NewNote>,
) -> Result<(StatusCode, Json<Note>), ApiError> {
    let note = state.ingestion.ingest(&owner, input).await?;
    Ok((StatusCode::CREATED, Json(note)))
}

async fn list_notes(
    State(state): State<AppState>,
    Extension(owner): Extension<OwnerId>,
) -> Result<Json<Vec<Note>>, ApiError> {
    Ok(Json(state.retrieval.list_notes(&owner).await?))
}

async fn search(
    State(state): State<AppState>,
    Extension(owner): Extension<OwnerId>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<Vec<RankedNote>>, ApiError> {
    Ok(Json(state.retrieval.retrieve(&owner, &request).await?))
}

#[derive(Debug, Deserialize)]
pub struct TagsParams {
    pub min_count: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TagsResponse {
    pub tags: Vec<TagCount>,
}

async fn tags(
    State(state): State<AppState>,
    Extension(owner): Extension<OwnerId>,
    Query(params): Query<TagsParams>,
) -> Result<Json<TagsResponse>, ApiError> {
    let tags = state
        .retrieval
        .tag_vocabulary(&owner, params.min_count.unwrap_or(1))
        .await?;
    Ok(Json(TagsResponse { tags }))
}

#[derive(Debug, Deserialize)]
pub struct GraphParams {
    pub strategy: Option<String>,
    pub threshold: Option<f32>,
}

/// Maps the `strategy` query parameter onto an edge strategy. Similarity is
/// the default; `threshold` only applies to it.
pub fn graph_strategy(
    strategy: Option<&str>,
    threshold: Option<f32>,
    default_threshold: f32,
) -> Result<GraphEdgeStrategy, PipelineError> {
    match strategy.map(str::trim).unwrap_or("similarity") {
        "similarity" | "embedding" => Ok(GraphEdgeStrategy::EmbeddingSimilarity {
            threshold: threshold.unwrap_or(default_threshold),
        }),
        "tags" | "tag_overlap" => Ok(GraphEdgeStrategy::TagOverlap),
        other => Err(PipelineError::Validation(format!(
            "unknown graph strategy `{other}`"
        ))),
    }
}

async fn graph(
    State(state): State<AppState>,
    Extension(owner): Extension<OwnerId>,
    Query(params): Query<GraphParams>,
) -> Result<Json<BrainGraph>, ApiError> {
    let strategy = graph_strategy(
        params.strategy.as_deref(),
        params.threshold,
        state.retrieval.config().edge_threshold,
    )?;
    let notes = state.retrieval.list_notes(&owner).await?;
    Ok(Json(build_graph(&notes, strategy)))
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
}

async fn chat(
    State(state): State<AppState>,
    Extension(owner): Extension<OwnerId>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatAnswer>, ApiError> {
    if request.message.trim().is_empty() {
        return Err(PipelineError::Validation("message is required".to_string()).into());
    }
    let answer = state.assistant()?.chat(&owner, &request.message).await?;
    Ok(Json(answer))
}

#[derive(Debug, Deserialize)]
pub struct RewriteRequest {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RewriteResponse {
    pub answer: String,
}

async fn rewrite(
    State(state): State<AppState>,
    Extension(_owner): Extension<OwnerId>,
    Json(request): Json<RewriteRequest>,
) -> Result<Json<RewriteResponse>, ApiError> {
    let answer = state.assistant()?.rewrite(&request.text).await?;
    Ok(Json(RewriteResponse { answer }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use second_brain_core::{
        CapabilityError, CharacterNgramEmbedder, InMemoryNoteStore, LocalEnricher,
    };
    use serde::de::DeserializeOwned;
    use tower::ServiceExt;

    const ALICE: &str = "alice-token";
    const BOB: &str = "bob-token";

    struct EchoGenerator;

    #[async_trait]
    impl Generator for EchoGenerator {
        async fn generate(&self, _prompt: &str) -> Result<String, CapabilityError> {
            Ok("Clearer text.".to_string())
        }
    }

    fn state(with_generator: bool) -> AppState {
        let generator: Option<SharedGenerator> = if with_generator {
            Some(Arc::new(EchoGenerator))
        } else {
            None
        };
        let tokens = parse_api_tokens([format!("alice:{ALICE}"), format!("bob:{BOB}")]).unwrap();
        AppState::new(
            Capabilities {
                embedder: Arc::new(CharacterNgramEmbedder::default()),
                enricher: Arc::new(LocalEnricher),
                generator,
                store: Arc::new(InMemoryNoteStore::new()),
            },
            PipelineConfig::default(),
            tokens,
        )
    }

    fn get(uri: &str, token: &str) -> Request<Body> {
        Request::get(uri)
            .header("authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap()
    }

    fn post_json(uri: &str, token: &str, json: &str) -> Request<Body> {
        Request::post(uri)
            .header("authorization", format!("Bearer {token}"))
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap()
    }

    async fn body<T: DeserializeOwned>(response: Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_public() {
        let response = router(state(false))
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let health: HealthResponse = body(response).await;
        assert_eq!(health.status, "ok");
    }

    #[tokio::test]
    async fn missing_or_unknown_token_is_rejected() {
        let app = router(state(false));
        let response = app
            .clone()
            .oneshot(Request::get("/notes").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let error: ErrorBody = body(response).await;
        assert!(!error.error.is_empty());

        let response = app.oneshot(get("/notes", "forged")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn created_notes_are_scoped_to_their_owner() {
        let app = router(state(false));
        let response = app
            .clone()
            .oneshot(post_json(
                "/notes",
                ALICE,
                r#"{"content":"Went for a run in the rain","type":"note"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created: Note = body(response).await;
        assert_eq!(created.owner, OwnerId::new("alice"));

        let alice: Vec<Note> = body(app.clone().oneshot(get("/notes", ALICE)).await.unwrap()).await;
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].id, created.id);

        let bob: Vec<Note> = body(app.oneshot(get("/notes", BOB)).await.unwrap()).await;
        assert!(bob.is_empty());
    }

    #[tokio::test]
    async fn empty_capture_is_a_bad_request() {
        let response = router(state(false))
            .oneshot(post_json("/notes", ALICE, r#"{"content":"   "}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let error: ErrorBody = body(response).await;
        assert_eq!(error.error, "content is required");
    }

    #[tokio::test]
    async fn null_content_is_validated_like_missing_content() {
        let app = router(state(false));
        let response = app
            .clone()
            .oneshot(post_json("/notes", ALICE, r#"{"content":null}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let error: ErrorBody = body(response).await;
        assert_eq!(error.error, "content is required");

        let response = app
            .oneshot(post_json(
                "/notes",
                ALICE,
                r#"{"content":null,"file_name":"a.pdf","file_url":"https://files.example/a.pdf"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created: Note = body(response).await;
        assert_eq!(created.content, "a.pdf");
        assert_eq!(created.file_url.as_deref(), Some("https://files.example/a.pdf"));
    }

    #[tokio::test]
    async fn search_browses_and_rejects_unknown_types() {
        let app = router(state(false));
        for content in ["Went for a run #fitness", "Bought new shoes #fitness #gear"] {
            let response = app
                .clone()
                .oneshot(post_json("/notes", ALICE, &serde_json::json!({ "content": content }).to_string()))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::CREATED);
        }

        let response = app
            .clone()
            .oneshot(post_json("/search", ALICE, r#"{"query":null,"filters":{"tags":["GEAR"]}}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let hits: Vec<RankedNote> = body(response).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].note.content, "Bought new shoes #fitness #gear");

        let response = app
            .oneshot(post_json("/search", ALICE, r#"{"query":"run","filters":{"types":["podcast"]}}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn tags_and_graph_reflect_stored_notes() {
        let app = router(state(false));
        for content in ["Morning run #fitness", "Evening stretch #fitness #mobility"] {
            app.clone()
                .oneshot(post_json("/notes", ALICE, &serde_json::json!({ "content": content }).to_string()))
                .await
                .unwrap();
        }

        let tags: TagsResponse =
            body(app.clone().oneshot(get("/tags?min_count=2", ALICE)).await.unwrap()).await;
        assert!(tags.tags.iter().any(|tag| tag.tag == "fitness" && tag.count == 2));
        assert!(tags.tags.iter().all(|tag| tag.count >= 2));

        let graph: BrainGraph =
            body(app.clone().oneshot(get("/graph?strategy=tags", ALICE)).await.unwrap()).await;
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.edges.len(), 1);

        let response = app.oneshot(get("/graph?strategy=random", ALICE)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn chat_and_rewrite_need_a_generator() {
        let response = router(state(false))
            .oneshot(post_json("/rewrite", ALICE, r#"{"text":"make this better"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let app = router(state(true));
        let response = app
            .clone()
            .oneshot(post_json("/rewrite", ALICE, r#"{"text":"make this better"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let rewritten: RewriteResponse = body(response).await;
        assert_eq!(rewritten.answer, "Clearer text.");

        let response = app
            .oneshot(post_json("/chat", BOB, r#"{"message":"what did I eat?"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let answer: ChatAnswer = body(response).await;
        assert_eq!(answer.answer, second_brain_core::NO_MEMORY_ANSWER);
        assert!(answer.sources.is_empty());
    }

    #[test]
    fn api_tokens_require_owner_and_token() {
        let tokens = parse_api_tokens(["alice:abc", " bob : def ", ""]).unwrap();
        assert_eq!(tokens.get("abc"), Some(&OwnerId::new("alice")));
        assert_eq!(tokens.get("def"), Some(&OwnerId::new("bob")));
        assert!(parse_api_tokens(["no-separator"]).is_err());
        assert!(parse_api_tokens(["alice:"]).is_err());
    }

    #[test]
    fn graph_strategy_defaults_to_similarity() {
        assert_eq!(
            graph_strategy(None, None, 0.5).unwrap(),
            GraphEdgeStrategy::EmbeddingSimilarity { threshold: 0.5 }
        );
        assert_eq!(
            graph_strategy(Some("similarity"), Some(0.7), 0.5).unwrap(),
            GraphEdgeStrategy::EmbeddingSimilarity { threshold: 0.7 }
        );
        assert_eq!(graph_strategy(Some("tags"), None, 0.5).unwrap(), GraphEdgeStrategy::TagOverlap);
    }
}
