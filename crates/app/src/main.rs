mod server;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use second_brain_core::providers::gemini::{
    DEFAULT_EMBED_MODEL, DEFAULT_GEMINI_DIMENSIONS, DEFAULT_GEMINI_ENDPOINT,
    DEFAULT_GENERATION_MODEL,
};
use second_brain_core::{
    build_graph, CharacterNgramEmbedder, GeminiClient, InMemoryNoteStore, LlmEnricher,
    LocalEnricher, NewNote, OwnerId, PipelineConfig, RankedNote, SearchFilters, SearchRequest,
    SortOrder, SupabaseStore, SCHEMA_SQL,
};
use server::{graph_strategy, parse_api_tokens, AppState, Capabilities, SharedGenerator, SharedStore};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "second-brain", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Note store backend
    #[arg(long, env = "SECOND_BRAIN_STORE", value_enum, default_value_t = StoreBackend::Memory)]
    store: StoreBackend,

    /// JSON snapshot used by the in-memory store
    #[arg(long, env = "SECOND_BRAIN_DATA_FILE", default_value = "second-brain.json")]
    data_file: PathBuf,

    /// Supabase project URL
    #[arg(long, env = "SUPABASE_URL")]
    supabase_url: Option<String>,

    /// Supabase service key
    #[arg(long, env = "SUPABASE_KEY", hide_env_values = true)]
    supabase_key: Option<String>,

    /// Embedding and generation provider
    #[arg(long, env = "SECOND_BRAIN_PROVIDER", value_enum, default_value_t = Provider::Local)]
    provider: Provider,

    /// Gemini API key
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    gemini_api_key: Option<String>,

    /// Gemini REST endpoint
    #[arg(long, env = "GEMINI_ENDPOINT", default_value = DEFAULT_GEMINI_ENDPOINT)]
    gemini_endpoint: String,

    /// Gemini embedding model
    #[arg(long, env = "GEMINI_EMBED_MODEL", default_value = DEFAULT_EMBED_MODEL)]
    embed_model: String,

    /// Dimensionality produced by the embedding model
    #[arg(long, env = "GEMINI_EMBED_DIMENSIONS", default_value_t = DEFAULT_GEMINI_DIMENSIONS)]
    embed_dimensions: usize,

    /// Gemini generation model
    #[arg(long, env = "GEMINI_GENERATION_MODEL", default_value = DEFAULT_GENERATION_MODEL)]
    generation_model: String,

    /// Owner used by the local subcommands
    #[arg(long, env = "SECOND_BRAIN_OWNER", default_value = "local")]
    owner: String,

    #[command(flatten)]
    tuning: Tuning,
}

#[derive(Args)]
struct Tuning {
    /// Minimum cosine similarity for a search hit
    #[arg(long, env = "SECOND_BRAIN_SIMILARITY_FLOOR", default_value_t = 0.3)]
    similarity_floor: f32,

    /// Minimum cosine similarity for a graph edge
    #[arg(long, env = "SECOND_BRAIN_EDGE_THRESHOLD", default_value_t = 0.5)]
    edge_threshold: f32,

    /// Maximum results per search
    #[arg(long, env = "SECOND_BRAIN_PAGE_SIZE", default_value_t = 20)]
    page_size: usize,

    /// Candidates fetched before in-memory filtering
    #[arg(long, env = "SECOND_BRAIN_FETCH_WINDOW", default_value_t = 50)]
    fetch_window: usize,

    /// Notes handed to the generator as chat context
    #[arg(long, env = "SECOND_BRAIN_CHAT_CONTEXT", default_value_t = 5)]
    chat_context_k: usize,

    /// Characters of content sent for enrichment
    #[arg(long, env = "SECOND_BRAIN_ENRICHMENT_MAX_CHARS", default_value_t = 4_000)]
    enrichment_max_chars: usize,
}

impl Tuning {
    fn config(&self) -> PipelineConfig {
        PipelineConfig {
            similarity_floor: self.similarity_floor,
            edge_threshold: self.edge_threshold,
            page_size: self.page_size,
            fetch_window: self.fetch_window,
            chat_context_k: self.chat_context_k,
            enrichment_max_chars: self.enrichment_max_chars,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum StoreBackend {
    Memory,
    Supabase,
}

#[derive(Clone, Copy, ValueEnum)]
enum Provider {
    /// Offline n-gram embeddings and heuristic enrichment; no chat.
    Local,
    Gemini,
}

#[derive(Clone, Copy, ValueEnum)]
enum SortArg {
    Date,
    Relevance,
}

impl From<SortArg> for SortOrder {
    fn from(sort: SortArg) -> Self {
        match sort {
            SortArg::Date => SortOrder::Date,
            SortArg::Relevance => SortOrder::Relevance,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API.
    Serve {
        /// Listen address
        #[arg(long, env = "SECOND_BRAIN_ADDR", default_value = "127.0.0.1:8080")]
        addr: String,
        /// Comma separated owner:token pairs
        #[arg(long, env = "SECOND_BRAIN_API_TOKENS", value_delimiter = ',', hide_env_values = true)]
        api_tokens: Vec<String>,
    },
    /// Capture a note.
    Add {
        /// Note text
        #[arg(default_value = "")]
        content: String,
        /// note, link or insight
        #[arg(long = "type")]
        note_type: Option<String>,
        #[arg(long)]
        file_url: Option<String>,
        #[arg(long)]
        file_name: Option<String>,
        /// Write the enrichment in the first person of this author
        #[arg(long)]
        author_hint: Option<String>,
    },
    /// List every note, newest first.
    List,
    /// Browse or semantically search notes.
    Search {
        /// Search query; omit to browse
        query: Option<String>,
        /// Restrict to these note types
        #[arg(long = "type")]
        types: Vec<String>,
        /// Keep notes carrying any of these tags
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long, value_enum, default_value_t = SortArg::Date)]
        sort: SortArg,
    },
    /// Print the tag vocabulary with counts.
    Tags {
        #[arg(long, default_value_t = 1)]
        min_count: u64,
    },
    /// Print the note graph as JSON.
    Graph {
        /// similarity or tags
        #[arg(long, default_value = "similarity")]
        strategy: String,
        #[arg(long)]
        threshold: Option<f32>,
    },
    /// Ask a question answered from your notes.
    Chat { message: String },
    /// Rephrase text to be clearer.
    Rewrite { text: String },
    /// Print the SQL that provisions the Supabase schema.
    Schema,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    if let Command::Schema = cli.command {
        println!("{SCHEMA_SQL}");
        return Ok(());
    }

    let config = cli.tuning.config();
    let store = open_store(&cli).await?;
    let capabilities = capabilities(&cli, store, &config)?;
    let owner = OwnerId::new(cli.owner.clone());

    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "second-brain boot"
    );

    match cli.command {
        Command::Serve { addr, api_tokens } => {
            let tokens = parse_api_tokens(&api_tokens).map_err(anyhow::Error::msg)?;
            if tokens.is_empty() {
                bail!("--api-tokens needs at least one owner:token pair");
            }
            let app = server::router(AppState::new(capabilities, config, tokens));
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("binding {addr}"))?;
            info!(addr = %addr, "api listening");
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }
        Command::Add {
            content,
            note_type,
            file_url,
            file_name,
            author_hint,
        } => {
            let state = AppState::new(capabilities, config, HashMap::new());
            let note = state
                .ingestion
                .ingest(
                    &owner,
                    NewNote {
                        content,
                        note_type,
                        file_url,
                        file_name,
                        author_hint,
                    },
                )
                .await?;
            println!("{} [{}] {}", note.id, note.note_type, note.title.as_deref().unwrap_or("Untitled"));
            if !note.tags.is_empty() {
                println!("  tags={}", note.tags.join(","));
            }
        }
        Command::List => {
            let state = AppState::new(capabilities, config, HashMap::new());
            let notes = state.retrieval.list_notes(&owner).await?;
            for note in notes.into_iter().map(RankedNote::unscored) {
                print_hit(&note);
            }
        }
        Command::Search {
            query,
            types,
            tags,
            sort,
        } => {
            let state = AppState::new(capabilities, config, HashMap::new());
            let request = SearchRequest {
                query,
                filters: SearchFilters {
                    types,
                    tags,
                    sort: sort.into(),
                },
            };
            let hits = state.retrieval.retrieve(&owner, &request).await?;
            if hits.is_empty() {
                println!("no matching notes");
            }
            for hit in &hits {
                print_hit(hit);
            }
        }
        Command::Tags { min_count } => {
            let state = AppState::new(capabilities, config, HashMap::new());
            for tag in state.retrieval.tag_vocabulary(&owner, min_count).await? {
                println!("{:>5} {}", tag.count, tag.tag);
            }
        }
        Command::Graph {
            strategy,
            threshold,
        } => {
            let state = AppState::new(capabilities, config, HashMap::new());
            let strategy = graph_strategy(Some(&strategy), threshold, config.edge_threshold)?;
            let notes = state.retrieval.list_notes(&owner).await?;
            println!("{}", serde_json::to_string_pretty(&build_graph(&notes, strategy))?);
        }
        Command::Chat { message } => {
            let state = AppState::new(capabilities, config, HashMap::new());
            let Some(assistant) = state.assistant.as_deref() else {
                bail!("chat needs a generation provider, run with --provider gemini");
            };
            let answer = assistant.chat(&owner, &message).await?;
            println!("{}", answer.answer);
            for source in &answer.sources {
                print_hit(source);
            }
        }
        Command::Rewrite { text } => {
            let state = AppState::new(capabilities, config, HashMap::new());
            let Some(assistant) = state.assistant.as_deref() else {
                bail!("rewrite needs a generation provider, run with --provider gemini");
            };
            println!("{}", assistant.rewrite(&text).await?);
        }
        Command::Schema => {}
    }

    Ok(())
}

async fn open_store(cli: &Cli) -> anyhow::Result<SharedStore> {
    Ok(match cli.store {
        StoreBackend::Memory => Arc::new(InMemoryNoteStore::open(&cli.data_file).await?),
        StoreBackend::Supabase => {
            let url = cli
                .supabase_url
                .as_deref()
                .context("--supabase-url is required for the supabase store")?;
            let key = cli
                .supabase_key
                .clone()
                .context("--supabase-key is required for the supabase store")?;
            Arc::new(SupabaseStore::new(url, key)?)
        }
    })
}

fn capabilities(
    cli: &Cli,
    store: SharedStore,
    config: &PipelineConfig,
) -> anyhow::Result<Capabilities> {
    Ok(match cli.provider {
        Provider::Local => Capabilities {
            embedder: Arc::new(CharacterNgramEmbedder::default()),
            enricher: Arc::new(LocalEnricher),
            generator: None,
            store,
        },
        Provider::Gemini => {
            let key = cli
                .gemini_api_key
                .clone()
                .context("--gemini-api-key is required for the gemini provider")?;
            let client = Arc::new(
                GeminiClient::new(key)?
                    .with_endpoint(cli.gemini_endpoint.clone())
                    .with_embed_model(cli.embed_model.clone(), cli.embed_dimensions)
                    .with_generation_model(cli.generation_model.clone()),
            );
            let generator: SharedGenerator = client.clone();
            Capabilities {
                embedder: client,
                enricher: Arc::new(
                    LlmEnricher::new(generator.clone()).with_max_chars(config.enrichment_max_chars),
                ),
                generator: Some(generator),
                store,
            }
        }
    })
}

fn print_hit(hit: &RankedNote) {
    let note = &hit.note;
    match hit.similarity {
        Some(similarity) => println!(
            "[{}] similarity={:.4} id={} {}",
            note.note_type,
            similarity,
            note.id,
            note.title.as_deref().unwrap_or("Untitled")
        ),
        None => println!(
            "[{}] {} id={} {}",
            note.note_type,
            note.created_at.to_rfc3339(),
            note.id,
            note.title.as_deref().unwrap_or("Untitled")
        ),
    }
    if !note.tags.is_empty() {
        println!("  tags={}", note.tags.join(","));
    }
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %error, "failed to listen for shutdown signal");
    }
    info!("shutting down");
}
