use crate::traits::NoteStore;
use crate::{Note, NoteDraft, NoteType, OwnerId, RankedNote, SimilarityQuery, StoreError, TagCount};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

const BACKEND: &str = "supabase";

/// Table and RPC definitions the store expects (pgvector, 768 dimensions).
pub const SCHEMA_SQL: &str = r#"
create extension if not exists vector;

create table if not exists notes (
    id uuid primary key default gen_random_uuid(),
    owner text not null,
    content text not null,
    type text not null default 'note',
    title text,
    summary text,
    tags text[] not null default '{}',
    embedding vector(768) not null,
    file_url text,
    file_name text,
    created_at timestamptz not null default now()
);

create index if not exists notes_owner_created_idx on notes (owner, created_at desc);

create or replace function match_notes(
    owner_id text,
    query_embedding vector(768),
    match_threshold float,
    match_count int,
    filter_types text[] default null
)
returns table (
    id uuid, owner text, content text, type text, title text, summary text,
    tags text[], embedding vector(768), file_url text, file_name text,
    created_at timestamptz, similarity float
)
language sql stable as $$
    select n.id, n.owner, n.content, n.type, n.title, n.summary, n.tags, n.embedding,
           n.file_url, n.file_name, n.created_at,
           1 - (n.embedding <=> query_embedding) as similarity
    from notes n
    where n.owner = owner_id
      and (filter_types is null or n.type = any(filter_types))
      and 1 - (n.embedding <=> query_embedding) >= match_threshold
    order by n.embedding <=> query_embedding
    limit match_count;
$$;

create or replace function get_unique_tags(owner_id text)
returns table (tag text, count bigint)
language sql stable as $$
    select t.tag, count(*) as count
    from notes n, unnest(n.tags) as t(tag)
    where n.owner = owner_id
    group by t.tag
    order by count desc, t.tag asc;
$$;
"#;

/// PostgREST client for the `notes` table and its RPCs.
///
/// Authenticates with a service key, so owner scoping is expressed in
/// every request (`owner=eq.<id>` or the RPC `owner_id` argument).
pub struct SupabaseStore {
    endpoint: Url,
    api_key: String,
    client: Client,
}

impl SupabaseStore {
    pub fn new(endpoint: &str, api_key: impl Into<String>) -> Result<Self, StoreError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        let mut endpoint = Url::parse(endpoint)?;
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }

        Ok(Self {
            endpoint,
            api_key: api_key.into(),
            client,
        })
    }

    fn rest_url(&self, path: &str) -> Result<Url, StoreError> {
        Ok(self.endpoint.join("rest/v1/")?.join(path)?)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    async fn checked(response: Response) -> Result<Response, StoreError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(StoreError::BackendResponse {
            backend: BACKEND.to_string(),
            details: format!("{status}: {body}"),
        })
    }

    async fn select_notes(&self, params: Vec<(&str, String)>) -> Result<Vec<Note>, StoreError> {
        let response = self
            .authorized(self.client.get(self.rest_url("notes")?))
            .query(&params)
            .send()
            .await?;
        let rows: Vec<Note> = Self::checked(response).await?.json().await?;
        Ok(rows)
    }

    async fn rpc(&self, function: &str, body: Value) -> Result<Value, StoreError> {
        let response = self
            .authorized(self.client.post(self.rest_url(&format!("rpc/{function}"))?))
            .json(&body)
            .send()
            .await?;
        Ok(Self::checked(response).await?.json().await?)
    }
}

fn owner_filter(owner: &OwnerId) -> (&'static str, String) {
    ("owner", format!("eq.{owner}"))
}

fn types_filter(types: &[NoteType]) -> Option<(&'static str, String)> {
    if types.is_empty() {
        return None;
    }
    let joined = types
        .iter()
        .map(NoteType::as_str)
        .collect::<Vec<_>>()
        .join(",");
    Some(("type", format!("in.({joined})")))
}

/// Decodes `match_notes` rows and re-checks owner, floor and type filter.
fn ranked_rows(
    rows: Value,
    owner: &OwnerId,
    query: &SimilarityQuery,
) -> Result<Vec<RankedNote>, StoreError> {
    let rows: Vec<RankedNote> = serde_json::from_value(rows)?;
    let mut ranked: Vec<RankedNote> = rows
        .into_iter()
        .filter(|row| &row.note.owner == owner)
        .filter(|row| query.types.is_empty() || query.types.contains(&row.note.note_type))
        .filter(|row| row.similarity.is_some_and(|score| score >= query.floor))
        .collect();
    ranked.sort_by(|left, right| {
        let left = left.similarity.unwrap_or_default();
        let right = right.similarity.unwrap_or_default();
        right.total_cmp(&left)
    });
    ranked.truncate(query.top_k);
    Ok(ranked)
}

// get_unique_tags may hand back bare strings on older schemas.
fn tag_rows(rows: Value) -> Result<Vec<TagCount>, StoreError> {
    let rows = match rows {
        Value::Array(rows) => rows,
        other => {
            return Err(StoreError::BackendResponse {
                backend: BACKEND.to_string(),
                details: format!("get_unique_tags returned a non-array payload: {other}"),
            })
        }
    };

    rows.into_iter()
        .map(|row| match row {
            Value::String(tag) => Ok(TagCount { tag, count: 1 }),
            other => serde_json::from_value::<TagCount>(other).map_err(StoreError::from),
        })
        .collect()
}

#[async_trait]
impl NoteStore for SupabaseStore {
    async fn insert(&self, owner: &OwnerId, draft: NoteDraft) -> Result<Note, StoreError> {
        let mut row = serde_json::to_value(&draft)?;
        if let Value::Object(fields) = &mut row {
            fields.insert("owner".to_string(), json!(owner));
        }

        let response = self
            .authorized(self.client.post(self.rest_url("notes")?))
            .header("Prefer", "return=representation")
            .json(&row)
            .send()
            .await?;

        let mut rows: Vec<Note> = Self::checked(response).await?.json().await?;
        rows.pop().ok_or_else(|| StoreError::BackendResponse {
            backend: BACKEND.to_string(),
            details: "insert returned no row".to_string(),
        })
    }

    async fn list_all(&self, owner: &OwnerId) -> Result<Vec<Note>, StoreError> {
        self.select_notes(vec![
            ("select", "*".to_string()),
            owner_filter(owner),
            ("order", "created_at.desc".to_string()),
        ])
        .await
    }

    async fn list_recent(
        &self,
        owner: &OwnerId,
        types: &[NoteType],
        limit: usize,
    ) -> Result<Vec<Note>, StoreError> {
        let mut params = vec![("select", "*".to_string()), owner_filter(owner)];
        params.extend(types_filter(types));
        params.push(("order", "created_at.desc".to_string()));
        params.push(("limit", limit.to_string()));
        self.select_notes(params).await
    }

    async fn similarity_search(
        &self,
        owner: &OwnerId,
        query: &SimilarityQuery,
    ) -> Result<Vec<RankedNote>, StoreError> {
        let filter_types = (!query.types.is_empty())
            .then(|| query.types.iter().map(NoteType::as_str).collect::<Vec<_>>());

        let rows = self
            .rpc(
                "match_notes",
                json!({
                    "owner_id": owner,
                    "query_embedding": query.vector,
                    "match_threshold": query.floor,
                    "match_count": query.top_k,
                    "filter_types": filter_types,
                }),
            )
            .await?;

        ranked_rows(rows, owner, query)
    }

    async fn unique_tags(&self, owner: &OwnerId) -> Result<Vec<TagCount>, StoreError> {
        let rows = self
            .rpc("get_unique_tags", json!({ "owner_id": owner }))
            .await?;
        tag_rows(rows)
    }
}
