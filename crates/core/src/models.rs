use crate::tags::normalize_tag_list;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use std::fmt;
use std::str::FromStr;

/// Identity every read and write is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteType {
    #[default]
    Note,
    Link,
    Insight,
}

impl NoteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Note => "note",
            Self::Link => "link",
            Self::Insight => "insight",
        }
    }
}

impl fmt::Display for NoteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NoteType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "note" => Ok(Self::Note),
            "link" => Ok(Self::Link),
            "insight" => Ok(Self::Insight),
            other => Err(format!("unknown note type: {other}")),
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Note {
    pub id: String,
    pub owner: OwnerId,
    pub content: String,
    #[serde(rename = "type", default, deserialize_with = "deserialize_note_type")]
    pub note_type: NoteType,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default, deserialize_with = "deserialize_tags")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_embedding")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A note ready to be persisted; the store assigns `id` and `created_at`.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NoteDraft {
    pub content: String,
    #[serde(rename = "type")]
    pub note_type: NoteType,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub tags: Vec<String>,
    pub embedding: Vec<f32>,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
}

impl NoteDraft {
    pub fn into_note(self, id: String, owner: OwnerId, created_at: DateTime<Utc>) -> Note {
        Note {
            id,
            owner,
            content: self.content,
            note_type: self.note_type,
            title: self.title,
            summary: self.summary,
            tags: self.tags,
            embedding: Some(self.embedding),
            file_url: self.file_url,
            file_name: self.file_name,
            created_at,
        }
    }
}

/// Raw capture handed to ingestion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewNote {
    #[serde(default, deserialize_with = "deserialize_nullable_text")]
    pub content: String,
    #[serde(rename = "type", default)]
    pub note_type: Option<String>,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub author_hint: Option<String>,
}

impl NewNote {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn has_attachment(&self) -> bool {
        [&self.file_url, &self.file_name]
            .iter()
            .any(|value| value.as_deref().is_some_and(|v| !v.trim().is_empty()))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Enrichment {
    pub title: String,
    pub summary: String,
    pub tags: Vec<String>,
}

/// A note with the similarity it scored against the query, when there was one.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedNote {
    #[serde(flatten)]
    pub note: Note,
    #[serde(default)]
    pub similarity: Option<f32>,
}

impl RankedNote {
    pub fn unscored(note: Note) -> Self {
        Self {
            note,
            similarity: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Date,
    Relevance,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchFilters {
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub sort: SortOrder,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchRequest {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub filters: SearchFilters,
}

impl SearchRequest {
    /// The trimmed query, or `None` when the caller is browsing.
    pub fn query_text(&self) -> Option<&str> {
        self.query
            .as_deref()
            .map(str::trim)
            .filter(|query| !query.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityQuery {
    pub vector: Vec<f32>,
    pub floor: f32,
    pub top_k: usize,
    pub types: Vec<NoteType>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TagCount {
    pub tag: String,
    pub count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
    pub similarity_floor: f32,
    pub edge_threshold: f32,
    pub page_size: usize,
    pub fetch_window: usize,
    pub chat_context_k: usize,
    pub enrichment_max_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            similarity_floor: 0.3,
            edge_threshold: 0.5,
            page_size: 20,
            fetch_window: 50,
            chat_context_k: 5,
            enrichment_max_chars: 4_000,
        }
    }
}

fn deserialize_note_type<'de, D>(deserializer: D) -> Result<NoteType, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(NoteType::default()),
        Some(value) => value.parse().map_err(serde::de::Error::custom),
    }
}

// Upload-only clients send `"content": null`.
fn deserialize_nullable_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn deserialize_tags<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    Ok(normalize_tag_list(&raw))
}

// pgvector columns come back from PostgREST as text: "[0.1,0.2,...]".
fn deserialize_embedding<'de, D>(deserializer: D) -> Result<Option<Vec<f32>>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(text) if text.trim().is_empty() => Ok(None),
        Value::String(text) => serde_json::from_str::<Vec<f32>>(&text)
            .map(Some)
            .map_err(D::Error::custom),
        other => serde_json::from_value::<Vec<f32>>(other)
            .map(Some)
            .map_err(D::Error::custom),
    }
}
