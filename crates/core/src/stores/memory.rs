//! In-process note store with brute-force cosine search.
//!
//! Optionally backed by a JSON snapshot file that is rewritten after every
//! insert, which is enough for a single-user CLI.

use crate::graph::cosine_similarity;
use crate::traits::NoteStore;
use crate::{Note, NoteDraft, NoteType, OwnerId, RankedNote, SimilarityQuery, StoreError, TagCount};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryNoteStore {
    notes: RwLock<Vec<Note>>,
    snapshot: Option<PathBuf>,
}

impl InMemoryNoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_notes(notes: Vec<Note>) -> Self {
        Self {
            notes: RwLock::new(notes),
            snapshot: None,
        }
    }

    /// Loads the snapshot at `path` when it exists; later inserts write it back.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let notes = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => Vec::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(error) => return Err(error.into()),
        };
        debug!(path = %path.display(), note_count = notes.len(), "opened note snapshot");

        Ok(Self {
            notes: RwLock::new(notes),
            snapshot: Some(path),
        })
    }

    async fn persist(path: &Path, notes: &[Note]) -> Result<(), StoreError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(notes)?;
        let staging = staging_path(path);
        tokio::fs::write(&staging, bytes).await?;
        // A crash before the rename leaves the previous snapshot intact.
        tokio::fs::rename(&staging, path).await?;
        Ok(())
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut staging = path.as_os_str().to_owned();
    staging.push(".tmp");
    PathBuf::from(staging)
}

fn newest_first(notes: &mut [Note]) {
    notes.sort_by(|left, right| right.created_at.cmp(&left.created_at));
}

fn type_allowed(types: &[NoteType], note_type: NoteType) -> bool {
    types.is_empty() || types.contains(&note_type)
}

#[async_trait]
impl NoteStore for InMemoryNoteStore {
    async fn insert(&self, owner: &OwnerId, draft: NoteDraft) -> Result<Note, StoreError> {
        let note = draft.into_note(Uuid::new_v4().to_string(), owner.clone(), Utc::now());

        let mut notes = self.notes.write().await;
        notes.push(note.clone());

        if let Some(path) = &self.snapshot {
            if let Err(error) = Self::persist(path, &notes).await {
                notes.pop();
                return Err(error);
            }
        }

        Ok(note)
    }

    async fn list_all(&self, owner: &OwnerId) -> Result<Vec<Note>, StoreError> {
        let notes = self.notes.read().await;
        let mut owned: Vec<Note> = notes
            .iter()
            .filter(|note| &note.owner == owner)
            .cloned()
            .collect();
        newest_first(&mut owned);
        Ok(owned)
    }

    async fn list_recent(
        &self,
        owner: &OwnerId,
        types: &[NoteType],
        limit: usize,
    ) -> Result<Vec<Note>, StoreError> {
        let mut owned = self.list_all(owner).await?;
        owned.retain(|note| type_allowed(types, note.note_type));
        owned.truncate(limit);
        Ok(owned)
    }

    async fn similarity_search(
        &self,
        owner: &OwnerId,
        query: &SimilarityQuery,
    ) -> Result<Vec<RankedNote>, StoreError> {
        let notes = self.notes.read().await;
        let mut ranked: Vec<RankedNote> = notes
            .iter()
            .filter(|note| &note.owner == owner)
            .filter(|note| type_allowed(&query.types, note.note_type))
            .filter_map(|note| {
                let embedding = note.embedding.as_deref()?;
                let similarity = cosine_similarity(embedding, &query.vector);
                (similarity >= query.floor).then(|| RankedNote {
                    note: note.clone(),
                    similarity: Some(similarity),
                })
            })
            .collect();

        ranked.sort_by(|left, right| {
            let left = left.similarity.unwrap_or_default();
            let right = right.similarity.unwrap_or_default();
            right.total_cmp(&left)
        });
        ranked.truncate(query.top_k);
        Ok(ranked)
    }

    async fn unique_tags(&self, owner: &OwnerId) -> Result<Vec<TagCount>, StoreError> {
        let notes = self.notes.read().await;
        let mut counts: HashMap<&str, u64> = HashMap::new();
        for tag in notes
            .iter()
            .filter(|note| &note.owner == owner)
            .flat_map(|note| note.tags.iter())
        {
            *counts.entry(tag.as_str()).or_default() += 1;
        }

        let mut tags: Vec<TagCount> = counts
            .into_iter()
            .map(|(tag, count)| TagCount {
                tag: tag.to_string(),
                count,
            })
            .collect();
        tags.sort_by(|left, right| right.count.cmp(&left.count).then_with(|| left.tag.cmp(&right.tag)));
        Ok(tags)
    }
}
