use crate::{
    CapabilityError, Note, NoteDraft, NoteType, OwnerId, RankedNote, SimilarityQuery, StoreError,
    TagCount,
};
use async_trait::async_trait;
use std::sync::Arc;

/// Persistence boundary. Every operation is scoped to `owner`; an
/// implementation must never return another owner's notes.
#[async_trait]
pub trait NoteStore: Send + Sync {
    async fn insert(&self, owner: &OwnerId, draft: NoteDraft) -> Result<Note, StoreError>;

    /// All notes of the owner, newest first.
    async fn list_all(&self, owner: &OwnerId) -> Result<Vec<Note>, StoreError>;

    /// Newest-first notes restricted to `types` (empty = any), at most `limit`.
    async fn list_recent(
        &self,
        owner: &OwnerId,
        types: &[NoteType],
        limit: usize,
    ) -> Result<Vec<Note>, StoreError>;

    /// Notes at or above `query.floor`, most similar first.
    async fn similarity_search(
        &self,
        owner: &OwnerId,
        query: &SimilarityQuery,
    ) -> Result<Vec<RankedNote>, StoreError>;

    async fn unique_tags(&self, owner: &OwnerId) -> Result<Vec<TagCount>, StoreError>;
}

/// Opaque generative-text capability.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, CapabilityError>;
}

#[async_trait]
impl<T: NoteStore + ?Sized> NoteStore for Arc<T> {
    async fn insert(&self, owner: &OwnerId, draft: NoteDraft) -> Result<Note, StoreError> {
        (**self).insert(owner, draft).await
    }

    async fn list_all(&self, owner: &OwnerId) -> Result<Vec<Note>, StoreError> {
        (**self).list_all(owner).await
    }

    async fn list_recent(
        &self,
        owner: &OwnerId,
        types: &[NoteType],
        limit: usize,
    ) -> Result<Vec<Note>, StoreError> {
        (**self).list_recent(owner, types, limit).await
    }

    async fn similarity_search(
        &self,
        owner: &OwnerId,
        query: &SimilarityQuery,
    ) -> Result<Vec<RankedNote>, StoreError> {
        (**self).similarity_search(owner, query).await
    }

    async fn unique_tags(&self, owner: &OwnerId) -> Result<Vec<TagCount>, StoreError> {
        (**self).unique_tags(owner).await
    }
}

#[async_trait]
impl<T: Generator + ?Sized> Generator for Arc<T> {
    async fn generate(&self, prompt: &str) -> Result<String, CapabilityError> {
        (**self).generate(prompt).await
    }
}
