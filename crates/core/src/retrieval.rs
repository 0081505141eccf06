use crate::embeddings::Embedder;
use crate::tags::matches_any_tag;
use crate::traits::NoteStore;
use crate::{
    Note, NoteType, OwnerId, PipelineConfig, PipelineError, RankedNote, SearchRequest,
    SimilarityQuery, SortOrder, TagCount,
};
use tracing::debug;

/// Hybrid query engine: browse mode without a query, semantic mode with one.
pub struct RetrievalService<E, S> {
    embedder: E,
    store: S,
    config: PipelineConfig,
}

impl<E, S> RetrievalService<E, S>
where
    E: Embedder,
    S: NoteStore,
{
    pub fn new(embedder: E, store: S, config: PipelineConfig) -> Self {
        Self {
            embedder,
            store,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn retrieve(
        &self,
        owner: &OwnerId,
        request: &SearchRequest,
    ) -> Result<Vec<RankedNote>, PipelineError> {
        let types = parse_types(&request.filters.types)?;
        let tags = &request.filters.tags;

        match request.query_text() {
            None => self.browse(owner, &types, tags).await,
            Some(query) => {
                self.semantic(owner, query, &types, tags, request.filters.sort)
                    .await
            }
        }
    }

    /// All notes of the owner, newest first.
    pub async fn list_notes(&self, owner: &OwnerId) -> Result<Vec<Note>, PipelineError> {
        Ok(self.store.list_all(owner).await?)
    }

    /// Tag vocabulary with occurrence counts, keeping tags seen at least
    /// `min_count` times.
    pub async fn tag_vocabulary(
        &self,
        owner: &OwnerId,
        min_count: u64,
    ) -> Result<Vec<TagCount>, PipelineError> {
        let mut tags = self.store.unique_tags(owner).await?;
        tags.retain(|tag| tag.count >= min_count);
        Ok(tags)
    }

    fn fetch_window(&self) -> usize {
        self.config.fetch_window.max(self.config.page_size)
    }

    async fn browse(
        &self,
        owner: &OwnerId,
        types: &[NoteType],
        tags: &[String],
    ) -> Result<Vec<RankedNote>, PipelineError> {
        let recent = self
            .store
            .list_recent(owner, types, self.fetch_window())
            .await?;
        debug!(owner = %owner, fetched = recent.len(), "browse mode");

        Ok(recent
            .into_iter()
            .filter(|note| matches_any_tag(&note.tags, tags))
            .take(self.config.page_size)
            .map(RankedNote::unscored)
            .collect())
    }

    async fn semantic(
        &self,
        owner: &OwnerId,
        query: &str,
        types: &[NoteType],
        tags: &[String],
        sort: SortOrder,
    ) -> Result<Vec<RankedNote>, PipelineError> {
        let vector = self.embedder.embed(query).await?;
        let similarity_query = SimilarityQuery {
            vector,
            floor: self.config.similarity_floor,
            top_k: self.fetch_window(),
            types: types.to_vec(),
        };

        let mut hits = self
            .store
            .similarity_search(owner, &similarity_query)
            .await?;
        let fetched = hits.len();

        hits.retain(|hit| types.is_empty() || types.contains(&hit.note.note_type));
        hits.retain(|hit| matches_any_tag(&hit.note.tags, tags));

        if sort == SortOrder::Date {
            hits.sort_by(|left, right| right.note.created_at.cmp(&left.note.created_at));
        }
        hits.truncate(self.config.page_size);

        debug!(
            owner = %owner,
            fetched,
            returned = hits.len(),
            sort = ?sort,
            "semantic mode"
        );
        Ok(hits)
    }
}

fn parse_types(raw: &[String]) -> Result<Vec<NoteType>, PipelineError> {
    let mut types = Vec::new();
    for value in raw.iter().filter(|value| !value.trim().is_empty()) {
        let parsed: NoteType = value.parse().map_err(PipelineError::Validation)?;
        if !types.contains(&parsed) {
            types.push(parsed);
        }
    }
    Ok(types)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::InMemoryNoteStore;
    use crate::{CapabilityError, NoteDraft, SearchFilters};
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};
    use std::collections::HashMap;
    use std::sync::Arc;

    /// Maps known texts to fixed vectors; anything else is the zero vector.
    struct TableEmbedder(HashMap<&'static str, Vec<f32>>);

    #[async_trait]
    impl Embedder for TableEmbedder {
        fn dimensions(&self) -> usize {
            3
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, CapabilityError> {
            Ok(self.0.get(text).cloned().unwrap_or_else(|| vec![0.0; 3]))
        }
    }

    struct DownEmbedder;

    #[async_trait]
    impl Embedder for DownEmbedder {
        fn dimensions(&self) -> usize {
            3
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, CapabilityError> {
            Err(CapabilityError::Unavailable("offline".to_string()))
        }
    }

    fn note(id: &str, note_type: NoteType, tags: &[&str], minute: i64, embedding: [f32; 3]) -> Note {
        let base = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        NoteDraft {
            content: id.to_string(),
            note_type,
            title: None,
            summary: None,
            tags: tags.iter().map(|tag| tag.to_string()).collect(),
            embedding: embedding.to_vec(),
            file_url: None,
            file_name: None,
        }
        .into_note(id.to_string(), OwnerId::new("alice"), base + Duration::minutes(minute))
    }

    fn service(embedder: TableEmbedder) -> RetrievalService<TableEmbedder, Arc<InMemoryNoteStore>> {
        let store = InMemoryNoteStore::with_notes(vec![
            note("old-note", NoteType::Note, &["a", "b"], 0, [0.9, 0.1, 0.0]),
            note("mid-link", NoteType::Link, &["c"], 10, [1.0, 0.0, 0.0]),
            note("new-note", NoteType::Note, &["b"], 20, [0.6, 0.8, 0.0]),
            note("newest-insight", NoteType::Insight, &["d"], 30, [0.0, 0.0, 1.0]),
        ]);
        RetrievalService::new(embedder, Arc::new(store), PipelineConfig::default())
    }

    fn rain_embedder() -> TableEmbedder {
        TableEmbedder(HashMap::from([("rain", vec![1.0, 0.0, 0.0])]))
    }

    fn ids(hits: &[RankedNote]) -> Vec<&str> {
        hits.iter().map(|hit| hit.note.id.as_str()).collect()
    }

    fn request(query: Option<&str>, types: &[&str], tags: &[&str], sort: SortOrder) -> SearchRequest {
        SearchRequest {
            query: query.map(str::to_string),
            filters: SearchFilters {
                types: types.iter().map(|value| value.to_string()).collect(),
                tags: tags.iter().map(|value| value.to_string()).collect(),
                sort,
            },
        }
    }

    #[tokio::test]
    async fn browse_mode_orders_by_date_even_when_relevance_requested() {
        let service = service(rain_embedder());
        let owner = OwnerId::new("alice");

        for sort in [SortOrder::Date, SortOrder::Relevance] {
            let hits = service
                .retrieve(&owner, &request(Some("  "), &[], &[], sort))
                .await
                .unwrap();
            assert_eq!(ids(&hits), vec!["newest-insight", "new-note", "mid-link", "old-note"]);
            assert!(hits.iter().all(|hit| hit.similarity.is_none()));
        }
    }

    #[tokio::test]
    async fn browse_mode_applies_type_and_tag_filters() {
        let service = service(rain_embedder());
        let owner = OwnerId::new("alice");

        let hits = service
            .retrieve(&owner, &request(None, &["Note"], &["b", "zzz"], SortOrder::Date))
            .await
            .unwrap();
        assert_eq!(ids(&hits), vec!["new-note", "old-note"]);

        let hits = service
            .retrieve(&owner, &request(None, &[], &["c", "d"], SortOrder::Date))
            .await
            .unwrap();
        assert_eq!(ids(&hits), vec!["newest-insight", "mid-link"]);
    }

    #[tokio::test]
    async fn relevance_and_date_sorts_return_the_same_set() {
        let service = service(rain_embedder());
        let owner = OwnerId::new("alice");

        let by_relevance = service
            .retrieve(&owner, &request(Some("rain"), &["note"], &[], SortOrder::Relevance))
            .await
            .unwrap();
        let by_date = service
            .retrieve(&owner, &request(Some("rain"), &["note"], &[], SortOrder::Date))
            .await
            .unwrap();

        assert_eq!(ids(&by_relevance), vec!["old-note", "new-note"]);
        let scores: Vec<f32> = by_relevance.iter().filter_map(|hit| hit.similarity).collect();
        assert!(scores.windows(2).all(|pair| pair[0] >= pair[1]));

        assert_eq!(ids(&by_date), vec!["new-note", "old-note"]);
        let mut left = ids(&by_relevance);
        let mut right = ids(&by_date);
        left.sort_unstable();
        right.sort_unstable();
        assert_eq!(left, right);
        assert_ne!(ids(&by_relevance), ids(&by_date));
    }

    #[tokio::test]
    async fn semantic_mode_drops_notes_below_the_floor() {
        let service = service(rain_embedder());
        let hits = service
            .retrieve(&OwnerId::new("alice"), &request(Some("rain"), &[], &[], SortOrder::Relevance))
            .await
            .unwrap();

        assert!(!ids(&hits).contains(&"newest-insight"));
        let floor = service.config().similarity_floor;
        assert!(hits.iter().all(|hit| hit.similarity.unwrap() >= floor));
        assert_eq!(ids(&hits)[0], "mid-link");
    }

    #[tokio::test]
    async fn semantic_mode_with_no_confident_match_is_empty() {
        let service = service(rain_embedder());
        let hits = service
            .retrieve(&OwnerId::new("alice"), &request(Some("unknown words"), &[], &[], SortOrder::Relevance))
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn semantic_tag_filter_uses_any_match() {
        let service = service(rain_embedder());
        let hits = service
            .retrieve(&OwnerId::new("alice"), &request(Some("rain"), &[], &["A", "c"], SortOrder::Relevance))
            .await
            .unwrap();
        assert_eq!(ids(&hits), vec!["mid-link", "old-note"]);
    }

    #[tokio::test]
    async fn unknown_type_filter_is_a_validation_error() {
        let service = service(rain_embedder());
        let result = service
            .retrieve(&OwnerId::new("alice"), &request(None, &["video"], &[], SortOrder::Date))
            .await;
        assert!(matches!(result, Err(PipelineError::Validation(_))));
    }

    #[tokio::test]
    async fn query_embedding_failure_is_surfaced() {
        let store = Arc::new(InMemoryNoteStore::new());
        let service = RetrievalService::new(DownEmbedder, store, PipelineConfig::default());
        let result = service
            .retrieve(&OwnerId::new("alice"), &request(Some("rain"), &[], &[], SortOrder::Date))
            .await;
        assert!(matches!(result, Err(PipelineError::Capability(_))));
    }

    #[tokio::test]
    async fn page_size_bounds_results() {
        let notes = (0..30)
            .map(|minute| note(&format!("n{minute}"), NoteType::Note, &[], minute, [1.0, 0.0, 0.0]))
            .collect();
        let store = Arc::new(InMemoryNoteStore::with_notes(notes));
        let service = RetrievalService::new(rain_embedder(), store, PipelineConfig::default());
        let owner = OwnerId::new("alice");

        let browse = service
            .retrieve(&owner, &request(None, &[], &[], SortOrder::Date))
            .await
            .unwrap();
        assert_eq!(browse.len(), 20);
        assert_eq!(browse[0].note.id, "n29");

        let semantic = service
            .retrieve(&owner, &request(Some("rain"), &[], &[], SortOrder::Date))
            .await
            .unwrap();
        assert_eq!(semantic.len(), 20);
        assert_eq!(semantic[0].note.id, "n29");
    }

    #[tokio::test]
    async fn tag_vocabulary_honours_min_count() {
        let service = service(rain_embedder());
        let tags = service
            .tag_vocabulary(&OwnerId::new("alice"), 2)
            .await
            .unwrap();
        assert_eq!(tags, vec![TagCount { tag: "b".to_string(), count: 2 }]);
    }
}
