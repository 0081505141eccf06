use crate::embeddings::Embedder;
use crate::enrichment::{derive_summary, derive_title, Enricher};
use crate::tags::extract_hashtags;
use crate::traits::NoteStore;
use crate::{CapabilityError, Enrichment, NewNote, Note, NoteDraft, NoteType, OwnerId, PipelineError};
use tracing::{info, warn};

/// Turns raw captures into enriched, embedded, persisted notes.
pub struct IngestionService<E, R, S> {
    embedder: E,
    enricher: R,
    store: S,
}

impl<E, R, S> IngestionService<E, R, S>
where
    E: Embedder,
    R: Enricher,
    S: NoteStore,
{
    pub fn new(embedder: E, enricher: R, store: S) -> Self {
        Self {
            embedder,
            enricher,
            store,
        }
    }

    pub async fn ingest(&self, owner: &OwnerId, input: NewNote) -> Result<Note, PipelineError> {
        let content = resolve_content(&input)?;
        let note_type = resolve_type(input.note_type.as_deref())?;
        let author_hint = input.author_hint.as_deref();

        let embedding = async {
            self.embedder
                .embed(&content)
                .await
                .map_err(PipelineError::from)
        };
        // Enrichment errors are carried through the join, not propagated.
        let enrichment = async {
            Ok::<_, PipelineError>(self.enricher.enrich(&content, author_hint).await)
        };
        let (embedding, enrichment) = tokio::try_join!(embedding, enrichment)?;

        if embedding.len() != self.embedder.dimensions() {
            return Err(CapabilityError::MalformedOutput(format!(
                "embedding dimension {} != {}",
                embedding.len(),
                self.embedder.dimensions()
            ))
            .into());
        }

        let enrichment = enrichment.unwrap_or_else(|error| {
            warn!(owner = %owner, error = %error, "enrichment failed, storing derived fields");
            fallback_enrichment(&content)
        });

        let draft = NoteDraft {
            content,
            note_type,
            title: Some(enrichment.title),
            summary: Some(enrichment.summary),
            tags: enrichment.tags,
            embedding,
            file_url: non_blank(input.file_url),
            file_name: non_blank(input.file_name),
        };

        let note = self.store.insert(owner, draft).await?;
        info!(
            owner = %owner,
            note_id = %note.id,
            note_type = %note.note_type,
            tag_count = note.tags.len(),
            "note ingested"
        );
        Ok(note)
    }
}

/// The text that gets embedded and stored. Attachment-only captures fall
/// back to the file name, then the URL.
fn resolve_content(input: &NewNote) -> Result<String, PipelineError> {
    let content = input.content.trim();
    if !content.is_empty() {
        return Ok(content.to_string());
    }
    if !input.has_attachment() {
        return Err(PipelineError::Validation("content is required".to_string()));
    }

    [&input.file_name, &input.file_url]
        .into_iter()
        .filter_map(|value| value.as_deref().map(str::trim))
        .find(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| PipelineError::Validation("content is required".to_string()))
}

pub fn resolve_type(raw: Option<&str>) -> Result<NoteType, PipelineError> {
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        None => Ok(NoteType::default()),
        Some(value) => value.parse().map_err(PipelineError::Validation),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn fallback_enrichment(content: &str) -> Enrichment {
    Enrichment {
        title: derive_title(content),
        summary: derive_summary(content),
        tags: extract_hashtags(content),
    }
}
