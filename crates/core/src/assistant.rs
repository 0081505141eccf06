use crate::embeddings::Embedder;
use crate::enrichment::derive_summary;
use crate::traits::{Generator, NoteStore};
use crate::{OwnerId, PipelineConfig, PipelineError, RankedNote, SimilarityQuery};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const NO_MEMORY_ANSWER: &str = "I don't have that information in my memory yet.";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatAnswer {
    pub answer: String,
    pub sources: Vec<RankedNote>,
}

/// Question answering grounded in the owner's notes, plus text rewriting.
pub struct Assistant<E, G, S> {
    embedder: E,
    generator: G,
    store: S,
    config: PipelineConfig,
}

impl<E, G, S> Assistant<E, G, S>
where
    E: Embedder,
    G: Generator,
    S: NoteStore,
{
    pub fn new(embedder: E, generator: G, store: S, config: PipelineConfig) -> Self {
        Self {
            embedder,
            generator,
            store,
            config,
        }
    }

    pub async fn chat(&self, owner: &OwnerId, message: &str) -> Result<ChatAnswer, PipelineError> {
        let vector = self.embedder.embed(message).await?;
        let sources = self
            .store
            .similarity_search(
                owner,
                &SimilarityQuery {
                    vector,
                    floor: self.config.similarity_floor,
                    top_k: self.config.chat_context_k,
                    types: Vec::new(),
                },
            )
            .await?;

        if sources.is_empty() {
            debug!(owner = %owner, "chat has no context, refusing");
            return Ok(ChatAnswer {
                answer: NO_MEMORY_ANSWER.to_string(),
                sources,
            });
        }

        let answer = self
            .generator
            .generate(&chat_prompt(&sources, message))
            .await?;
        Ok(ChatAnswer {
            answer: answer.trim().to_string(),
            sources,
        })
    }

    pub async fn rewrite(&self, text: &str) -> Result<String, PipelineError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(String::new());
        }

        let answer = self.generator.generate(&rewrite_prompt(text)).await?;
        Ok(answer.trim().to_string())
    }
}

fn context_block(sources: &[RankedNote]) -> String {
    sources
        .iter()
        .map(|source| {
            let note = &source.note;
            let title = note.title.as_deref().unwrap_or("Untitled");
            let summary = note
                .summary
                .clone()
                .unwrap_or_else(|| derive_summary(&note.content));
            format!("[{}] {}: {}", note.created_at.to_rfc3339(), title, summary)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn chat_prompt(sources: &[RankedNote], message: &str) -> String {
    format!(
        r#"You are the user's Second Brain. Answer their question based ONLY on the context provided below.
If the answer isn't in the context, say "{NO_MEMORY_ANSWER}"

Keep the tone conversational, helpful, and concise.
Refer to the notes as "your notes" or "you wrote".

---
Context from memory:
{}
---

User question: {}"#,
        context_block(sources),
        message.trim()
    )
}

fn rewrite_prompt(text: &str) -> String {
    format!(
        r#"You are a helpful writing assistant.
Rephrase the following text to be clearer and more concise, while preserving the original meaning and tone.
Do not add any conversational filler like "Here is the rewritten text". Just give me the text.

Text:
{text}"#
    )
}
