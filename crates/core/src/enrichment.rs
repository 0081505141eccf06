use crate::tags::{dedupe, extract_hashtags, normalize_tag, normalize_tag_list};
use crate::traits::Generator;
use crate::{CapabilityError, Enrichment};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub const MAX_TAGS: usize = 5;
pub const DEFAULT_ENRICHMENT_MAX_CHARS: usize = 4_000;
const TITLE_MAX_CHARS: usize = 80;
const SUMMARY_MAX_CHARS: usize = 280;

#[async_trait]
pub trait Enricher: Send + Sync {
    async fn enrich(
        &self,
        content: &str,
        author_hint: Option<&str>,
    ) -> Result<Enrichment, CapabilityError>;
}

#[async_trait]
impl<T: Enricher + ?Sized> Enricher for Arc<T> {
    async fn enrich(
        &self,
        content: &str,
        author_hint: Option<&str>,
    ) -> Result<Enrichment, CapabilityError> {
        (**self).enrich(content, author_hint).await
    }
}

/// Outcome of decoding generator output against the enrichment contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrichmentDecode {
    Success(Enrichment),
    Malformed(String),
}

/// Strips code fences and commentary, then parses and shape-checks the
/// `{title, summary, tags}` object.
pub fn decode_enrichment(raw: &str) -> EnrichmentDecode {
    let malformed = || EnrichmentDecode::Malformed(raw.to_string());

    let unfenced = raw.replace("```json", "").replace("```", "");
    let (Some(start), Some(end)) = (unfenced.find('{'), unfenced.rfind('}')) else {
        return malformed();
    };
    if end < start {
        return malformed();
    }

    let Ok(Value::Object(object)) = serde_json::from_str::<Value>(&unfenced[start..=end]) else {
        return malformed();
    };

    let text_field = |name: &str| {
        object
            .get(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };

    let (Some(title), Some(summary)) = (text_field("title"), text_field("summary")) else {
        return malformed();
    };

    let tags = match object.get("tags") {
        Some(value @ (Value::Array(_) | Value::String(_))) => normalize_tag_list(value),
        _ => return malformed(),
    };

    EnrichmentDecode::Success(Enrichment {
        title,
        summary,
        tags: tags.into_iter().take(MAX_TAGS).collect(),
    })
}

/// Longest prefix of `text` holding at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

pub fn enrichment_prompt(content: &str, author_hint: Option<&str>, max_chars: usize) -> String {
    let voice = match author_hint.map(str::trim).filter(|hint| !hint.is_empty()) {
        Some(author) => format!(
            "The note was written by {author}. Phrase the summary as their own first-person \
             recollection (for example \"I learned...\")."
        ),
        None => "Phrase the summary in a neutral third person.".to_string(),
    };

    format!(
        r#"Analyze the following note content.
1. Create a concise 1-sentence summary. {voice}
2. Extract 2-5 relevant tags (short keywords, no '#').
3. Create a short title.

Return ONLY a JSON object:
{{"title": "A short title", "summary": "The summary text...", "tags": ["tag1", "tag2"]}}

Note content:
"{}""#,
        truncate_chars(content, max_chars)
    )
}

/// Enrichment through any generative capability.
pub struct LlmEnricher<G> {
    generator: G,
    max_chars: usize,
}

impl<G: Generator> LlmEnricher<G> {
    pub fn new(generator: G) -> Self {
        Self {
            generator,
            max_chars: DEFAULT_ENRICHMENT_MAX_CHARS,
        }
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars.max(1);
        self
    }
}

#[async_trait]
impl<G: Generator> Enricher for LlmEnricher<G> {
    async fn enrich(
        &self,
        content: &str,
        author_hint: Option<&str>,
    ) -> Result<Enrichment, CapabilityError> {
        let prompt = enrichment_prompt(content, author_hint, self.max_chars);
        let raw = self.generator.generate(&prompt).await?;

        match decode_enrichment(&raw) {
            EnrichmentDecode::Success(enrichment) => Ok(enrichment),
            EnrichmentDecode::Malformed(text) => Err(CapabilityError::MalformedOutput(format!(
                "enrichment is not a valid JSON object: {}",
                truncate_chars(&text, 200)
            ))),
        }
    }
}

/// First non-empty line, capped for display.
pub fn derive_title(content: &str) -> String {
    let line = content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default();
    let title = truncate_chars(line, TITLE_MAX_CHARS);
    if title.len() < line.len() {
        format!("{}...", title.trim_end())
    } else {
        title.to_string()
    }
}

pub fn derive_summary(content: &str) -> String {
    truncate_chars(content.trim(), SUMMARY_MAX_CHARS).to_string()
}

fn first_sentence(content: &str) -> &str {
    let trimmed = content.trim();
    let mut chars = trimmed.char_indices().peekable();
    while let Some((index, ch)) = chars.next() {
        let at_boundary = chars.peek().map_or(true, |(_, next)| next.is_whitespace());
        if matches!(ch, '.' | '!' | '?') && at_boundary {
            return &trimmed[..index + ch.len_utf8()];
        }
    }
    trimmed
}

const STOPWORDS: [&str; 40] = [
    "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "her", "was",
    "one", "our", "out", "his", "has", "how", "its", "this", "that", "with", "from", "have",
    "were", "what", "when", "your", "about", "there", "their", "which", "would", "into", "just",
    "then", "went", "got", "some",
];

/// Deterministic offline enrichment: first line as title, first sentence
/// as summary, inline hashtags then frequent terms as tags.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalEnricher;

impl LocalEnricher {
    fn keyword_tags(content: &str, wanted: usize) -> Vec<String> {
        let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
        let words = content
            .split(|ch: char| !ch.is_alphanumeric())
            .filter(|word| word.chars().count() >= 3)
            .filter_map(normalize_tag)
            .filter(|word| !STOPWORDS.contains(&word.as_str()));

        for (position, word) in words.enumerate() {
            counts.entry(word).or_insert((0, position)).0 += 1;
        }

        let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
        ranked.sort_by(|(_, (left_count, left_pos)), (_, (right_count, right_pos))| {
            right_count.cmp(left_count).then(left_pos.cmp(right_pos))
        });
        ranked.into_iter().take(wanted).map(|(word, _)| word).collect()
    }
}

#[async_trait]
impl Enricher for LocalEnricher {
    async fn enrich(
        &self,
        content: &str,
        author_hint: Option<&str>,
    ) -> Result<Enrichment, CapabilityError> {
        let sentence = truncate_chars(first_sentence(content), SUMMARY_MAX_CHARS);
        let summary = match author_hint.map(str::trim).filter(|hint| !hint.is_empty()) {
            Some(_) => format!("I noted: {sentence}"),
            None => sentence.to_string(),
        };

        let hashtags = extract_hashtags(content);
        let keywords = Self::keyword_tags(content, MAX_TAGS);
        let tags = dedupe(hashtags.into_iter().chain(keywords))
            .into_iter()
            .take(MAX_TAGS)
            .collect();

        Ok(Enrichment {
            title: derive_title(content),
            summary,
            tags,
        })
    }
}
