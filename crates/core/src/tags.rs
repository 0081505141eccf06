use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::OnceLock;

const HASHTAG_PATTERN: &str = r"(?:^|\s)#([\p{L}\p{N}][\p{L}\p{N}_-]*)";

/// Canonical form of a tag: trimmed, no leading `#`, lower-cased.
pub fn normalize_tag(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_start_matches('#').trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

/// Flattens whatever a store or a model handed back as tags into a list.
///
/// Accepts a JSON array of strings, a comma-delimited string, or null.
/// Order of first appearance is kept and duplicates are dropped.
pub fn normalize_tag_list(raw: &Value) -> Vec<String> {
    let pieces: Vec<String> = match raw {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .flat_map(split_delimited)
            .collect(),
        Value::String(text) => split_delimited(text),
        _ => Vec::new(),
    };
    dedupe(pieces)
}

fn split_delimited(text: &str) -> Vec<String> {
    text.split(',').filter_map(normalize_tag).collect()
}

pub fn dedupe(tags: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.into_iter()
        .filter(|tag| seen.insert(tag.clone()))
        .collect()
}

/// Inline `#hashtags` of free text, normalized and de-duplicated.
pub fn extract_hashtags(text: &str) -> Vec<String> {
    static HASHTAG: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(pattern) = HASHTAG.get_or_init(|| Regex::new(HASHTAG_PATTERN).ok()) else {
        return Vec::new();
    };

    dedupe(
        pattern
            .captures_iter(text)
            .filter_map(|captures| captures.get(1))
            .filter_map(|found| normalize_tag(found.as_str())),
    )
}

/// OR semantics: true when any wanted tag is carried by the note.
/// An empty wanted set matches everything.
pub fn matches_any_tag(note_tags: &[String], wanted: &[String]) -> bool {
    if wanted.is_empty() {
        return true;
    }
    wanted.iter().filter_map(|tag| normalize_tag(tag)).any(|wanted| {
        note_tags
            .iter()
            .filter_map(|tag| normalize_tag(tag))
            .any(|carried| carried == wanted)
    })
}
