use crate::Note;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const DEFAULT_EDGE_THRESHOLD: f32 = 0.5;

/// Cosine of the angle between two vectors.
///
/// Zero when either vector has zero magnitude or the lengths differ, so
/// notes embedded in different spaces never look related.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// How two notes get connected. One strategy per graph.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum GraphEdgeStrategy {
    /// Edge when the notes share at least one tag.
    TagOverlap,
    /// Edge when embedding similarity is strictly above `threshold`.
    EmbeddingSimilarity { threshold: f32 },
}

impl Default for GraphEdgeStrategy {
    fn default() -> Self {
        Self::EmbeddingSimilarity {
            threshold: DEFAULT_EDGE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphNode {
    pub id: String,
    pub title: String,
    pub tags: Vec<String>,
    pub group: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub weight: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BrainGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// Builds the view graph for the loaded note set. Quadratic in the number
/// of notes; rebuild whenever the set changes.
pub fn build_graph(notes: &[Note], strategy: GraphEdgeStrategy) -> BrainGraph {
    let nodes = notes.iter().map(graph_node).collect();
    let mut edges = Vec::new();

    for (i, left) in notes.iter().enumerate() {
        for right in &notes[i + 1..] {
            if let Some(weight) = edge_weight(left, right, strategy) {
                edges.push(GraphEdge {
                    source: left.id.clone(),
                    target: right.id.clone(),
                    weight,
                });
            }
        }
    }

    BrainGraph { nodes, edges }
}

fn graph_node(note: &Note) -> GraphNode {
    let title = note
        .title
        .as_deref()
        .map(str::trim)
        .filter(|title| !title.is_empty())
        .unwrap_or("Untitled")
        .to_string();
    let group = note.tags.first().cloned().unwrap_or_else(|| title.clone());

    GraphNode {
        id: note.id.clone(),
        title,
        tags: note.tags.clone(),
        group,
    }
}

fn edge_weight(left: &Note, right: &Note, strategy: GraphEdgeStrategy) -> Option<f32> {
    match strategy {
        GraphEdgeStrategy::TagOverlap => {
            let left_tags: HashSet<&str> = left.tags.iter().map(String::as_str).collect();
            let shared = right
                .tags
                .iter()
                .map(String::as_str)
                .collect::<HashSet<_>>()
                .intersection(&left_tags)
                .count();
            (shared > 0).then_some(shared as f32)
        }
        GraphEdgeStrategy::EmbeddingSimilarity { threshold } => {
            let (Some(a), Some(b)) = (left.embedding.as_deref(), right.embedding.as_deref()) else {
                return None;
            };
            let similarity = cosine_similarity(a, b);
            (similarity > threshold).then_some(similarity)
        }
    }
}
