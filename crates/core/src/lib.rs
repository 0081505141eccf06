pub mod assistant;
pub mod embeddings;
pub mod enrichment;
pub mod error;
pub mod graph;
pub mod ingest;
pub mod models;
pub mod providers;
pub mod retrieval;
pub mod stores;
pub mod tags;
pub mod traits;

pub use assistant::{Assistant, ChatAnswer, NO_MEMORY_ANSWER};
pub use embeddings::{CharacterNgramEmbedder, Embedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use enrichment::{
    decode_enrichment, Enricher, EnrichmentDecode, LlmEnricher, LocalEnricher, MAX_TAGS,
};
pub use error::{CapabilityError, PipelineError, StoreError};
pub use graph::{
    build_graph, cosine_similarity, BrainGraph, GraphEdge, GraphEdgeStrategy, GraphNode,
    DEFAULT_EDGE_THRESHOLD,
};
pub use ingest::IngestionService;
pub use models::{
    Enrichment, NewNote, Note, NoteDraft, NoteType, OwnerId, PipelineConfig, RankedNote,
    SearchFilters, SearchRequest, SimilarityQuery, SortOrder, TagCount,
};
pub use providers::GeminiClient;
pub use retrieval::RetrievalService;
pub use stores::{InMemoryNoteStore, SupabaseStore, SCHEMA_SQL};
pub use traits::{Generator, NoteStore};
