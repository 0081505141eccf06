use thiserror::Error;

/// Failures of the embedding and generative-text capabilities.
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("malformed capability output: {0}")]
    MalformedOutput(String),

    #[error("capability unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store request failed: {0}")]
    Request(String),
}

/// Error surfaced by the orchestrating services.
///
/// Leaf failures keep their kind: a store failure is never turned into an
/// empty result, and only enrichment failures are recovered during ingestion.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("no authenticated owner")]
    Unauthorized,

    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
