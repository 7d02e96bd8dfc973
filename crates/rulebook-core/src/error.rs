use thiserror::Error;

use crate::types::CorpusId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Indexing failed: {0}")]
    Indexing(String),

    #[error("Unknown corpus: {0}")]
    UnknownCorpus(CorpusId),

    #[error("Embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Batch embedding unavailable: {0}")]
    BatchUnavailable(String),

    #[error("Corrupt cache entry: {0}")]
    CacheCorruption(String),

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True when no relevance ranking could be produced because query vectors
    /// were unavailable.
    pub fn is_embedding_unavailable(&self) -> bool {
        matches!(self, Self::EmbeddingUnavailable(_) | Self::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
