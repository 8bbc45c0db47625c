use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexerError>;

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Writing the manifest or the vector index failed; fatal to the caller
    #[error("Failed to persist {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Vector store error: {0}")]
    VectorStore(#[from] docindex_vector_store::VectorStoreError),

    #[error("Chunker error: {0}")]
    Chunker(#[from] docindex_chunker::ChunkerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    pub fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }
}

/// Failure to turn a file into text
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("No reader registered for {}", .0.display())]
    UnsupportedType(PathBuf),

    #[error("Failed to read {}: {reason}", path.display())]
    ReadFailure { path: PathBuf, reason: String },
}

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Embedder unavailable: {0}")]
    Unavailable(String),

    #[error("Embedder returned {actual} vectors for {expected} inputs")]
    CountMismatch { expected: usize, actual: usize },

    #[error("Encoding failed: {0}")]
    Encode(String),
}
