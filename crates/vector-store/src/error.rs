use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, VectorStoreError>;

#[derive(Error, Debug)]
pub enum VectorStoreError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Shape error: {0}")]
    ShapeError(#[from] ndarray::ShapeError),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embeddings and metadata length mismatch: {vectors} vectors, {metadata} metadata entries")]
    LengthMismatch { vectors: usize, metadata: usize },

    #[error("Embedding dimension must be positive")]
    InvalidDimension,

    #[error("Embedding contains non-finite values")]
    NonFiniteVector,

    #[error("Invalid vector file: {0}")]
    InvalidFormat(String),

    #[error("Vector index not found at {}", .0.display())]
    NotFound(PathBuf),

    /// One half of the vector/metadata pair is missing or the halves disagree
    #[error("Corrupt vector index at {}: {reason}", base.display())]
    CorruptIndex { base: PathBuf, reason: String },
}

impl VectorStoreError {
    pub const fn is_corrupt(&self) -> bool {
        matches!(self, Self::CorruptIndex { .. } | Self::InvalidFormat(_))
    }
}
