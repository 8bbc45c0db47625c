use chrono::{DateTime, Utc};
use docindex_chunker::{SectionKind, TextChunk};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Metadata stored alongside each vector, in insertion order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMetadata {
    pub text: String,
    pub filename: String,
    pub filepath: String,
    pub chunk_index: usize,
    #[serde(default)]
    pub section: SectionKind,
    pub indexed_at: DateTime<Utc>,
}

impl VectorMetadata {
    pub fn from_chunk(chunk: &TextChunk, indexed_at: DateTime<Utc>) -> Self {
        let filename = Path::new(&chunk.file_path)
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| chunk.file_path.clone());
        Self {
            text: chunk.content.clone(),
            filename,
            filepath: chunk.file_path.clone(),
            chunk_index: chunk.chunk_index,
            section: chunk.section,
            indexed_at,
        }
    }
}

/// A scored hit from [`crate::VectorIndex::search`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    /// Insertion position of the vector, its identity inside the index
    pub position: usize,
    pub score: f32,
    #[serde(flatten)]
    pub metadata: VectorMetadata,
}
