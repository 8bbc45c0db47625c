use crate::error::{ChunkerError, Result};
use serde::{Deserialize, Serialize};

/// Word budgets for sentence chunking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Word budget per chunk. An oversized sentence, or the carried overlap plus the
    /// next sentence, can push a chunk past it
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Word budget for the sentences carried over into the next chunk
    #[serde(default = "default_overlap")]
    pub overlap: usize,

    /// Chunks (and whole documents) shorter than this are dropped
    #[serde(default = "default_min_chunk_words")]
    pub min_chunk_words: usize,
}

const fn default_chunk_size() -> usize {
    240
}

const fn default_overlap() -> usize {
    40
}

const fn default_min_chunk_words() -> usize {
    10
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
            min_chunk_words: default_min_chunk_words(),
        }
    }
}

impl ChunkerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(ChunkerError::invalid_config("chunk_size must be > 0"));
        }
        if self.overlap >= self.chunk_size {
            return Err(ChunkerError::invalid_config(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                self.overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}
