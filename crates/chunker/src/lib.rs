//! # Document Chunker
//!
//! Sentence-aware text chunking for embedding.
//!
//! ```text
//! text ──> sentences ──> greedy word-budget windows ──> chunks
//!                              ▲                │
//!                              └── overlap tail ┘
//! ```
//!
//! Chunks are built from whole sentences only. When a window is emitted, the
//! next one is seeded with the trailing sentences of the previous window so
//! neighbouring chunks share context.
//!
//! ## Example
//!
//! ```
//! use docindex_chunker::{Chunker, ChunkerConfig};
//!
//! let chunker = Chunker::new(ChunkerConfig::default());
//! let chunks = chunker.chunk_document(
//!     "Indexing keeps the store fresh. It only touches changed files and skips the rest.",
//!     "/docs/notes.txt",
//! );
//! assert!(chunks.len() <= 1);
//! ```

mod chunker;
mod config;
mod error;
mod section;

pub use chunker::{chunk_text, split_sentences, word_count, Chunker, TextChunk};
pub use config::ChunkerConfig;
pub use error::{ChunkerError, Result};
pub use section::SectionKind;
