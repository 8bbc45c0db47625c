//! # Document Indexer
//!
//! Keeps a local semantic index in sync with the user's documents.
//!
//! ## Pipeline
//!
//! ```text
//! scan roots
//!     │
//!     ├──> Scanner (ScanPolicy: exclusions, size, images)
//!     │      └─> candidate files ──> Manifest::needs_indexing
//!     │
//!     ├──> ContentReader ──> Chunker
//!     │      └─> text chunks
//!     │
//!     └──> Embedder ──> VectorIndex + Manifest (one commit lock)
//!
//! triggers: DocumentWatcher (debounced), FullScanScheduler, CLI
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use docindex_indexer::{DocumentIndexer, HashingEmbedder, IndexerConfig};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> docindex_indexer::Result<()> {
//!     let config = IndexerConfig::load(Path::new("docindex.toml"));
//!     let indexer = Arc::new(
//!         DocumentIndexer::open(config, Arc::new(HashingEmbedder::default())).await?,
//!     );
//!     let report = indexer.run_full_scan().await?;
//!
//!     println!("Indexed {} files", report.batch.files_processed);
//!     Ok(())
//! }
//! ```

mod config;
mod content;
mod embedder;
mod error;
mod extract;
mod indexer;
mod manifest;
mod policy;
mod scanner;
mod scheduler;
mod stats;
mod watcher;

pub use config::{
    expand_path, ImageConfig, IndexerConfig, PerformanceConfig, ScanConfig, ScheduleConfig,
    DEFAULT_CONFIG_FILE, INDEX_BASE_NAME, MANIFEST_FILE, MAX_FULL_SCAN_INTERVAL_HOURS,
};
pub use content::{ContentReader, ContentReaders, DocumentKind, PlainTextReader};
pub use embedder::{Embedder, HashingEmbedder, DEFAULT_HASHING_DIMENSION};
pub use error::{EmbeddingError, ExtractionError, IndexerError, Result};
pub use extract::{DocxReader, PdfReader, XlsxReader};
pub use indexer::{DocumentIndexer, FailureStage, FileOutcome};
pub use manifest::{compute_file_hash, path_key, FileRecord, Manifest, ManifestStats};
pub use policy::{ScanPolicy, DEFAULT_EXCLUDED_DIRECTORIES, DEFAULT_EXCLUDED_FILE_PATTERNS};
pub use scanner::{Scan, ScanStats, ScannedFile, Scanner};
pub use scheduler::{next_scan_time, FullScanScheduler, FullScanTarget, FIRST_SCAN_DELAY_MINUTES};
pub use stats::{BatchStats, FullScanReport, IndexStats, RebuildReport};
pub use watcher::{ChangeSink, DocumentWatcher, WatcherConfig};
