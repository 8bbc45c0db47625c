use chrono::{DateTime, Utc};
use serde::Serialize;

/// Snapshot of the indexer for the search layer and the CLI
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub total_files: usize,
    pub total_chunks: usize,
    pub total_size_mb: f64,
    pub vector_count: usize,
    pub last_full_scan: Option<DateTime<Utc>>,
    pub scan_directories: Vec<String>,
}

/// Outcome counts for one batch of files
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    pub files_processed: usize,
    pub chunks_added: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl BatchStats {
    pub fn merge(&mut self, other: Self) {
        self.files_processed += other.files_processed;
        self.chunks_added += other.chunks_added;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct FullScanReport {
    /// Files the scan considered new or changed
    pub candidates: usize,
    #[serde(flatten)]
    pub batch: BatchStats,
    /// Manifest records dropped because their file is gone
    pub deleted: usize,
    pub duration_ms: u64,
    /// Stopped early; deleted-file detection and the completion stamp were skipped
    pub cancelled: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct RebuildReport {
    pub files_indexed: usize,
    pub files_dropped: usize,
    pub vector_count: usize,
    pub duration_ms: u64,
}
