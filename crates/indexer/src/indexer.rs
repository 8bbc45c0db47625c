use crate::config::IndexerConfig;
use crate::content::ContentReaders;
use crate::embedder::Embedder;
use crate::error::{EmbeddingError, ExtractionError, IndexerError, Result};
use crate::manifest::{compute_file_hash, needs_indexing_against, path_key, FileRecord, Manifest};
use crate::policy::ScanPolicy;
use crate::scanner::{ScannedFile, Scanner};
use crate::stats::{BatchStats, FullScanReport, IndexStats, RebuildReport};
use chrono::{DateTime, Utc};
use docindex_chunker::{Chunker, TextChunk};
use docindex_vector_store::{SearchHit, VectorIndex, VectorMetadata};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Where a per-file failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Read,
    Embed,
    Record,
}

/// Result of indexing one file. Per-file problems are outcomes, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// Manifest says the content has not changed
    Unchanged,
    /// Another task is indexing the same path right now
    InProgress,
    Missing,
    /// Too few words to be worth indexing; not recorded
    Empty,
    NoChunks,
    Failed { stage: FailureStage, reason: String },
    Indexed { chunks: usize },
}

struct IndexState {
    manifest: Manifest,
    index: VectorIndex,
}

/// Read, hashed, chunked and embedded; ready for the commit phase
struct PreparedFile {
    hash: String,
    chunks: Vec<TextChunk>,
    vectors: Vec<Vec<f32>>,
}

enum Prepared {
    Ready(PreparedFile),
    Skipped(FileOutcome),
}

/// Orchestrates scanning, chunking, embedding and persistence.
///
/// Read, chunk and embed run concurrently across files. The commit phase
/// (index append, index save, manifest mark, manifest save) runs under a
/// single lock, which is the only serialization point for mutation.
pub struct DocumentIndexer {
    config: IndexerConfig,
    scanner: Scanner,
    chunker: Chunker,
    readers: Arc<ContentReaders>,
    embedder: Arc<dyn Embedder>,
    index_base: PathBuf,
    state: Mutex<IndexState>,
    in_flight: std::sync::Mutex<HashSet<String>>,
}

impl DocumentIndexer {
    /// Open the data directory with the default text and office readers
    pub async fn open(config: IndexerConfig, embedder: Arc<dyn Embedder>) -> Result<Self> {
        Self::open_with(config, ContentReaders::default(), embedder).await
    }

    /// A corrupt or incompatible index on disk is an error
    pub async fn open_with(
        config: IndexerConfig,
        readers: ContentReaders,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        Self::open_inner(config, readers, embedder, false).await
    }

    /// Like [`Self::open_with`], but starts from an empty index when the one
    /// on disk is corrupt or was built with another embedder. Meant to be
    /// followed by [`Self::rebuild`].
    pub async fn open_for_rebuild(
        config: IndexerConfig,
        readers: ContentReaders,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        Self::open_inner(config, readers, embedder, true).await
    }

    async fn open_inner(
        config: IndexerConfig,
        readers: ContentReaders,
        embedder: Arc<dyn Embedder>,
        tolerate_bad_index: bool,
    ) -> Result<Self> {
        config.validate()?;
        let policy = Arc::new(ScanPolicy::from_config(&config)?);
        let scanner = Scanner::new(policy, &readers);
        let chunker = Chunker::try_new(config.chunking.clone())?;

        tokio::fs::create_dir_all(&config.data_dir)
            .await
            .map_err(|e| IndexerError::persistence(&config.data_dir, e))?;

        let manifest = Manifest::load(config.manifest_path()).await?;
        let index_base = config.index_base();

        let mut index = match VectorIndex::load_if_exists(&index_base).await {
            Ok(Some(index)) => {
                log::info!("Loaded existing index ({} vectors)", index.len());
                index
            }
            Ok(None) => {
                log::info!("No existing index found, will create on first file");
                VectorIndex::new()
            }
            Err(err) if tolerate_bad_index && err.is_corrupt() => {
                log::warn!("Ignoring unreadable index: {err}");
                VectorIndex::new()
            }
            Err(err) => return Err(err.into()),
        };

        if let Some(dim) = index.dimension() {
            if dim != embedder.dimension() {
                if !tolerate_bad_index {
                    return Err(IndexerError::Config(format!(
                        "index dimension {dim} does not match embedder dimension {}; rebuild the index",
                        embedder.dimension()
                    )));
                }
                log::warn!("Index dimension {dim} differs from embedder, starting empty");
                index = VectorIndex::new();
            }
        }

        Ok(Self {
            config,
            scanner,
            chunker,
            readers: Arc::new(readers),
            embedder,
            index_base,
            state: Mutex::new(IndexState { manifest, index }),
            in_flight: std::sync::Mutex::new(HashSet::new()),
        })
    }

    pub const fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub const fn scanner(&self) -> &Scanner {
        &self.scanner
    }

    pub fn index_base(&self) -> &Path {
        &self.index_base
    }

    pub async fn last_full_scan(&self) -> Option<DateTime<Utc>> {
        self.state.lock().await.manifest.last_full_scan()
    }

    pub async fn vector_count(&self) -> usize {
        self.state.lock().await.index.len()
    }

    /// Index one file unless the manifest says it is unchanged.
    ///
    /// Only persistence and index failures are `Err`; everything that goes
    /// wrong with the file itself is reported as a [`FileOutcome`].
    pub async fn index_file(&self, path: &Path, force: bool) -> Result<FileOutcome> {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, path) else {
            log::debug!("Already indexing {}", path.display());
            return Ok(FileOutcome::InProgress);
        };

        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Ok(FileOutcome::Missing);
        }

        if !force {
            let record = self.state.lock().await.manifest.record(path).cloned();
            if !self.needs_indexing(record, path).await? {
                return Ok(FileOutcome::Unchanged);
            }
        }

        log::info!("Indexing: {}", path.display());
        let prepared = match self.prepare(path).await? {
            Prepared::Ready(prepared) => prepared,
            Prepared::Skipped(outcome) => return Ok(outcome),
        };
        self.commit(path, prepared).await
    }

    /// Index `files` on a bounded worker pool, pausing between submissions.
    ///
    /// Per-file failures are counted and skipped. The first persistence error
    /// stops new submissions; running tasks are drained and the error returned.
    pub async fn index_batch(self: &Arc<Self>, files: Vec<PathBuf>) -> Result<BatchStats> {
        self.index_batch_until(files, &CancellationToken::new()).await
    }

    /// [`Self::index_batch`] that stops submitting files once `cancel` fires.
    ///
    /// Files already handed to a worker run to completion, so a commit is
    /// never cut in half.
    pub async fn index_batch_until(
        self: &Arc<Self>,
        files: Vec<PathBuf>,
        cancel: &CancellationToken,
    ) -> Result<BatchStats> {
        let workers = self.config.performance.parallel_workers.max(1);
        let pause = self.config.performance.batch_pause();
        let semaphore = Arc::new(Semaphore::new(workers));
        let aborted = Arc::new(AtomicBool::new(false));
        let mut tasks = JoinSet::new();

        for (i, path) in files.into_iter().enumerate() {
            if i > 0 && !pause.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(pause) => {}
                }
            }
            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => permit
                    .map_err(|e| IndexerError::Other(format!("Semaphore error: {e}")))?,
            };
            if aborted.load(Ordering::SeqCst) || cancel.is_cancelled() {
                break;
            }

            let this = Arc::clone(self);
            let aborted = aborted.clone();
            tasks.spawn(async move {
                let outcome = this.index_file(&path, false).await;
                if outcome.is_err() {
                    aborted.store(true, Ordering::SeqCst);
                }
                drop(permit);
                (path, outcome)
            });
        }

        let mut stats = BatchStats::default();
        let mut fatal = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(FileOutcome::Indexed { chunks }))) => {
                    stats.files_processed += 1;
                    stats.chunks_added += chunks;
                }
                Ok((path, Ok(FileOutcome::Failed { stage, reason }))) => {
                    log::warn!("Failed to index {} ({stage:?}): {reason}", path.display());
                    stats.failed += 1;
                }
                Ok((_, Ok(_))) => stats.skipped += 1,
                Ok((path, Err(err))) => {
                    log::error!("Indexing {} aborted the batch: {err}", path.display());
                    fatal.get_or_insert(err);
                }
                Err(err) => {
                    log::warn!("Task join error: {err}");
                    stats.failed += 1;
                }
            }
        }

        match fatal {
            Some(err) => Err(err),
            None => Ok(stats),
        }
    }

    /// Candidates the manifest considers new or changed
    pub async fn scan_for_changes(&self) -> Result<Vec<ScannedFile>> {
        let (candidates, _) = self.collect_candidates().await?;
        Ok(candidates)
    }

    /// Differential pass over every scan root, then deleted-file detection
    pub async fn run_full_scan(self: &Arc<Self>) -> Result<FullScanReport> {
        self.run_full_scan_until(&CancellationToken::new()).await
    }

    /// [`Self::run_full_scan`] that stops between files once `cancel` fires.
    ///
    /// An interrupted scan neither marks deleted files nor records a
    /// completion time, so the next scan starts from the same state.
    pub async fn run_full_scan_until(
        self: &Arc<Self>,
        cancel: &CancellationToken,
    ) -> Result<FullScanReport> {
        let start = Instant::now();
        log::info!("Starting full scan");

        let (candidates, current) = self.collect_candidates().await?;
        let mut report = FullScanReport {
            candidates: candidates.len(),
            ..FullScanReport::default()
        };

        if candidates.is_empty() {
            log::info!("All files are up to date");
        } else {
            log::info!("Found {} files to index", candidates.len());
            let batch_size = self.config.performance.batch_size.max(1);
            let batches = candidates.len().div_ceil(batch_size);
            let paths: Vec<PathBuf> = candidates.into_iter().map(|f| f.path).collect();
            for (n, batch) in paths.chunks(batch_size).enumerate() {
                if cancel.is_cancelled() {
                    break;
                }
                log::info!("Processing batch {}/{batches}", n + 1);
                let stats = self.index_batch_until(batch.to_vec(), cancel).await?;
                report.batch.merge(stats);
            }
        }

        if cancel.is_cancelled() {
            report.cancelled = true;
            report.duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
            log::info!(
                "Full scan stopped early: {} files processed",
                report.batch.files_processed
            );
            return Ok(report);
        }

        {
            let mut state = self.state.lock().await;
            let deleted = state.manifest.find_deleted_files(&current);
            if !deleted.is_empty() {
                log::info!("Marking {} deleted files", deleted.len());
                for key in &deleted {
                    state.manifest.mark_deleted(Path::new(key));
                }
            }
            report.deleted = deleted.len();
            state.manifest.mark_full_scan_complete();
            state.manifest.save().await?;
        }

        report.duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        log::info!(
            "Full scan complete: {} files processed, {} chunks added, {} failed, {} deleted",
            report.batch.files_processed,
            report.batch.chunks_added,
            report.batch.failed,
            report.deleted
        );
        Ok(report)
    }

    /// Drop the manifest record for a deleted file.
    ///
    /// Its vectors stay in the index until [`Self::rebuild`].
    pub async fn remove_file(&self, path: &Path) -> Result<bool> {
        let mut state = self.state.lock().await;
        let removed = state.manifest.mark_deleted(path);
        if removed {
            log::info!("Removing from index: {}", path.display());
            state.manifest.save().await?;
        }
        Ok(removed)
    }

    /// Build a fresh index from the files the manifest still tracks.
    ///
    /// Holds the commit lock for the whole run. Files that can no longer be
    /// read or embedded are dropped from the manifest.
    pub async fn rebuild(&self) -> Result<RebuildReport> {
        let start = Instant::now();
        let mut state = self.state.lock().await;
        let paths: Vec<PathBuf> = state.manifest.indexed_paths().map(PathBuf::from).collect();
        log::info!("Rebuilding index from {} files", paths.len());

        let mut fresh = VectorIndex::new();
        let mut survivors = HashSet::new();
        for path in &paths {
            let prepared = match self.prepare(path).await? {
                Prepared::Ready(prepared) => prepared,
                Prepared::Skipped(outcome) => {
                    log::warn!("Dropping {} from the index: {outcome:?}", path.display());
                    continue;
                }
            };
            let chunk_count = prepared.chunks.len();
            fresh.add(&prepared.vectors, metadata_for(&prepared.chunks))?;
            match state.manifest.mark_indexed(path, chunk_count, Some(prepared.hash)) {
                Ok(()) => {
                    survivors.insert(path_key(path));
                }
                Err(err) => log::warn!("Dropping {}: {err}", path.display()),
            }
        }

        state.manifest.retain(|key, _| survivors.contains(key));
        fresh.save(&self.index_base).await?;
        state.index = fresh;
        state.manifest.save().await?;

        let report = RebuildReport {
            files_indexed: survivors.len(),
            files_dropped: paths.len() - survivors.len(),
            vector_count: state.index.len(),
            duration_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        log::info!(
            "Rebuild complete: {} files, {} vectors",
            report.files_indexed,
            report.vector_count
        );
        Ok(report)
    }

    pub async fn stats(&self) -> IndexStats {
        let state = self.state.lock().await;
        let manifest = state.manifest.stats();
        IndexStats {
            total_files: manifest.total_files,
            total_chunks: manifest.total_chunks,
            total_size_mb: manifest.total_size_mb,
            vector_count: state.index.len(),
            last_full_scan: manifest.last_full_scan,
            scan_directories: self
                .scanner
                .policy()
                .scan_directories()
                .iter()
                .map(|dir| dir.display().to_string())
                .collect(),
        }
    }

    /// Embed `query` and return the `k` closest chunks
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        let vectors = self.embedder.embed(&[query.to_string()]).await?;
        let query = vectors.into_iter().next().ok_or(EmbeddingError::CountMismatch {
            expected: 1,
            actual: 0,
        })?;
        let state = self.state.lock().await;
        Ok(state.index.search(&query, k)?)
    }

    async fn needs_indexing(&self, record: Option<FileRecord>, path: &Path) -> Result<bool> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || needs_indexing_against(record.as_ref(), &path))
            .await
            .map_err(|e| IndexerError::Other(format!("change check failed: {e}")))
    }

    async fn collect_candidates(&self) -> Result<(Vec<ScannedFile>, HashSet<String>)> {
        let scanner = self.scanner.clone();
        let files = tokio::task::spawn_blocking(move || scanner.scan().collect::<Vec<_>>())
            .await
            .map_err(|e| IndexerError::Other(format!("scan failed: {e}")))?;
        let current: HashSet<String> = files.iter().map(|f| path_key(&f.path)).collect();

        let records: Vec<Option<FileRecord>> = {
            let state = self.state.lock().await;
            files
                .iter()
                .map(|f| state.manifest.record(&f.path).cloned())
                .collect()
        };

        let candidates = tokio::task::spawn_blocking(move || {
            files
                .into_iter()
                .zip(records)
                .filter(|(file, record)| needs_indexing_against(record.as_ref(), &file.path))
                .map(|(file, _)| file)
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| IndexerError::Other(format!("change check failed: {e}")))?;

        Ok((candidates, current))
    }

    /// Read, chunk and embed outside the commit lock
    async fn prepare(&self, path: &Path) -> Result<Prepared> {
        let readers = self.readers.clone();
        let owned = path.to_path_buf();
        let read = tokio::task::spawn_blocking(move || {
            let hash = compute_file_hash(&owned).map_err(|e| ExtractionError::ReadFailure {
                path: owned.clone(),
                reason: e.to_string(),
            })?;
            let text = readers.read(&owned)?;
            Ok::<_, ExtractionError>((hash, text))
        })
        .await;

        let (hash, text) = match read {
            Ok(Ok(read)) => read,
            Ok(Err(err)) => return Ok(failed(path, FailureStage::Read, err)),
            Err(err) => return Ok(failed(path, FailureStage::Read, err)),
        };

        if !self.chunker.has_enough_words(&text) {
            log::debug!("No content extracted from {}", path.display());
            return Ok(Prepared::Skipped(FileOutcome::Empty));
        }

        let chunks = self.chunker.chunk_document(&text, &path_key(path));
        if chunks.is_empty() {
            log::debug!("No chunks produced from {}", path.display());
            return Ok(Prepared::Skipped(FileOutcome::NoChunks));
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = match self.embedder.embed(&texts).await {
            Ok(vectors) if vectors.len() == texts.len() => vectors,
            Ok(vectors) => {
                let err = EmbeddingError::CountMismatch {
                    expected: texts.len(),
                    actual: vectors.len(),
                };
                return Ok(failed(path, FailureStage::Embed, err));
            }
            Err(err) => return Ok(failed(path, FailureStage::Embed, err)),
        };

        Ok(Prepared::Ready(PreparedFile {
            hash,
            chunks,
            vectors,
        }))
    }

    async fn commit(&self, path: &Path, prepared: PreparedFile) -> Result<FileOutcome> {
        let chunk_count = prepared.chunks.len();
        let metadata = metadata_for(&prepared.chunks);

        let mut state = self.state.lock().await;
        let before = state.index.len();
        state.index.add(&prepared.vectors, metadata)?;
        if let Err(err) = state.index.save(&self.index_base).await {
            state.index.truncate(before);
            return Err(err.into());
        }

        if let Err(err) = state.manifest.mark_indexed(path, chunk_count, Some(prepared.hash)) {
            log::warn!("Indexed {} but could not record it: {err}", path.display());
            return Ok(FileOutcome::Failed {
                stage: FailureStage::Record,
                reason: err.to_string(),
            });
        }
        state.manifest.save().await?;

        log::info!("Added {chunk_count} chunks from {}", path.display());
        Ok(FileOutcome::Indexed {
            chunks: chunk_count,
        })
    }
}

fn metadata_for(chunks: &[TextChunk]) -> Vec<VectorMetadata> {
    let indexed_at = Utc::now();
    chunks
        .iter()
        .map(|chunk| VectorMetadata::from_chunk(chunk, indexed_at))
        .collect()
}

fn failed(path: &Path, stage: FailureStage, err: impl std::fmt::Display) -> Prepared {
    log::warn!("Failed to index {} ({stage:?}): {err}", path.display());
    Prepared::Skipped(FileOutcome::Failed {
        stage,
        reason: err.to_string(),
    })
}

/// Marks a path as being indexed for as long as it lives
struct InFlightGuard<'a> {
    set: &'a std::sync::Mutex<HashSet<String>>,
    key: String,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(set: &'a std::sync::Mutex<HashSet<String>>, path: &Path) -> Option<Self> {
        let key = path_key(path);
        let inserted = set
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(key.clone());
        inserted.then_some(Self { set, key })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::HashingEmbedder;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    fn prose(words: usize, seed: &str) -> String {
        (0..words)
            .map(|i| {
                if i % 12 == 11 {
                    format!("{seed}{i}.")
                } else {
                    format!("{seed}{i}")
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn test_config(root: &Path, data: &Path) -> IndexerConfig {
        let mut config = IndexerConfig::default();
        config.data_dir = data.to_path_buf();
        config.scan.scan_directories = vec![root.to_path_buf()];
        config.scan.excluded_directories = vec!["**/.git".into()];
        config.scan.excluded_file_patterns = vec!["*.bak".into()];
        config.scan.min_file_size_bytes = 1;
        config.performance.batch_pause_seconds = 0.0;
        config.chunking.chunk_size = 60;
        config.chunking.overlap = 12;
        config
    }

    async fn open(config: IndexerConfig, embedder: Arc<dyn Embedder>) -> Arc<DocumentIndexer> {
        Arc::new(DocumentIndexer::open(config, embedder).await.unwrap())
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        fn dimension(&self) -> usize {
            8
        }

        async fn embed(&self, _texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            Err(EmbeddingError::Unavailable("model not loaded".into()))
        }
    }

    struct CountingEmbedder {
        inner: HashingEmbedder,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        fn dimension(&self) -> usize {
            self.inner.dimension()
        }

        async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.embed(texts).await
        }
    }

    #[tokio::test]
    async fn file_states_map_to_outcomes() {
        let root = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let indexer = open(
            test_config(root.path(), data.path()),
            Arc::new(HashingEmbedder::new(32)),
        )
        .await;

        let doc = root.path().join("doc.txt");
        std::fs::write(&doc, prose(150, "w")).unwrap();
        let short = root.path().join("short.txt");
        std::fs::write(&short, "too few words here").unwrap();

        let outcome = indexer.index_file(&doc, false).await.unwrap();
        let FileOutcome::Indexed { chunks } = outcome else {
            panic!("unexpected outcome {outcome:?}");
        };
        assert!(chunks >= 2);
        assert_eq!(indexer.vector_count().await, chunks);

        assert_eq!(indexer.index_file(&doc, false).await.unwrap(), FileOutcome::Unchanged);
        assert_eq!(indexer.index_file(&short, false).await.unwrap(), FileOutcome::Empty);
        assert_eq!(
            indexer.index_file(&root.path().join("nope.txt"), false).await.unwrap(),
            FileOutcome::Missing
        );

        // forced re-index appends a second copy
        indexer.index_file(&doc, true).await.unwrap();
        assert_eq!(indexer.vector_count().await, chunks * 2);

        let stats = indexer.stats().await;
        assert_eq!(stats.total_files, 1);
        assert_eq!(stats.total_chunks, chunks);
    }

    #[tokio::test]
    async fn word_documents_are_indexed_through_the_default_readers() {
        use std::io::Write;

        let root = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let indexer = open(
            test_config(root.path(), data.path()),
            Arc::new(HashingEmbedder::new(32)),
        )
        .await;

        let path = root.path().join("minutes.docx");
        let mut zip = zip::ZipWriter::new(std::fs::File::create(&path).unwrap());
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        let body = format!(
            "<w:document><w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>",
            prose(40, "minute")
        );
        zip.write_all(body.as_bytes()).unwrap();
        zip.finish().unwrap();

        let outcome = indexer.index_file(&path, false).await.unwrap();
        assert!(matches!(outcome, FileOutcome::Indexed { chunks } if chunks >= 1), "{outcome:?}");
        let hits = indexer.search("minute3 minute4", 1).await.unwrap();
        assert_eq!(hits[0].metadata.filename, "minutes.docx");
    }

    #[tokio::test]
    async fn embedding_failure_is_a_skip_and_stays_pending() {
        let root = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let indexer = open(test_config(root.path(), data.path()), Arc::new(FailingEmbedder)).await;

        let doc = root.path().join("doc.md");
        std::fs::write(&doc, prose(40, "m")).unwrap();

        let outcome = indexer.index_file(&doc, false).await.unwrap();
        assert!(matches!(
            outcome,
            FileOutcome::Failed {
                stage: FailureStage::Embed,
                ..
            }
        ));
        assert_eq!(indexer.vector_count().await, 0);
        assert_eq!(indexer.scan_for_changes().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn batch_continues_past_bad_files() {
        let root = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let mut config = test_config(root.path(), data.path());
        config.performance.parallel_workers = 2;
        let indexer = open(config, Arc::new(HashingEmbedder::new(16))).await;

        let mut files = Vec::new();
        for i in 0..5 {
            let path = root.path().join(format!("doc{i}.txt"));
            std::fs::write(&path, prose(30, &format!("d{i}x"))).unwrap();
            files.push(path);
        }
        files.push(root.path().join("vanished.txt"));
        let unsupported = root.path().join("notes.rtf");
        std::fs::write(&unsupported, prose(30, "p")).unwrap();
        files.push(unsupported);

        let stats = indexer.index_batch(files).await.unwrap();
        assert_eq!(stats.files_processed, 5);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(indexer.stats().await.total_files, 5);
    }

    #[tokio::test]
    async fn failed_index_save_rolls_back_the_append() {
        let root = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let config = test_config(root.path(), data.path());
        let indexer = open(config.clone(), Arc::new(HashingEmbedder::new(16))).await;

        let other = root.path().join("other.txt");
        let doc = root.path().join("doc.txt");
        std::fs::write(&other, prose(30, "o")).unwrap();
        std::fs::write(&doc, prose(30, "d")).unwrap();
        indexer.index_file(&other, false).await.unwrap();
        let before = indexer.vector_count().await;

        // a directory in place of the staged metadata file makes the save fail
        let blocker = data.path().join("index.meta.json.tmp");
        std::fs::create_dir(&blocker).unwrap();
        assert!(indexer.index_file(&doc, false).await.is_err());
        assert_eq!(indexer.vector_count().await, before);
        assert_eq!(indexer.stats().await.total_files, 1);

        std::fs::remove_dir(&blocker).unwrap();
        drop(indexer);
        let reopened = open(config, Arc::new(HashingEmbedder::new(16))).await;
        assert_eq!(reopened.vector_count().await, before);

        let outcome = reopened.index_file(&doc, false).await.unwrap();
        let FileOutcome::Indexed { chunks } = outcome else {
            panic!("unexpected outcome {outcome:?}");
        };
        assert_eq!(reopened.vector_count().await, before + chunks);
    }

    #[tokio::test]
    async fn cancelled_scan_stops_without_marking_deletions() {
        let root = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let mut config = test_config(root.path(), data.path());
        config.performance.batch_size = 1;
        let indexer = open(config, Arc::new(HashingEmbedder::new(16))).await;

        let gone = root.path().join("gone.txt");
        std::fs::write(&gone, prose(30, "g")).unwrap();
        indexer.run_full_scan().await.unwrap();
        let stamp = indexer.last_full_scan().await;
        std::fs::remove_file(&gone).unwrap();
        for i in 0..3 {
            std::fs::write(root.path().join(format!("new{i}.txt")), prose(30, &format!("n{i}x"))).unwrap();
        }

        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = indexer.run_full_scan_until(&cancel).await.unwrap();
        assert!(report.cancelled);
        assert_eq!(report.candidates, 3);
        assert_eq!(report.batch.files_processed, 0);
        assert_eq!(report.deleted, 0);
        assert_eq!(indexer.last_full_scan().await, stamp);
        assert_eq!(indexer.stats().await.total_files, 1);

        let report = indexer.run_full_scan().await.unwrap();
        assert!(!report.cancelled);
        assert_eq!(report.batch.files_processed, 3);
        assert_eq!(report.deleted, 1);
    }

    #[tokio::test]
    async fn full_scan_only_touches_changed_files() {
        let root = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let embedder = Arc::new(CountingEmbedder {
            inner: HashingEmbedder::new(16),
            calls: AtomicUsize::new(0),
        });
        let indexer = open(test_config(root.path(), data.path()), embedder.clone()).await;

        std::fs::write(root.path().join("a.txt"), prose(30, "a")).unwrap();
        std::fs::write(root.path().join("b.txt"), prose(30, "b")).unwrap();

        let first = indexer.run_full_scan().await.unwrap();
        assert_eq!(first.candidates, 2);
        assert_eq!(first.batch.files_processed, 2);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);

        let second = indexer.run_full_scan().await.unwrap();
        assert_eq!(second.candidates, 0);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
        assert!(indexer.last_full_scan().await.is_some());
    }

    #[tokio::test]
    async fn removal_keeps_vectors_until_rebuild() {
        let root = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let config = test_config(root.path(), data.path());
        let indexer = open(config.clone(), Arc::new(HashingEmbedder::new(16))).await;

        let keep = root.path().join("keep.txt");
        let drop_me = root.path().join("drop.txt");
        std::fs::write(&keep, prose(30, "k")).unwrap();
        std::fs::write(&drop_me, prose(30, "q")).unwrap();
        indexer.run_full_scan().await.unwrap();
        let before = indexer.vector_count().await;

        std::fs::remove_file(&drop_me).unwrap();
        assert!(indexer.remove_file(&drop_me).await.unwrap());
        assert!(!indexer.remove_file(&drop_me).await.unwrap());
        assert_eq!(indexer.vector_count().await, before);

        let report = indexer.rebuild().await.unwrap();
        assert_eq!(report.files_indexed, 1);
        assert!(report.vector_count < before);

        let hits = indexer.search("k0 k1 k2", 1).await.unwrap();
        assert_eq!(hits[0].metadata.filename, "keep.txt");

        drop(indexer);
        let reopened = DocumentIndexer::open(config, Arc::new(HashingEmbedder::new(16)))
            .await
            .unwrap();
        assert_eq!(reopened.vector_count().await, report.vector_count);
    }

    #[tokio::test]
    async fn incompatible_index_needs_rebuild() {
        let root = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let config = test_config(root.path(), data.path());
        std::fs::write(root.path().join("a.txt"), prose(30, "a")).unwrap();

        let indexer = open(config.clone(), Arc::new(HashingEmbedder::new(16))).await;
        indexer.run_full_scan().await.unwrap();
        drop(indexer);

        let wider: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(32));
        assert!(matches!(
            DocumentIndexer::open(config.clone(), wider.clone()).await,
            Err(IndexerError::Config(_))
        ));

        let indexer =
            DocumentIndexer::open_for_rebuild(config, ContentReaders::default(), wider)
                .await
                .unwrap();
        let report = indexer.rebuild().await.unwrap();
        assert_eq!(report.files_indexed, 1);
        assert!(report.vector_count > 0);
    }

    #[tokio::test]
    async fn corrupt_index_is_fatal_on_open() {
        let root = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let config = test_config(root.path(), data.path());
        std::fs::write(data.path().join("index.vec"), b"DXVI").unwrap();

        let err = DocumentIndexer::open(config.clone(), Arc::new(HashingEmbedder::new(16)))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, IndexerError::VectorStore(ref e) if e.is_corrupt()));

        assert!(DocumentIndexer::open_for_rebuild(
            config,
            ContentReaders::default(),
            Arc::new(HashingEmbedder::new(16))
        )
        .await
        .is_ok());
    }
}
