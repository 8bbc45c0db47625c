use crate::error::{IndexerError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// State of a file as of its last successful index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// SHA-256 of the content, lowercase hex
    pub hash: String,
    pub mtime_ns: u64,
    pub size: u64,
    pub indexed_at: DateTime<Utc>,
    pub chunk_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManifestStats {
    pub total_files: usize,
    pub total_chunks: usize,
    pub total_size_mb: f64,
    pub last_full_scan: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ManifestFile {
    #[serde(default)]
    files: BTreeMap<String, FileRecord>,
    #[serde(default)]
    last_full_scan: Option<DateTime<Utc>>,
}

/// Durable path → [`FileRecord`] table used for differential indexing.
///
/// Loaded once, mutated in memory, rewritten wholesale by [`Manifest::save`].
/// Callers serialize access; the manifest itself holds no lock.
#[derive(Debug)]
pub struct Manifest {
    path: PathBuf,
    state: ManifestFile,
}

impl Manifest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: ManifestFile::default(),
        }
    }

    /// A missing file is an empty manifest; an unreadable one is an error
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No scan manifest at {}, starting empty", path.display());
                return Ok(Self::new(path));
            }
            Err(err) => return Err(IndexerError::persistence(path, err)),
        };

        let state: ManifestFile = serde_json::from_slice(&bytes).map_err(|e| {
            IndexerError::persistence(
                &path,
                std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            )
        })?;
        log::debug!(
            "Loaded scan manifest {} ({} files)",
            path.display(),
            state.files.len()
        );
        Ok(Self { path, state })
    }

    /// Rewrite the whole manifest atomically
    pub async fn save(&self) -> Result<()> {
        let write = async {
            if let Some(parent) = self.path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let bytes = serde_json::to_vec_pretty(&self.state)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            let tmp = self.path.with_extension("json.tmp");
            tokio::fs::write(&tmp, bytes).await?;
            tokio::fs::rename(&tmp, &self.path).await
        };
        write
            .await
            .map_err(|e| IndexerError::persistence(&self.path, e))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.state.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.files.is_empty()
    }

    pub fn record(&self, path: &Path) -> Option<&FileRecord> {
        self.state.files.get(&path_key(path))
    }

    pub fn indexed_paths(&self) -> impl Iterator<Item = &str> {
        self.state.files.keys().map(String::as_str)
    }

    pub const fn last_full_scan(&self) -> Option<DateTime<Utc>> {
        self.state.last_full_scan
    }

    /// New file, or changed content behind a changed mtime
    pub fn needs_indexing(&self, path: &Path) -> bool {
        needs_indexing_against(self.record(path), path)
    }

    /// Upsert the record for `path` from its current state on disk.
    ///
    /// `hash` may be passed when the caller already hashed the content it indexed.
    pub fn mark_indexed(
        &mut self,
        path: &Path,
        chunk_count: usize,
        hash: Option<String>,
    ) -> Result<()> {
        let meta = std::fs::metadata(path)?;
        let hash = match hash {
            Some(hash) => hash,
            None => compute_file_hash(path)?,
        };
        self.state.files.insert(
            path_key(path),
            FileRecord {
                hash,
                mtime_ns: mtime_ns(&meta),
                size: meta.len(),
                indexed_at: Utc::now(),
                chunk_count,
            },
        );
        Ok(())
    }

    /// Returns whether a record was removed
    pub fn mark_deleted(&mut self, path: &Path) -> bool {
        self.state.files.remove(&path_key(path)).is_some()
    }

    /// Manifest keys that are not in `current`
    pub fn find_deleted_files(&self, current: &HashSet<String>) -> BTreeSet<String> {
        self.state
            .files
            .keys()
            .filter(|key| !current.contains(*key))
            .cloned()
            .collect()
    }

    pub fn mark_full_scan_complete(&mut self) {
        self.state.last_full_scan = Some(Utc::now());
    }

    /// Keep only the records for which `keep` returns true
    pub fn retain(&mut self, mut keep: impl FnMut(&str, &FileRecord) -> bool) {
        self.state.files.retain(|key, record| keep(key, record));
    }

    pub fn stats(&self) -> ManifestStats {
        let total_chunks = self.state.files.values().map(|r| r.chunk_count).sum();
        let total_size: u64 = self.state.files.values().map(|r| r.size).sum();
        let total_size_mb = (total_size as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0;
        ManifestStats {
            total_files: self.state.files.len(),
            total_chunks,
            total_size_mb,
            last_full_scan: self.state.last_full_scan,
        }
    }
}

/// Manifest key for a path
pub fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Change check against a detached record, so hashing can run outside any lock.
///
/// A file that cannot be stat'ed or hashed is reported unchanged.
pub fn needs_indexing_against(record: Option<&FileRecord>, path: &Path) -> bool {
    let Some(record) = record else {
        return true;
    };
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    if mtime_ns(&meta) == record.mtime_ns {
        return false;
    }
    match compute_file_hash(path) {
        Ok(hash) => hash != record.hash,
        Err(err) => {
            log::warn!("Failed to hash {}: {err}; skipping", path.display());
            false
        }
    }
}

pub fn compute_file_hash(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn mtime_ns(meta: &std::fs::Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
