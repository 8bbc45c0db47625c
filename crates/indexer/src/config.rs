use crate::error::{IndexerError, Result};
use docindex_chunker::ChunkerConfig;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "docindex.toml";
pub const MANIFEST_FILE: &str = "scan_manifest.json";
pub const INDEX_BASE_NAME: &str = "index";

static ENV_VAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$(?:\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))")
        .expect("valid env var regex")
});

/// Top-level configuration, loaded from `docindex.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Directory holding the manifest and the vector index
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Never hand content to remote services; also disables image processing
    #[serde(default)]
    pub local_only_mode: bool,

    #[serde(default)]
    pub scan: ScanConfig,

    #[serde(default)]
    pub images: ImageConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub performance: PerformanceConfig,

    #[serde(default)]
    pub chunking: ChunkerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_scan_directories")]
    pub scan_directories: Vec<PathBuf>,

    /// Directory globs; empty means the built-in list
    #[serde(default)]
    pub excluded_directories: Vec<String>,

    /// File-name globs; empty means the built-in list
    #[serde(default)]
    pub excluded_file_patterns: Vec<String>,

    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: f64,

    #[serde(default = "default_min_file_size_bytes")]
    pub min_file_size_bytes: u64,

    #[serde(default = "default_true")]
    pub recursive: bool,

    #[serde(default)]
    pub follow_symlinks: bool,

    /// Maximum directory depth below a scan root; 0 means unbounded
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    #[serde(default)]
    pub process_images: bool,

    #[serde(default = "default_max_image_size_mb")]
    pub max_image_size_mb: f64,

    /// When non-empty, images are only taken from below these directories
    #[serde(default)]
    pub image_scan_directories: Vec<PathBuf>,

    #[serde(default = "default_min_image_side")]
    pub min_image_width: u32,

    #[serde(default = "default_min_image_side")]
    pub min_image_height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Hours between scheduled full scans; zero or negative disables them
    #[serde(default = "default_full_scan_interval_hours")]
    pub full_scan_interval_hours: i64,

    #[serde(default = "default_watcher_debounce_seconds")]
    pub watcher_debounce_seconds: u64,

    #[serde(default = "default_watcher_tick_ms")]
    pub watcher_tick_ms: u64,

    #[serde(default = "default_scheduler_tick_seconds")]
    pub scheduler_tick_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_batch_pause_seconds")]
    pub batch_pause_seconds: f64,

    #[serde(default = "default_parallel_workers")]
    pub parallel_workers: usize,
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("docindex"))
        .unwrap_or_else(|| PathBuf::from(".docindex"))
}

fn default_scan_directories() -> Vec<PathBuf> {
    ["~/Documents", "~/Desktop"]
        .iter()
        .map(|raw| expand_path(raw))
        .collect()
}

const fn default_true() -> bool {
    true
}

const fn default_max_file_size_mb() -> f64 {
    50.0
}

const fn default_min_file_size_bytes() -> u64 {
    100
}

const fn default_max_depth() -> usize {
    10
}

const fn default_max_image_size_mb() -> f64 {
    10.0
}

const fn default_min_image_side() -> u32 {
    200
}

/// Longest accepted scan interval, ten years
pub const MAX_FULL_SCAN_INTERVAL_HOURS: i64 = 24 * 365 * 10;

const fn default_full_scan_interval_hours() -> i64 {
    24
}

const fn default_watcher_debounce_seconds() -> u64 {
    5
}

const fn default_watcher_tick_ms() -> u64 {
    1000
}

const fn default_scheduler_tick_seconds() -> u64 {
    60
}

const fn default_batch_size() -> usize {
    10
}

const fn default_batch_pause_seconds() -> f64 {
    1.0
}

const fn default_parallel_workers() -> usize {
    4
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            local_only_mode: false,
            scan: ScanConfig::default(),
            images: ImageConfig::default(),
            schedule: ScheduleConfig::default(),
            performance: PerformanceConfig::default(),
            chunking: ChunkerConfig::default(),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            scan_directories: default_scan_directories(),
            excluded_directories: Vec::new(),
            excluded_file_patterns: Vec::new(),
            max_file_size_mb: default_max_file_size_mb(),
            min_file_size_bytes: default_min_file_size_bytes(),
            recursive: true,
            follow_symlinks: false,
            max_depth: default_max_depth(),
        }
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            process_images: false,
            max_image_size_mb: default_max_image_size_mb(),
            image_scan_directories: Vec::new(),
            min_image_width: default_min_image_side(),
            min_image_height: default_min_image_side(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            full_scan_interval_hours: default_full_scan_interval_hours(),
            watcher_debounce_seconds: default_watcher_debounce_seconds(),
            watcher_tick_ms: default_watcher_tick_ms(),
            scheduler_tick_seconds: default_scheduler_tick_seconds(),
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_pause_seconds: default_batch_pause_seconds(),
            parallel_workers: default_parallel_workers(),
        }
    }
}

impl ScheduleConfig {
    /// `None` when scheduled scanning is disabled or the interval is out of range
    pub fn full_scan_interval(&self) -> Option<chrono::Duration> {
        if self.full_scan_interval_hours <= 0 {
            return None;
        }
        chrono::Duration::try_hours(self.full_scan_interval_hours)
    }

    pub const fn debounce(&self) -> Duration {
        Duration::from_secs(self.watcher_debounce_seconds)
    }

    pub fn watcher_tick(&self) -> Duration {
        Duration::from_millis(self.watcher_tick_ms.max(1))
    }

    pub fn scheduler_tick(&self) -> Duration {
        Duration::from_secs(self.scheduler_tick_seconds.max(1))
    }
}

impl PerformanceConfig {
    pub fn batch_pause(&self) -> Duration {
        if self.batch_pause_seconds.is_finite() && self.batch_pause_seconds > 0.0 {
            Duration::from_secs_f64(self.batch_pause_seconds)
        } else {
            Duration::ZERO
        }
    }
}

impl IndexerConfig {
    /// Load configuration, falling back to defaults on any problem.
    ///
    /// A missing file is expected on first run and only warns; an unreadable
    /// or invalid file is logged as an error.
    pub fn load(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                log::warn!("Config file not found: {}, using defaults", path.display());
                return Self::default();
            }
            Err(err) => {
                log::error!("Failed to read config {}: {err}", path.display());
                return Self::default();
            }
        };

        match Self::from_toml_str(&raw).and_then(|config| config.validate().map(|()| config)) {
            Ok(config) => {
                log::info!("Loaded config from {}", path.display());
                config
            }
            Err(err) => {
                log::error!("{err}; using defaults");
                Self::default()
            }
        }
    }

    /// Parse a TOML document and expand `~` and `$VAR` in every path
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self =
            toml::from_str(raw).map_err(|e| IndexerError::Config(e.to_string()))?;
        config.expand_paths();
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| IndexerError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.performance.batch_size == 0 {
            return Err(IndexerError::Config("batch_size must be > 0".to_string()));
        }
        if self.performance.parallel_workers == 0 {
            return Err(IndexerError::Config(
                "parallel_workers must be > 0".to_string(),
            ));
        }
        if self.schedule.full_scan_interval_hours > MAX_FULL_SCAN_INTERVAL_HOURS {
            return Err(IndexerError::Config(format!(
                "full_scan_interval_hours must be at most {MAX_FULL_SCAN_INTERVAL_HOURS}"
            )));
        }
        if !(self.scan.max_file_size_mb.is_finite() && self.scan.max_file_size_mb >= 0.0) {
            return Err(IndexerError::Config(
                "max_file_size_mb must be a non-negative number".to_string(),
            ));
        }
        self.chunking
            .validate()
            .map_err(|e| IndexerError::Config(e.to_string()))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.data_dir.join(MANIFEST_FILE)
    }

    /// Base path shared by the two halves of the vector index
    pub fn index_base(&self) -> PathBuf {
        self.data_dir.join(INDEX_BASE_NAME)
    }

    fn expand_paths(&mut self) {
        self.data_dir = expand_path(&self.data_dir.to_string_lossy());
        for dir in self
            .scan
            .scan_directories
            .iter_mut()
            .chain(self.images.image_scan_directories.iter_mut())
        {
            *dir = expand_path(&dir.to_string_lossy());
        }
    }
}

/// Expand `$VAR`/`${VAR}` and a leading `~`, then make the path absolute.
///
/// Unknown variables are left untouched.
pub fn expand_path(raw: &str) -> PathBuf {
    let vars = ENV_VAR.replace_all(raw, |caps: &Captures| {
        let name = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
        std::env::var(name).unwrap_or_else(|_| caps[0].to_string())
    });

    let expanded = match (vars.strip_prefix('~'), dirs::home_dir()) {
        (Some(rest), Some(home)) if rest.is_empty() || rest.starts_with('/') => {
            home.join(rest.trim_start_matches('/'))
        }
        _ => PathBuf::from(vars.as_ref()),
    };

    if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(&expanded))
            .unwrap_or(expanded)
    }
}
