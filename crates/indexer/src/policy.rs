use crate::config::IndexerConfig;
use crate::error::{IndexerError, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::{Component, Path, PathBuf};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Directories that are never scanned unless the config supplies its own list
pub const DEFAULT_EXCLUDED_DIRECTORIES: &[&str] = &[
    // credentials and key stores
    "**/.ssh",
    "**/.gnupg",
    "**/.gpg",
    "**/.aws",
    "**/.azure",
    "**/.config/gcloud",
    "**/.kube",
    "**/Keychains",
    "**/.password-store",
    "**/.vault",
    "**/.secrets",
    // development trees
    "**/node_modules",
    "**/.git",
    "**/venv",
    "**/.venv",
    "**/env",
    "**/__pycache__",
    "**/.tox",
    "**/dist",
    "**/build",
    "**/.eggs",
    "**/target",
    // caches and scratch space
    "**/Library/Caches",
    "**/Library/Application Support/*/Cache*",
    "**/.Trash",
    "**/.cache",
    "**/tmp",
    "**/temp",
    // bundles and icon folders
    "**/*.app",
    "**/*.framework",
    "**/Resources",
    "**/images",
    "**/icons",
    "**/assets",
    "**/thumbnails",
];

/// File-name patterns that are never indexed unless the config supplies its own list
pub const DEFAULT_EXCLUDED_FILE_PATTERNS: &[&str] = &[
    // keys
    "*.pem",
    "*.key",
    "*.p12",
    "*.pfx",
    "*.keystore",
    "*.jks",
    "*_rsa",
    "*_ed25519",
    "*_ecdsa",
    "*_dsa",
    "*.ppk",
    // env and credential files
    ".env",
    ".env.*",
    "*.env",
    ".netrc",
    ".npmrc",
    ".pypirc",
    "credentials*.json",
    "*credentials*",
    "*secret*",
    "*token*",
    "*password*",
    "*api_key*",
    "*apikey*",
    "*.htpasswd",
    // OS metadata
    ".DS_Store",
    "*.keychain",
    "*.keychain-db",
    // temp and backup files
    "*.tmp",
    "*.temp",
    "*.swp",
    "*.swo",
    "*~",
    "*.bak",
    // UI artwork
    "*toolbarButton*",
    "*toolbar-*",
    "*icon*",
    "*-icon.*",
    "*_icon.*",
    "*logo*",
    "*button*",
    "*@2x.*",
    "*@3x.*",
    "*-2x.*",
    "*_2x.*",
    "*thumbnail*",
    "*badge*",
    // archives and binaries
    "*.zip",
    "*.tar",
    "*.tar.gz",
    "*.tgz",
    "*.rar",
    "*.7z",
    "*.dmg",
    "*.iso",
    "*.pkg",
    "*.app",
    "*.exe",
    "*.dll",
    "*.so",
    "*.dylib",
];

/// Compiled scan rules: what to walk, what to skip, which files qualify.
///
/// Built once from an [`IndexerConfig`]; a config reload produces a new policy.
#[derive(Debug, Clone)]
pub struct ScanPolicy {
    scan_directories: Vec<PathBuf>,
    /// Directory globs as written, matched against the full path
    dir_full: GlobSet,
    /// Directory globs with `**/` removed, matched against each component
    dir_component: GlobSet,
    /// File globs matched against the lowercased file name
    file_name: GlobSet,
    /// File globs prefixed with `**/`, matched against the lowercased full path
    file_full: GlobSet,
    min_file_size_bytes: u64,
    max_file_size_mb: f64,
    recursive: bool,
    follow_symlinks: bool,
    max_depth: usize,
    process_images: bool,
    local_only_mode: bool,
    max_image_size_mb: f64,
    image_scan_directories: Vec<PathBuf>,
    min_image_width: u32,
    min_image_height: u32,
}

impl ScanPolicy {
    pub fn from_config(config: &IndexerConfig) -> Result<Self> {
        let scan = &config.scan;
        let images = &config.images;

        let dir_patterns = patterns_or_default(&scan.excluded_directories, DEFAULT_EXCLUDED_DIRECTORIES);
        let file_patterns =
            patterns_or_default(&scan.excluded_file_patterns, DEFAULT_EXCLUDED_FILE_PATTERNS);

        let dir_full = build_set(dir_patterns.iter().map(String::as_str), false)?;
        let stripped: Vec<String> = dir_patterns.iter().map(|p| p.replace("**/", "")).collect();
        let dir_component = build_set(stripped.iter().map(String::as_str), false)?;

        let lowered: Vec<String> = file_patterns.iter().map(|p| p.to_lowercase()).collect();
        let file_name = build_set(lowered.iter().map(String::as_str), true)?;
        let anchored: Vec<String> = lowered.iter().map(|p| format!("**/{p}")).collect();
        let file_full = build_set(anchored.iter().map(String::as_str), true)?;

        let image_scan_directories = images
            .image_scan_directories
            .iter()
            .map(|dir| std::fs::canonicalize(dir).unwrap_or_else(|_| dir.clone()))
            .collect();

        Ok(Self {
            scan_directories: scan.scan_directories.clone(),
            dir_full,
            dir_component,
            file_name,
            file_full,
            min_file_size_bytes: scan.min_file_size_bytes,
            max_file_size_mb: scan.max_file_size_mb,
            recursive: scan.recursive,
            follow_symlinks: scan.follow_symlinks,
            max_depth: scan.max_depth,
            process_images: images.process_images,
            local_only_mode: config.local_only_mode,
            max_image_size_mb: images.max_image_size_mb,
            image_scan_directories,
            min_image_width: images.min_image_width,
            min_image_height: images.min_image_height,
        })
    }

    /// Excluded if any glob matches the full path, the base name, or any component
    pub fn is_directory_excluded(&self, path: &Path) -> bool {
        if self.dir_full.is_match(path) {
            return true;
        }
        path.components().any(|component| match component {
            Component::Normal(part) => self.dir_component.is_match(Path::new(part)),
            _ => false,
        })
    }

    /// Case-insensitive match on the file name or the full path
    pub fn is_file_excluded(&self, path: &Path) -> bool {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if self.file_name.is_match(&name) {
            return true;
        }
        let full = path.to_string_lossy().to_lowercase();
        self.file_full.is_match(&full)
    }

    /// Inclusive on both bounds; an unreadable file is never valid
    pub fn is_file_size_valid(&self, path: &Path) -> bool {
        std::fs::metadata(path)
            .map(|meta| self.is_size_in_range(meta.len()))
            .unwrap_or(false)
    }

    pub fn is_size_in_range(&self, size: u64) -> bool {
        size >= self.min_file_size_bytes && size as f64 <= self.max_file_size_mb * BYTES_PER_MB
    }

    /// Images need opt-in, a remote-capable mode, a sane size, an allowed
    /// location and large enough pixel dimensions.
    pub fn should_process_image(&self, path: &Path) -> bool {
        if !self.process_images || self.local_only_mode {
            return false;
        }

        let Ok(meta) = std::fs::metadata(path) else {
            return false;
        };
        if meta.len() as f64 > self.max_image_size_mb * BYTES_PER_MB {
            return false;
        }

        if !self.image_scan_directories.is_empty() {
            let Ok(resolved) = std::fs::canonicalize(path) else {
                return false;
            };
            if !self
                .image_scan_directories
                .iter()
                .any(|dir| resolved.starts_with(dir))
            {
                return false;
            }
        }

        match image::image_dimensions(path) {
            Ok((width, height)) => width >= self.min_image_width && height >= self.min_image_height,
            Err(err) => {
                log::debug!("Cannot read image header {}: {err}", path.display());
                false
            }
        }
    }

    /// Configured roots that exist and are directories
    pub fn scan_directories(&self) -> Vec<PathBuf> {
        self.scan_directories
            .iter()
            .filter(|dir| {
                let ok = dir.is_dir();
                if !ok {
                    log::warn!("Scan directory does not exist: {}", dir.display());
                }
                ok
            })
            .cloned()
            .collect()
    }

    pub const fn recursive(&self) -> bool {
        self.recursive
    }

    pub const fn follow_symlinks(&self) -> bool {
        self.follow_symlinks
    }

    /// 0 means unbounded
    pub const fn max_depth(&self) -> usize {
        self.max_depth
    }
}

fn patterns_or_default(configured: &[String], defaults: &[&str]) -> Vec<String> {
    if configured.is_empty() {
        defaults.iter().map(|p| (*p).to_string()).collect()
    } else {
        configured.to_vec()
    }
}

fn build_set<'a>(patterns: impl Iterator<Item = &'a str>, case_insensitive: bool) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        match GlobBuilder::new(pattern)
            .case_insensitive(case_insensitive)
            .literal_separator(false)
            .build()
        {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(err) => log::warn!("Ignoring invalid exclusion pattern {pattern:?}: {err}"),
        }
    }
    builder
        .build()
        .map_err(|e| IndexerError::Config(format!("failed to compile exclusion patterns: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn policy_with(dirs: &[&str], files: &[&str]) -> ScanPolicy {
        let mut config = IndexerConfig::default();
        config.scan.excluded_directories = dirs.iter().map(|s| s.to_string()).collect();
        config.scan.excluded_file_patterns = files.iter().map(|s| s.to_string()).collect();
        ScanPolicy::from_config(&config).unwrap()
    }

    #[test]
    fn vcs_glob_excludes_at_any_depth() {
        let policy = policy_with(&["**/.git"], &["*.bak"]);
        assert!(policy.is_directory_excluded(Path::new("/home/u/docs/.git")));
        assert!(policy.is_directory_excluded(Path::new("/home/u/docs/proj/.git/objects")));
        assert!(!policy.is_directory_excluded(Path::new("/home/u/docs/notes")));
        assert!(!policy.is_directory_excluded(Path::new("/home/u/docs/.github")));
    }

    #[test]
    fn empty_lists_fall_back_to_builtin_defaults() {
        let policy = policy_with(&[], &[]);
        assert!(policy.is_directory_excluded(Path::new("/home/u/.ssh")));
        assert!(policy.is_directory_excluded(Path::new("/home/u/code/node_modules/pkg")));
        assert!(policy.is_directory_excluded(Path::new("/home/u/.config/gcloud")));
        assert!(policy.is_directory_excluded(Path::new("/Applications/Mail.app")));
        assert!(!policy.is_directory_excluded(Path::new("/home/u/docs")));

        for excluded in [
            "/home/u/.ssh2/id_rsa",
            "/home/u/docs/.env",
            "/home/u/docs/.env.local",
            "/home/u/docs/API_TOKEN.txt",
            "/home/u/docs/server.PEM",
            "/home/u/docs/app-icon.png",
            "/home/u/docs/backup.tar.gz",
        ] {
            assert!(policy.is_file_excluded(Path::new(excluded)), "{excluded}");
        }
        assert!(!policy.is_file_excluded(Path::new("/home/u/docs/notes.txt")));
        assert!(!policy.is_file_excluded(Path::new("/home/u/docs/report.pdf")));
    }

    #[test]
    fn custom_lists_replace_defaults() {
        let policy = policy_with(&["**/archive"], &["draft-*"]);
        assert!(!policy.is_directory_excluded(Path::new("/home/u/.ssh")));
        assert!(policy.is_directory_excluded(Path::new("/home/u/docs/archive/2019")));
        assert!(policy.is_file_excluded(Path::new("/home/u/docs/Draft-1.md")));
        assert!(!policy.is_file_excluded(Path::new("/home/u/docs/.env")));
    }

    #[test]
    fn size_bounds_are_inclusive() {
        let dir = TempDir::new().unwrap();
        let mut config = IndexerConfig::default();
        config.scan.min_file_size_bytes = 100;
        config.scan.max_file_size_mb = 200.0 / BYTES_PER_MB;
        let policy = ScanPolicy::from_config(&config).unwrap();

        for (name, len, expected) in [
            ("under.txt", 99, false),
            ("min.txt", 100, true),
            ("max.txt", 200, true),
            ("over.txt", 201, false),
        ] {
            let path = dir.path().join(name);
            std::fs::write(&path, vec![b'a'; len]).unwrap();
            assert_eq!(policy.is_file_size_valid(&path), expected, "{name}");
        }
        assert!(!policy.is_file_size_valid(&dir.path().join("missing.txt")));
    }

    #[test]
    fn images_need_opt_in_and_enough_pixels() {
        let dir = TempDir::new().unwrap();
        let large = dir.path().join("scan.png");
        let small = dir.path().join("glyph.png");
        image::RgbImage::new(300, 240).save(&large).unwrap();
        image::RgbImage::new(48, 48).save(&small).unwrap();

        let mut config = IndexerConfig::default();
        assert!(!ScanPolicy::from_config(&config).unwrap().should_process_image(&large));

        config.images.process_images = true;
        let policy = ScanPolicy::from_config(&config).unwrap();
        assert!(policy.should_process_image(&large));
        assert!(!policy.should_process_image(&small));

        config.local_only_mode = true;
        assert!(!ScanPolicy::from_config(&config).unwrap().should_process_image(&large));

        config.local_only_mode = false;
        let elsewhere = TempDir::new().unwrap();
        config.images.image_scan_directories = vec![elsewhere.path().to_path_buf()];
        assert!(!ScanPolicy::from_config(&config).unwrap().should_process_image(&large));
        config.images.image_scan_directories = vec![dir.path().to_path_buf()];
        assert!(ScanPolicy::from_config(&config).unwrap().should_process_image(&large));
    }

    #[test]
    fn scan_directories_skip_missing_roots() {
        let dir = TempDir::new().unwrap();
        let mut config = IndexerConfig::default();
        config.scan.scan_directories = vec![dir.path().to_path_buf(), dir.path().join("gone")];
        let policy = ScanPolicy::from_config(&config).unwrap();
        assert_eq!(policy.scan_directories(), vec![dir.path().to_path_buf()]);
    }
}
