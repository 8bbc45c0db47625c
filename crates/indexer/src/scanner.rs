use crate::content::{ContentReaders, DocumentKind};
use crate::manifest::{path_key, Manifest};
use crate::policy::ScanPolicy;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use walkdir::{DirEntry, WalkDir};

/// A file that passed every scan filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: Option<SystemTime>,
    pub kind: DocumentKind,
}

impl ScannedFile {
    pub const fn is_image(&self) -> bool {
        self.kind.is_image()
    }
}

/// Counters for one pass of a [`Scan`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanStats {
    /// Entries produced by the directory walk, directories included
    pub entries_seen: usize,
    pub dirs_pruned: usize,
    pub errors: usize,
}

/// Policy-driven walker over the configured scan roots
#[derive(Debug, Clone)]
pub struct Scanner {
    policy: Arc<ScanPolicy>,
    kinds: HashSet<DocumentKind>,
}

impl Scanner {
    /// Only kinds with a registered reader are yielded
    pub fn new(policy: Arc<ScanPolicy>, readers: &ContentReaders) -> Self {
        Self {
            policy,
            kinds: readers.supported_kinds().into_iter().collect(),
        }
    }

    pub fn policy(&self) -> &ScanPolicy {
        &self.policy
    }

    /// Lazy walk over every existing root; call again to restart
    pub fn scan(&self) -> Scan<'_> {
        Scan::new(self, self.policy.scan_directories())
    }

    pub fn scan_root(&self, root: &Path) -> Scan<'_> {
        Scan::new(self, vec![root.to_path_buf()])
    }

    /// Candidates the manifest considers new or changed
    pub fn scan_for_changes<'a>(
        &'a self,
        manifest: &'a Manifest,
    ) -> impl Iterator<Item = ScannedFile> + 'a {
        self.scan().filter(move |file| manifest.needs_indexing(&file.path))
    }

    /// Manifest keys of every file a scan would yield right now
    pub fn current_paths(&self) -> HashSet<String> {
        self.scan().map(|file| path_key(&file.path)).collect()
    }

    /// Candidate count per existing scan root
    pub fn directory_stats(&self) -> BTreeMap<String, usize> {
        self.policy
            .scan_directories()
            .into_iter()
            .map(|root| {
                let count = self.scan_root(&root).count();
                (root.display().to_string(), count)
            })
            .collect()
    }

    /// Static filter for paths reported by the watcher: extension, file
    /// patterns and parent directory. Does not touch the filesystem.
    pub fn is_candidate_path(&self, path: &Path) -> bool {
        let supported = DocumentKind::from_path(path).is_some_and(|kind| self.kinds.contains(&kind));
        if !supported || self.policy.is_file_excluded(path) {
            return false;
        }
        path.parent()
            .map_or(true, |parent| !self.policy.is_directory_excluded(parent))
    }

    fn walker(&self, root: &Path) -> walkdir::IntoIter {
        let mut walk = WalkDir::new(root).follow_links(self.policy.follow_symlinks());
        if !self.policy.recursive() {
            walk = walk.max_depth(1);
        } else if self.policy.max_depth() > 0 {
            // files of a directory at depth N sit at walk depth N + 1
            walk = walk.max_depth(self.policy.max_depth() + 1);
        }
        walk.into_iter()
    }

    fn check_entry(&self, entry: &DirEntry) -> Option<ScannedFile> {
        let path = entry.path();
        let kind = DocumentKind::from_path(path).filter(|kind| self.kinds.contains(kind))?;

        if self.policy.is_file_excluded(path) {
            log::debug!("Skipping excluded file: {}", path.display());
            return None;
        }

        let meta = match entry.metadata() {
            Ok(meta) => meta,
            Err(err) => {
                log::debug!("Cannot stat {}: {err}", path.display());
                return None;
            }
        };
        if !self.policy.is_size_in_range(meta.len()) {
            log::debug!("Skipping file (size out of range): {}", path.display());
            return None;
        }

        if kind.is_image() && !self.policy.should_process_image(path) {
            log::debug!("Skipping image: {}", path.display());
            return None;
        }

        Some(ScannedFile {
            path: path.to_path_buf(),
            size_bytes: meta.len(),
            modified: meta.modified().ok(),
            kind,
        })
    }
}

/// One pass over a set of roots. Excluded directories are pruned before
/// their contents are read; unreadable entries are counted and skipped.
pub struct Scan<'a> {
    scanner: &'a Scanner,
    roots: std::vec::IntoIter<PathBuf>,
    walk: Option<walkdir::IntoIter>,
    stats: ScanStats,
}

impl<'a> Scan<'a> {
    fn new(scanner: &'a Scanner, roots: Vec<PathBuf>) -> Self {
        Self {
            scanner,
            roots: roots.into_iter(),
            walk: None,
            stats: ScanStats::default(),
        }
    }

    pub const fn stats(&self) -> ScanStats {
        self.stats
    }
}

impl Iterator for Scan<'_> {
    type Item = ScannedFile;

    fn next(&mut self) -> Option<ScannedFile> {
        let scanner = self.scanner;
        let policy = scanner.policy();
        loop {
            let Some(walk) = self.walk.as_mut() else {
                let root = self.roots.next()?;
                self.walk = Some(scanner.walker(&root));
                continue;
            };

            let entry = match walk.next() {
                Some(Ok(entry)) => entry,
                Some(Err(err)) => {
                    log::debug!("Scan error: {err}");
                    self.stats.errors += 1;
                    continue;
                }
                None => {
                    self.walk = None;
                    continue;
                }
            };
            self.stats.entries_seen += 1;

            if entry.depth() > 0 && entry.path_is_symlink() && !policy.follow_symlinks() {
                continue;
            }

            let file_type = entry.file_type();
            if file_type.is_dir() {
                if policy.is_directory_excluded(entry.path()) {
                    log::debug!("Skipping excluded directory: {}", entry.path().display());
                    self.stats.dirs_pruned += 1;
                    walk.skip_current_dir();
                }
                continue;
            }
            if !file_type.is_file() {
                continue;
            }

            if let Some(file) = scanner.check_entry(&entry) {
                return Some(file);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexerConfig;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const BODY: &str = "Enough text to pass the minimum size filter for scanning.";

    fn scanner_for(root: &Path, tweak: impl FnOnce(&mut IndexerConfig)) -> Scanner {
        let mut config = IndexerConfig::default();
        config.scan.scan_directories = vec![root.to_path_buf()];
        config.scan.excluded_directories = vec!["**/.git".into(), "**/node_modules".into()];
        config.scan.excluded_file_patterns = vec!["*.bak".into(), "*secret*".into()];
        config.scan.min_file_size_bytes = 10;
        tweak(&mut config);
        let policy = Arc::new(ScanPolicy::from_config(&config).unwrap());
        Scanner::new(policy, &ContentReaders::default())
    }

    fn write(root: &Path, rel: &str, body: &str) -> PathBuf {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, body).unwrap();
        path
    }

    fn names(files: impl Iterator<Item = ScannedFile>) -> Vec<String> {
        let mut names: Vec<String> = files
            .map(|f| f.path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn yields_only_supported_valid_files() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "notes.txt", BODY);
        write(root, "nested/deeper/plan.md", BODY);
        write(root, "table.csv", BODY);
        write(root, "photo.png", BODY); // no reader registered
        write(root, "main.rs", BODY);
        write(root, "notes.txt.bak", BODY);
        write(root, "my-secret-plans.txt", BODY);
        write(root, "tiny.txt", "hi");
        write(root, "node_modules/pkg/readme.md", BODY);

        let scanner = scanner_for(root, |_| {});
        assert_eq!(
            names(scanner.scan()),
            vec!["notes.txt", "plan.md", "table.csv"]
        );
    }

    #[test]
    fn excluded_directories_are_pruned_before_descent() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "notes.txt", BODY);
        for i in 0..50 {
            write(root, &format!(".git/objects/{i:02}/obj{i}.txt"), BODY);
        }

        let scanner = scanner_for(root, |_| {});
        let mut scan = scanner.scan();
        let found: Vec<ScannedFile> = scan.by_ref().collect();

        assert_eq!(found.len(), 1);
        let stats = scan.stats();
        assert_eq!(stats.dirs_pruned, 1);
        // root, .git and notes.txt; nothing below .git is visited
        assert_eq!(stats.entries_seen, 3);
    }

    #[test]
    fn depth_and_recursion_limits() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "top.txt", BODY);
        write(root, "a/one.txt", BODY);
        write(root, "a/b/two.txt", BODY);

        let bounded = scanner_for(root, |c| c.scan.max_depth = 1);
        assert_eq!(names(bounded.scan()), vec!["one.txt", "top.txt"]);

        let unbounded = scanner_for(root, |c| c.scan.max_depth = 0);
        assert_eq!(names(unbounded.scan()), vec!["one.txt", "top.txt", "two.txt"]);

        let flat = scanner_for(root, |c| c.scan.recursive = false);
        assert_eq!(names(flat.scan()), vec!["top.txt"]);
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_need_opt_in() {
        let dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let root = dir.path();
        let target = write(outside.path(), "linked.txt", BODY);
        std::os::unix::fs::symlink(&target, root.join("link.txt")).unwrap();
        write(root, "real.txt", BODY);

        let scanner = scanner_for(root, |_| {});
        assert_eq!(names(scanner.scan()), vec!["real.txt"]);

        let following = scanner_for(root, |c| c.scan.follow_symlinks = true);
        assert_eq!(names(following.scan()), vec!["link.txt", "real.txt"]);
    }

    #[test]
    fn scan_for_changes_consults_manifest() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let seen = write(root, "seen.txt", BODY);
        write(root, "fresh.txt", BODY);

        let mut manifest = Manifest::new(root.join("m.json"));
        manifest.mark_indexed(&seen, 1, None).unwrap();

        let scanner = scanner_for(root, |_| {});
        assert_eq!(names(scanner.scan_for_changes(&manifest)), vec!["fresh.txt"]);
        assert_eq!(scanner.current_paths().len(), 2);
    }

    #[test]
    fn scans_restart_and_report_per_root_counts() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "a.txt", BODY);
        write(root, "sub/b.md", BODY);

        let scanner = scanner_for(root, |_| {});
        assert_eq!(names(scanner.scan()), names(scanner.scan()));

        let stats = scanner.directory_stats();
        assert_eq!(stats.get(&root.display().to_string()), Some(&2));
    }

    #[test]
    fn candidate_filter_is_static() {
        let dir = TempDir::new().unwrap();
        let scanner = scanner_for(dir.path(), |_| {});
        assert!(scanner.is_candidate_path(Path::new("/docs/new.txt")));
        assert!(!scanner.is_candidate_path(Path::new("/docs/new.rs")));
        assert!(!scanner.is_candidate_path(Path::new("/docs/old.txt.bak")));
        assert!(!scanner.is_candidate_path(Path::new("/docs/.git/COMMIT.txt")));
    }
}
