use crate::config::ScheduleConfig;
use crate::indexer::{DocumentIndexer, FileOutcome};
use crate::{IndexerError, Result};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Quiet period a path needs before it is indexed
    pub debounce: Duration,
    /// How often pending paths are checked
    pub tick: Duration,
    pub notify_poll_interval: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self::from(&ScheduleConfig::default())
    }
}

impl From<&ScheduleConfig> for WatcherConfig {
    fn from(schedule: &ScheduleConfig) -> Self {
        Self {
            debounce: schedule.debounce(),
            tick: schedule.watcher_tick(),
            notify_poll_interval: Duration::from_secs(2),
        }
    }
}

/// Where the watcher sends settled changes
#[async_trait]
pub trait ChangeSink: Send + Sync + 'static {
    /// Static filter applied to every event path
    fn accepts(&self, path: &Path) -> bool;

    async fn index(&self, path: &Path) -> Result<FileOutcome>;

    async fn remove(&self, path: &Path) -> Result<bool>;
}

#[async_trait]
impl ChangeSink for DocumentIndexer {
    fn accepts(&self, path: &Path) -> bool {
        self.scanner().is_candidate_path(path)
    }

    async fn index(&self, path: &Path) -> Result<FileOutcome> {
        self.index_file(path, false).await
    }

    async fn remove(&self, path: &Path) -> Result<bool> {
        self.remove_file(path).await
    }
}

/// Live filesystem watcher over every scan root.
///
/// Creates and modifications are debounced per path; deletions reach the
/// indexer right away. Cheap to clone; the loop stops when the last handle
/// is dropped or [`DocumentWatcher::shutdown`] is called.
#[derive(Clone)]
pub struct DocumentWatcher {
    inner: Arc<DocumentWatcherInner>,
}

struct DocumentWatcherInner {
    command_tx: mpsc::Sender<WatcherCommand>,
    shutdown: CancellationToken,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
    _watcher: std::sync::Mutex<Option<RecommendedWatcher>>,
}

#[derive(Debug)]
enum WatcherCommand {
    /// Index every pending path now, ignoring the debounce
    Flush,
}

impl DocumentWatcher {
    pub fn start(indexer: Arc<DocumentIndexer>, config: WatcherConfig) -> Result<Self> {
        let policy = indexer.scanner().policy();
        let roots = policy.scan_directories();
        let mode = if policy.recursive() {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };

        let (event_tx, event_rx) = mpsc::channel(1024);
        let watcher = if roots.is_empty() {
            warn!("No scan directories exist, nothing to watch");
            None
        } else {
            Some(create_fs_watcher(&roots, mode, event_tx, config.notify_poll_interval)?)
        };

        Ok(Self::spawn(indexer, config, event_rx, watcher))
    }

    fn spawn<S: ChangeSink>(
        sink: Arc<S>,
        config: WatcherConfig,
        event_rx: mpsc::Receiver<notify::Result<Event>>,
        watcher: Option<RecommendedWatcher>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(16);
        let shutdown = CancellationToken::new();
        let task = spawn_watch_loop(sink, config, event_rx, command_rx, shutdown.clone());
        Self {
            inner: Arc::new(DocumentWatcherInner {
                command_tx,
                shutdown,
                task: std::sync::Mutex::new(Some(task)),
                _watcher: std::sync::Mutex::new(watcher),
            }),
        }
    }

    pub async fn flush(&self) -> Result<()> {
        self.send(WatcherCommand::Flush).await
    }

    /// Stop the loop and wait for it.
    ///
    /// A path being indexed finishes first; the rest of a settled batch and
    /// every unsettled path are dropped.
    pub async fn shutdown(&self) -> Result<()> {
        self.inner.shutdown.cancel();
        let task = self
            .inner
            .task
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.await
                .map_err(|e| IndexerError::Other(format!("watcher task failed: {e}")))?;
        }
        Ok(())
    }

    async fn send(&self, command: WatcherCommand) -> Result<()> {
        self.inner
            .command_tx
            .send(command)
            .await
            .map_err(|e| IndexerError::Other(format!("failed to send watcher command: {e}")))
    }
}

impl Drop for DocumentWatcher {
    fn drop(&mut self) {
        if Arc::strong_count(&self.inner) == 1 {
            self.inner.shutdown.cancel();
        }
    }
}

fn create_fs_watcher(
    roots: &[PathBuf],
    mode: RecursiveMode,
    sender: mpsc::Sender<notify::Result<Event>>,
    poll_interval: Duration,
) -> Result<RecommendedWatcher> {
    let mut watcher = RecommendedWatcher::new(
        move |res| {
            let _ = sender.blocking_send(res);
        },
        NotifyConfig::default().with_poll_interval(poll_interval),
    )
    .map_err(|e| IndexerError::Other(format!("watcher init failed: {e}")))?;

    let mut watched = 0;
    for root in roots {
        match watcher.watch(root, mode) {
            Ok(()) => {
                info!("Watching: {}", root.display());
                watched += 1;
            }
            Err(err) => warn!("Failed to watch {}: {err}", root.display()),
        }
    }
    if watched == 0 {
        return Err(IndexerError::Other("could not watch any scan directory".into()));
    }
    Ok(watcher)
}

fn spawn_watch_loop<S: ChangeSink>(
    sink: Arc<S>,
    config: WatcherConfig,
    mut event_rx: mpsc::Receiver<notify::Result<Event>>,
    mut command_rx: mpsc::Receiver<WatcherCommand>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut pending = PendingChanges::default();
        let mut ticker = time::interval(config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(event) = event_rx.recv() => {
                    handle_event(sink.as_ref(), event, &mut pending).await;
                }
                command = command_rx.recv() => match command {
                    Some(WatcherCommand::Flush) => {
                        let ready = pending.take_all();
                        index_settled(sink.as_ref(), ready, &mut pending, &shutdown).await;
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    let ready = pending.take_ready(Instant::now(), config.debounce);
                    index_settled(sink.as_ref(), ready, &mut pending, &shutdown).await;
                }
            }
        }
        debug!("Watcher loop stopped with {} pending paths", pending.len());
    })
}

async fn handle_event<S: ChangeSink>(sink: &S, event: notify::Result<Event>, pending: &mut PendingChanges) {
    let event = match event {
        Ok(event) => event,
        Err(err) => {
            warn!("Watcher error: {err}");
            return;
        }
    };

    for action in classify_event(&event) {
        match action {
            WatchAction::Touch(path) if sink.accepts(&path) => {
                debug!("Change queued: {}", path.display());
                pending.touch(path, Instant::now());
            }
            WatchAction::Delete(path) if sink.accepts(&path) => {
                pending.forget(&path);
                if let Err(err) = sink.remove(&path).await {
                    error!("Failed to remove {}: {err}", path.display());
                }
            }
            _ => {}
        }
    }
}

/// Index each settled path, stopping between files once `shutdown` fires
async fn index_settled<S: ChangeSink>(
    sink: &S,
    paths: Vec<PathBuf>,
    pending: &mut PendingChanges,
    shutdown: &CancellationToken,
) {
    for path in paths {
        if shutdown.is_cancelled() {
            return;
        }
        // deleted or renamed away during the quiet period
        if !path.exists() {
            continue;
        }
        match sink.index(&path).await {
            Ok(FileOutcome::InProgress) => {
                // the running pass may have read the file before this change
                debug!("{} is busy, queued again", path.display());
                pending.touch(path, Instant::now());
            }
            Ok(FileOutcome::Failed { stage, reason }) => {
                warn!("Could not index {} ({stage:?}): {reason}", path.display());
            }
            Ok(outcome) => debug!("{}: {outcome:?}", path.display()),
            Err(err) => error!("Error indexing {}: {err}", path.display()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum WatchAction {
    Touch(PathBuf),
    Delete(PathBuf),
}

/// A move is a delete of the source plus a touch of the destination
fn classify_event(event: &Event) -> Vec<WatchAction> {
    let paths = &event.paths;
    match event.kind {
        EventKind::Create(_) => paths.iter().cloned().map(WatchAction::Touch).collect(),
        EventKind::Remove(_) => paths.iter().cloned().map(WatchAction::Delete).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if paths.len() >= 2 => vec![
            WatchAction::Delete(paths[0].clone()),
            WatchAction::Touch(paths[1].clone()),
        ],
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            paths.iter().cloned().map(WatchAction::Delete).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            paths.iter().cloned().map(WatchAction::Touch).collect()
        }
        // backend could not tell which side of the rename this is
        EventKind::Modify(ModifyKind::Name(_)) => paths
            .iter()
            .cloned()
            .map(|path| {
                if path.exists() {
                    WatchAction::Touch(path)
                } else {
                    WatchAction::Delete(path)
                }
            })
            .collect(),
        EventKind::Modify(_) => paths.iter().cloned().map(WatchAction::Touch).collect(),
        _ => Vec::new(),
    }
}

/// Most recent event time per path
#[derive(Debug, Default)]
struct PendingChanges {
    last_event: HashMap<PathBuf, Instant>,
}

impl PendingChanges {
    fn touch(&mut self, path: PathBuf, at: Instant) {
        self.last_event.insert(path, at);
    }

    fn forget(&mut self, path: &Path) {
        self.last_event.remove(path);
    }

    fn len(&self) -> usize {
        self.last_event.len()
    }

    /// Remove and return every path quiet for at least `debounce`
    fn take_ready(&mut self, now: Instant, debounce: Duration) -> Vec<PathBuf> {
        let mut ready: Vec<PathBuf> = self
            .last_event
            .iter()
            .filter(|(_, at)| now.saturating_duration_since(**at) >= debounce)
            .map(|(path, _)| path.clone())
            .collect();
        for path in &ready {
            self.last_event.remove(path);
        }
        ready.sort();
        ready
    }

    fn take_all(&mut self) -> Vec<PathBuf> {
        let mut all: Vec<PathBuf> = self.last_event.drain().map(|(path, _)| path).collect();
        all.sort();
        all
    }
}
