use crate::config::ScheduleConfig;
use crate::indexer::DocumentIndexer;
use crate::stats::FullScanReport;
use crate::{IndexerError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{error, info};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Delay before the first scan when none has ever completed, and before a
/// retry after a failed scan
pub const FIRST_SCAN_DELAY_MINUTES: i64 = 5;

/// `last + interval`, or a short delay from `now` when there was no scan yet
/// or `last + interval` has already passed.
pub fn next_scan_time(
    last: Option<DateTime<Utc>>,
    interval: ChronoDuration,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    let soon = now + ChronoDuration::minutes(FIRST_SCAN_DELAY_MINUTES);
    match last.and_then(|last| last.checked_add_signed(interval)) {
        Some(next) if next >= now => next,
        _ => soon,
    }
}

#[async_trait]
pub trait FullScanTarget: Send + Sync + 'static {
    /// Run one scan, returning early once `cancel` fires
    async fn run_full_scan(&self, cancel: &CancellationToken) -> Result<FullScanReport>;

    async fn last_full_scan(&self) -> Option<DateTime<Utc>>;
}

#[async_trait]
impl FullScanTarget for Arc<DocumentIndexer> {
    async fn run_full_scan(&self, cancel: &CancellationToken) -> Result<FullScanReport> {
        DocumentIndexer::run_full_scan_until(self, cancel).await
    }

    async fn last_full_scan(&self) -> Option<DateTime<Utc>> {
        DocumentIndexer::last_full_scan(self).await
    }
}

/// The later of `Utc::now()` and the start time plus tokio's elapsed time
struct ScheduleClock {
    wall: DateTime<Utc>,
    started: Instant,
}

impl ScheduleClock {
    fn new() -> Self {
        Self {
            wall: Utc::now(),
            started: Instant::now(),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        let elapsed = ChronoDuration::from_std(self.started.elapsed())
            .unwrap_or(ChronoDuration::zero());
        let ticked = self.wall.checked_add_signed(elapsed).unwrap_or(self.wall);
        Utc::now().max(ticked)
    }
}

/// Periodic full scans on a coarse tick
pub struct FullScanScheduler {
    command_tx: mpsc::Sender<SchedulerCommand>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

#[derive(Debug)]
enum SchedulerCommand {
    RunNow,
}

impl FullScanScheduler {
    /// `None` when the configured interval disables scheduled scans
    pub fn start<T: FullScanTarget>(target: T, schedule: &ScheduleConfig) -> Option<Self> {
        let Some(interval) = schedule.full_scan_interval() else {
            info!("Scheduled full scans disabled");
            return None;
        };
        let (command_tx, command_rx) = mpsc::channel(4);
        let shutdown = CancellationToken::new();
        let task = spawn_schedule_loop(
            target,
            interval,
            schedule.scheduler_tick(),
            command_rx,
            shutdown.clone(),
        );
        Some(Self {
            command_tx,
            shutdown,
            task: Some(task),
        })
    }

    /// Run a full scan on the next loop iteration regardless of the schedule
    pub async fn run_now(&self) -> Result<()> {
        self.command_tx
            .send(SchedulerCommand::RunNow)
            .await
            .map_err(|e| IndexerError::Other(format!("failed to send scheduler command: {e}")))
    }

    /// Stop the loop and wait for it.
    ///
    /// A scan in progress stops after the files already being indexed.
    pub async fn shutdown(mut self) -> Result<()> {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| IndexerError::Other(format!("scheduler task failed: {e}")))?;
        }
        Ok(())
    }
}

impl Drop for FullScanScheduler {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.shutdown.cancel();
        }
    }
}

fn spawn_schedule_loop<T: FullScanTarget>(
    target: T,
    interval: ChronoDuration,
    tick: std::time::Duration,
    mut command_rx: mpsc::Receiver<SchedulerCommand>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let clock = ScheduleClock::new();
        let mut next = next_scan_time(target.last_full_scan().await, interval, clock.now());
        info!("Next full scan scheduled for {next}");

        let mut ticker = time::interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let run = tokio::select! {
                _ = shutdown.cancelled() => break,
                command = command_rx.recv() => match command {
                    Some(SchedulerCommand::RunNow) => true,
                    None => break,
                },
                _ = ticker.tick() => clock.now() >= next,
            };
            if !run {
                continue;
            }

            info!("Running scheduled full scan");
            next = match target.run_full_scan(&shutdown).await {
                Ok(report) if report.cancelled => {
                    info!("Scheduled scan interrupted by shutdown");
                    break;
                }
                Ok(report) => {
                    info!(
                        "Scheduled scan done: {} indexed, {} deleted",
                        report.batch.files_processed, report.deleted
                    );
                    next_scan_time(target.last_full_scan().await, interval, clock.now())
                }
                Err(err) => {
                    error!("Scheduled full scan failed: {err}");
                    clock.now() + ChronoDuration::minutes(FIRST_SCAN_DELAY_MINUTES)
                }
            };
            info!("Next full scan scheduled for {next}");
        }
    })
}
