//! Run statistics, the outcome log and periodic progress reporting

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::range::IdRange;
use crate::types::{Event, ProgressSnapshot, RunSummary, Tally, TaskRecord};

/// Counters for one run; only [`ProgressAggregator::record`] mutates them
#[derive(Debug, Default)]
struct RunStatistics {
    attempted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

/// Collects terminal outcomes from all workers of one run
///
/// Workers submit outcomes through [`record`](Self::record) and never touch
/// the counters directly, so `attempted == succeeded + failed + skipped` holds
/// for every summary.
#[derive(Debug)]
pub struct ProgressAggregator {
    total: u64,
    stats: RunStatistics,
    outcomes: Mutex<Vec<TaskRecord>>,
    started: Instant,
    started_at: chrono::DateTime<Utc>,
    event_tx: broadcast::Sender<Event>,
}

impl ProgressAggregator {
    /// Start tracking a run over `total` IDs
    pub fn new(total: u64, event_tx: broadcast::Sender<Event>) -> Self {
        Self {
            total,
            stats: RunStatistics::default(),
            outcomes: Mutex::new(Vec::new()),
            started: Instant::now(),
            started_at: Utc::now(),
            event_tx,
        }
    }

    /// Record one terminal outcome and broadcast it
    pub fn record(&self, record: TaskRecord) {
        let counter = match record.outcome.tally() {
            Tally::Succeeded => &self.stats.succeeded,
            Tally::Failed => &self.stats.failed,
            Tally::Skipped => &self.stats.skipped,
        };

        {
            let mut log = self
                .outcomes
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            counter.fetch_add(1, Ordering::Relaxed);
            self.stats.attempted.fetch_add(1, Ordering::Release);
            log.push(record.clone());
        }

        // Ignore send errors (no subscribers is fine)
        self.event_tx.send(Event::TaskFinished(record)).ok();
    }

    /// Current counters
    ///
    /// Taken while workers are running, `attempted` may briefly trail the
    /// per-outcome counters by the tasks being recorded at that instant.
    pub fn snapshot(&self) -> ProgressSnapshot {
        let attempted = self.stats.attempted.load(Ordering::Acquire);
        ProgressSnapshot {
            total: self.total,
            attempted,
            succeeded: self.stats.succeeded.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            skipped: self.stats.skipped.load(Ordering::Relaxed),
            elapsed: self.started.elapsed(),
        }
    }

    /// Build the final report
    ///
    /// Counters and the outcome log are read under the log lock, so the
    /// summary is internally consistent even if called mid-run.
    pub fn summary(&self, cancelled: bool, not_attempted: Option<IdRange>) -> RunSummary {
        let log = self
            .outcomes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        RunSummary {
            total_requested: self.total,
            attempted: self.stats.attempted.load(Ordering::Acquire),
            succeeded: self.stats.succeeded.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            skipped: self.stats.skipped.load(Ordering::Relaxed),
            elapsed: self.started.elapsed(),
            started_at: self.started_at,
            finished_at: Utc::now(),
            cancelled,
            not_attempted,
            outcomes: log.clone(),
        }
    }

    /// Emit a progress snapshot every `interval` until `stop` is cancelled
    ///
    /// One last snapshot is emitted on stop so subscribers always see the
    /// final counters.
    pub fn spawn_reporter(
        self: &Arc<Self>,
        interval: Duration,
        stop: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let aggregator = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        aggregator.emit_progress();
                    }
                    _ = stop.cancelled() => {
                        aggregator.emit_progress();
                        break;
                    }
                }
            }
        })
    }

    fn emit_progress(&self) {
        let snapshot = self.snapshot();
        tracing::info!(
            attempted = snapshot.attempted,
            total = snapshot.total,
            succeeded = snapshot.succeeded,
            failed = snapshot.failed,
            skipped = snapshot.skipped,
            percent = format!("{:.1}", snapshot.percent()),
            "Progress"
        );
        self.event_tx.send(Event::Progress(snapshot)).ok();
    }
}
