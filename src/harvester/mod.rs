//! Worker pool that walks an ID range and harvests every texture in it
//!
//! [`Harvester::run`] spawns `workers` tokio tasks that share one
//! [`IdCursor`](crate::range::IdCursor) and one
//! [`ProgressAggregator`]. Each worker pulls one ID at a time and drives it
//! through fetch, classify, dedup and download until it reaches exactly one
//! terminal outcome.

mod worker;


use futures::future::join_all;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::client::{HttpSkinApi, SkinApi};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::output::OutputTree;
use crate::progress::ProgressAggregator;
use crate::range::IdRange;
use crate::types::{Event, RunSummary, TaskRecord, WorkerState};

use worker::WorkerContext;

/// Capacity of the event channel; slow subscribers lag rather than block workers
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Clears the running flag when a run ends, however it ends
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Range harvester (cloneable, all fields are Arc-wrapped)
///
/// One harvester runs at most one range at a time. Cancellation is one-way:
/// once [`cancel`](Self::cancel) has been called, later runs stop before
/// dispatching anything.
#[derive(Clone)]
pub struct Harvester {
    pub(crate) config: Arc<Config>,
    pub(crate) api: Arc<dyn SkinApi>,
    pub(crate) event_tx: broadcast::Sender<Event>,
    cancel_token: CancellationToken,
    running: Arc<AtomicBool>,
    worker_states: Arc<Vec<AtomicU8>>,
}

impl std::fmt::Debug for Harvester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Harvester")
            .field("config", &self.config)
            .field("running", &self.running.load(Ordering::Acquire))
            .field("cancelled", &self.cancel_token.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Harvester {
    /// Create a harvester talking to the configured Blessing Skin server
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for invalid settings and [`Error::Http`] if the
    /// HTTP client cannot be built.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use skin_dl::{Harvester, config::Config, range::IdRange};
    ///
    /// # async fn example() -> skin_dl::Result<()> {
    /// let harvester = Harvester::new(Config::default())?;
    /// let summary = harvester.run(IdRange::new(1, 100)?).await?;
    /// println!("{} downloaded, {} failed", summary.succeeded, summary.failed);
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(config: Config) -> Result<Self> {
        let api = HttpSkinApi::new(&config.api)?;
        Self::with_api(config, Arc::new(api))
    }

    /// Create a harvester over any [`SkinApi`] implementation
    pub fn with_api(config: Config, api: Arc<dyn SkinApi>) -> Result<Self> {
        config.validate()?;

        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let worker_states: Vec<AtomicU8> = (0..config.workers)
            .map(|_| AtomicU8::new(WorkerState::Stopped as u8))
            .collect();

        Ok(Self {
            config: Arc::new(config),
            api,
            event_tx,
            cancel_token: CancellationToken::new(),
            running: Arc::new(AtomicBool::new(false)),
            worker_states: Arc::new(worker_states),
        })
    }

    /// Subscribe to run events
    ///
    /// Events sent before subscribing are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// The active configuration
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Request a graceful stop
    ///
    /// No new IDs are dispatched; tasks already in flight finish normally.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Token observed by the scheduler; cancelling it is the same as [`cancel`](Self::cancel)
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Whether a run is in progress
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Current state of every worker, indexed by worker number
    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.worker_states
            .iter()
            .map(|s| WorkerState::from_u8(s.load(Ordering::Acquire)))
            .collect()
    }

    /// Harvest every ID in `range`
    ///
    /// Returns once all workers have stopped, either because the range is
    /// exhausted or because cancellation was requested.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyRunning`] if another run is in progress on this harvester
    /// - [`Error::Io`] if the output root cannot be created
    ///
    /// Per-ID failures never surface here; they are part of the summary.
    pub async fn run(&self, range: IdRange) -> Result<RunSummary> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyRunning);
        }
        let _running = RunningGuard(&self.running);

        let output = OutputTree::new(&self.config.output_dir);
        output.prepare().await.map_err(|e| {
            tracing::error!(
                path = %self.config.output_dir.display(),
                error = %e,
                "Failed to create output directory"
            );
            Error::Io(std::io::Error::new(
                e.kind(),
                format!(
                    "failed to create output directory '{}': {}",
                    self.config.output_dir.display(),
                    e
                ),
            ))
        })?;

        let workers = self.config.workers;
        let aggregator = Arc::new(ProgressAggregator::new(range.len(), self.event_tx.clone()));
        let cursor = range.cursor();

        for state in self.worker_states.iter() {
            state.store(WorkerState::Idle as u8, Ordering::Release);
        }

        tracing::info!(
            range = %range,
            total = range.len(),
            workers,
            output = %self.config.output_dir.display(),
            "Starting harvest"
        );
        self.event_tx
            .send(Event::Started {
                total: range.len(),
                workers,
            })
            .ok();

        let reporter_stop = CancellationToken::new();
        let reporter = aggregator.spawn_reporter(self.config.progress_interval, reporter_stop.clone());
        let cancel_notice = self.spawn_cancel_notice(reporter_stop.clone());

        let ctx = Arc::new(WorkerContext {
            api: Arc::clone(&self.api),
            output,
            aggregator: Arc::clone(&aggregator),
            cursor,
            retry: self.config.retry.clone(),
            request_delay: self.config.request_delay,
            cancel: self.cancel_token.clone(),
            states: Arc::clone(&self.worker_states),
            in_flight: (0..workers).map(|_| AtomicU64::new(0)).collect(),
        });

        let mut handles: Vec<_> = (0..workers)
            .map(|index| (index, tokio::spawn(worker::run_worker(index, Arc::clone(&ctx)))))
            .collect();

        while !handles.is_empty() {
            let (indices, tasks): (Vec<_>, Vec<_>) = handles.drain(..).unzip();
            for (index, result) in indices.into_iter().zip(join_all(tasks).await) {
                let Err(e) = result else {
                    continue;
                };
                tracing::error!(worker = index, error = %e, "Worker task terminated abnormally");
                self.record_aborted(&ctx, index, &e.to_string());

                // A replacement drains whatever the lost worker left behind
                if !self.cancel_token.is_cancelled() && ctx.cursor.remaining().is_some() {
                    tracing::warn!(worker = index, "Restarting worker");
                    handles.push((index, tokio::spawn(worker::run_worker(index, Arc::clone(&ctx)))));
                }
            }
        }

        reporter_stop.cancel();
        if let Err(e) = reporter.await {
            tracing::warn!(error = %e, "Progress reporter terminated abnormally");
        }
        cancel_notice.await.ok();

        let cancelled = self.cancel_token.is_cancelled();
        let summary = aggregator.summary(cancelled, ctx.cursor.remaining());

        self.event_tx
            .send(Event::Finished {
                snapshot: aggregator.snapshot(),
                cancelled,
            })
            .ok();

        tracing::info!(
            attempted = summary.attempted,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            cancelled,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Harvest finished"
        );

        Ok(summary)
    }

    /// Give the ID a dead worker was holding its terminal outcome
    fn record_aborted(&self, ctx: &WorkerContext, index: usize, reason: &str) {
        let last_state = self
            .worker_states
            .get(index)
            .map_or(WorkerState::Stopped, |state| {
                WorkerState::from_u8(state.swap(WorkerState::Stopped as u8, Ordering::AcqRel))
            });
        if let Some(id) = ctx.take_in_flight(index) {
            ctx.aggregator.record(TaskRecord {
                id,
                outcome: worker::aborted(last_state, reason),
            });
        }
    }

    /// Broadcast `CancelRequested` once if the run is cancelled before it ends
    fn spawn_cancel_notice(&self, run_done: CancellationToken) -> tokio::task::JoinHandle<()> {
        let token = self.cancel_token.clone();
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::warn!("Cancellation requested, draining in-flight tasks");
                    event_tx.send(Event::CancelRequested).ok();
                }
                _ = run_done.cancelled() => {}
            }
        })
    }
}
