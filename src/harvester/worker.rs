//! One worker: pull an ID, run it to a terminal outcome, record, repeat

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::client::SkinApi;
use crate::config::RetryConfig;
use crate::error::TaskError;
use crate::output::{Claim, OutputTree, PublishResult};
use crate::pacer::RequestPacer;
use crate::progress::ProgressAggregator;
use crate::range::IdCursor;
use crate::retry::with_retry;
use crate::types::{SkinId, Stage, TaskOutcome, TaskRecord, WorkerState};

/// Everything the workers of one run share
pub(crate) struct WorkerContext {
    pub(crate) api: Arc<dyn SkinApi>,
    pub(crate) output: OutputTree,
    pub(crate) aggregator: Arc<ProgressAggregator>,
    pub(crate) cursor: IdCursor,
    pub(crate) retry: RetryConfig,
    pub(crate) request_delay: Duration,
    pub(crate) cancel: CancellationToken,
    pub(crate) states: Arc<Vec<AtomicU8>>,
    /// ID each worker is processing, 0 when none
    pub(crate) in_flight: Vec<AtomicU64>,
}

impl WorkerContext {
    /// Clear and return the ID worker `index` had not yet recorded, if any
    pub(crate) fn take_in_flight(&self, index: usize) -> Option<SkinId> {
        match self.in_flight.get(index)?.swap(0, Ordering::AcqRel) {
            0 => None,
            id => Some(SkinId(id)),
        }
    }

    fn set_in_flight(&self, index: usize, id: u64) {
        if let Some(slot) = self.in_flight.get(index) {
            slot.store(id, Ordering::Release);
        }
    }
}

/// Worker loop; returns when the cursor is exhausted or the run is cancelled
pub(crate) async fn run_worker(index: usize, ctx: Arc<WorkerContext>) {
    let fallback = AtomicU8::new(WorkerState::Idle as u8);
    let state = ctx.states.get(index).unwrap_or(&fallback);
    let pacer = RequestPacer::new(ctx.request_delay);

    tracing::debug!(worker = index, "Worker started");

    loop {
        set_state(state, WorkerState::Idle);

        // Checked before every pull so no new ID is dispatched after cancel
        if ctx.cancel.is_cancelled() {
            tracing::debug!(worker = index, "Worker observed cancellation");
            break;
        }

        let Some(id) = ctx.cursor.next() else {
            break;
        };

        ctx.set_in_flight(index, id.get());
        let outcome = process_id(&ctx, &pacer, state, id).await;

        set_state(state, WorkerState::Reporting);
        log_outcome(index, id, &outcome);
        ctx.aggregator.record(TaskRecord { id, outcome });
        ctx.set_in_flight(index, 0);
    }

    set_state(state, WorkerState::Stopped);
    tracing::debug!(worker = index, "Worker stopped");
}

fn set_state(state: &AtomicU8, value: WorkerState) {
    state.store(value as u8, Ordering::Release);
}

/// Outcome for an ID whose worker task died before recording it
pub(crate) fn aborted(state: WorkerState, reason: &str) -> TaskOutcome {
    let stage = match state {
        WorkerState::Fetching => Stage::Fetch,
        WorkerState::Classifying | WorkerState::DedupChecking => Stage::Dedup,
        WorkerState::Downloading => Stage::Download,
        WorkerState::Idle | WorkerState::Reporting | WorkerState::Stopped => Stage::Write,
    };
    TaskOutcome::Failed {
        stage,
        code: "worker_aborted".to_string(),
        error: format!("worker terminated abnormally: {reason}"),
    }
}

fn failed(stage: Stage, error: &TaskError) -> TaskOutcome {
    TaskOutcome::Failed {
        stage,
        code: error.code().to_string(),
        error: error.to_string(),
    }
}

/// Run one ID through fetch, classify, dedup and download
pub(crate) async fn process_id(
    ctx: &WorkerContext,
    pacer: &RequestPacer,
    state: &AtomicU8,
    id: SkinId,
) -> TaskOutcome {
    let api: &dyn SkinApi = ctx.api.as_ref();

    set_state(state, WorkerState::Fetching);
    let fetched = with_retry(&ctx.retry, move || async move {
        pacer.acquire().await;
        api.fetch_record(id).await
    })
    .await
    .map_err(TaskError::from);

    let record = match fetched {
        Ok(record) => record,
        Err(e) => return failed(Stage::Fetch, &e),
    };

    set_state(state, WorkerState::Classifying);
    let Some(hash) = record.content_hash.as_deref() else {
        return TaskOutcome::SkippedMissingAsset {
            reason: "record has no texture hash".to_string(),
        };
    };
    let dest = ctx.output.destination(&record);

    set_state(state, WorkerState::DedupChecking);
    let guard = match ctx.output.claim(&dest).await {
        Ok(Claim::Fresh(guard)) => guard,
        Ok(Claim::Duplicate) => {
            return TaskOutcome::SkippedDuplicate {
                path: dest.path().to_path_buf(),
            };
        }
        Err(e) => return failed(Stage::Dedup, &e),
    };

    set_state(state, WorkerState::Downloading);
    let downloaded = with_retry(&ctx.retry, move || async move {
        pacer.acquire().await;
        api.fetch_asset(hash).await
    })
    .await
    .map_err(TaskError::from);

    let body = match downloaded {
        Ok(body) => body,
        Err(TaskError::AssetNotFound { hash }) => {
            return TaskOutcome::SkippedMissingAsset {
                reason: format!("texture {} not found", hash),
            };
        }
        Err(e) => return failed(Stage::Download, &e),
    };

    let outcome = match ctx.output.publish(&dest, body).await {
        Ok(PublishResult::Written { bytes }) => TaskOutcome::Downloaded {
            path: dest.path().to_path_buf(),
            bytes,
        },
        Ok(PublishResult::AlreadyExists) => TaskOutcome::SkippedDuplicate {
            path: dest.path().to_path_buf(),
        },
        Err(e) => failed(Stage::Write, &e),
    };

    drop(guard);
    outcome
}

fn log_outcome(worker: usize, id: SkinId, outcome: &TaskOutcome) {
    match outcome {
        TaskOutcome::Downloaded { path, bytes } => {
            tracing::info!(
                worker,
                skin_id = id.get(),
                path = %path.display(),
                bytes,
                "Downloaded texture"
            );
        }
        TaskOutcome::SkippedDuplicate { path } => {
            tracing::info!(
                worker,
                skin_id = id.get(),
                path = %path.display(),
                "File already exists, skipping"
            );
        }
        TaskOutcome::SkippedMissingAsset { reason } => {
            tracing::debug!(worker, skin_id = id.get(), reason = %reason, "No texture to download");
        }
        TaskOutcome::Failed { code, error, .. } if code == "not_found" => {
            tracing::debug!(worker, skin_id = id.get(), error = %error, "Skin not found");
        }
        TaskOutcome::Failed { stage, code, error } => {
            tracing::warn!(
                worker,
                skin_id = id.get(),
                stage = ?stage,
                code = %code,
                error = %error,
                "Task failed"
            );
        }
    }
}
