//! Core types for skin-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::range::IdRange;

/// Identifier of a texture on the remote service, as requested by the crawler
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SkinId(pub u64);

impl SkinId {
    /// Get the inner u64 value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for SkinId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for SkinId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Texture type as declared by the API's `type` field
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    /// Classic (4px arm) player skin
    Steve,
    /// Slim (3px arm) player skin
    Alex,
    /// Cape texture
    Cape,
    /// Anything the crawler does not recognise
    Unknown,
}

impl AssetType {
    /// Parse the raw API value; unrecognised values become [`AssetType::Unknown`]
    pub fn from_api(raw: &str) -> Self {
        match raw.trim() {
            "steve" => AssetType::Steve,
            "alex" => AssetType::Alex,
            "cape" => AssetType::Cape,
            _ => AssetType::Unknown,
        }
    }
}

/// Destination category, one sub-directory of the output root each
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Player skins (steve and alex)
    Skins,
    /// Capes
    Capes,
    /// Everything else
    Others,
}

impl Category {
    /// Every category, in directory order
    pub const ALL: [Category; 3] = [Category::Skins, Category::Capes, Category::Others];

    /// Name of the sub-directory under the output root
    pub fn dir_name(&self) -> &'static str {
        match self {
            Category::Skins => "skins",
            Category::Capes => "capes",
            Category::Others => "others",
        }
    }
}

/// Metadata for one texture, parsed from a successful metadata response
///
/// Transient: built by the fetcher and consumed by the same worker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SkinRecord {
    /// The requested ID
    pub id: SkinId,
    /// The service's own texture id, if reported
    pub tid: Option<u64>,
    /// Display name (may be empty)
    pub name: String,
    /// Parsed texture type
    pub asset_type: AssetType,
    /// Raw `type` value as reported
    pub raw_type: String,
    /// Hash locating the texture file, if any
    pub content_hash: Option<String>,
    /// Declared size in bytes (advisory)
    pub size_bytes: Option<u64>,
}

/// Pipeline stage a task was in when it terminated
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Metadata lookup
    Fetch,
    /// Existing-file check
    Dedup,
    /// Texture transfer
    Download,
    /// Writing and publishing the file
    Write,
}

/// Terminal outcome of one task; exactly one is recorded per dispatched ID
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// The texture was downloaded and published
    Downloaded {
        /// Final path of the texture
        path: PathBuf,
        /// Bytes written
        bytes: u64,
    },
    /// A file already existed (or was being written) at the derived path
    SkippedDuplicate {
        /// The derived path
        path: PathBuf,
    },
    /// The record has no texture hash, or the texture does not exist server-side
    SkippedMissingAsset {
        /// Human-readable reason
        reason: String,
    },
    /// The task failed
    Failed {
        /// Stage that failed
        stage: Stage,
        /// Machine-readable error code
        code: String,
        /// Error message
        error: String,
    },
}

/// Which statistics counter an outcome feeds
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tally {
    /// `succeeded`
    Succeeded,
    /// `failed`
    Failed,
    /// `skipped`
    Skipped,
}

impl TaskOutcome {
    /// Counter this outcome is tallied under
    pub fn tally(&self) -> Tally {
        match self {
            TaskOutcome::Downloaded { .. } => Tally::Succeeded,
            TaskOutcome::SkippedDuplicate { .. } | TaskOutcome::SkippedMissingAsset { .. } => {
                Tally::Skipped
            }
            TaskOutcome::Failed { .. } => Tally::Failed,
        }
    }

    /// Short label used in log lines
    pub fn label(&self) -> &'static str {
        match self {
            TaskOutcome::Downloaded { .. } => "downloaded",
            TaskOutcome::SkippedDuplicate { .. } => "skipped-duplicate",
            TaskOutcome::SkippedMissingAsset { .. } => "skipped-missing-asset",
            TaskOutcome::Failed { .. } => "failed",
        }
    }
}

/// One entry of the outcome log
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// The requested ID
    pub id: SkinId,
    /// What happened to it
    #[serde(flatten)]
    pub outcome: TaskOutcome,
}

/// Lifecycle state of one worker
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum WorkerState {
    /// Waiting for the next ID
    Idle = 0,
    /// Requesting metadata
    Fetching = 1,
    /// Mapping the asset type to a category
    Classifying = 2,
    /// Checking for an existing file
    DedupChecking = 3,
    /// Transferring and writing the texture
    Downloading = 4,
    /// Recording the outcome
    Reporting = 5,
    /// Exited (range exhausted or cancelled)
    Stopped = 6,
}

impl WorkerState {
    /// Decode the atomic representation; unknown values read as `Stopped`
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Idle,
            1 => WorkerState::Fetching,
            2 => WorkerState::Classifying,
            3 => WorkerState::DedupChecking,
            4 => WorkerState::Downloading,
            5 => WorkerState::Reporting,
            _ => WorkerState::Stopped,
        }
    }
}

/// Point-in-time view of run progress
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// IDs in the requested range
    pub total: u64,
    /// Tasks that reached a terminal outcome
    pub attempted: u64,
    /// Downloaded
    pub succeeded: u64,
    /// Failed
    pub failed: u64,
    /// Skipped (duplicate or missing texture)
    pub skipped: u64,
    /// Time since the run started
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    /// Percentage of the range that reached a terminal outcome (0.0 to 100.0)
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.attempted as f64 / self.total as f64 * 100.0
    }
}

/// Final, immutable report of a run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSummary {
    /// IDs in the requested range
    pub total_requested: u64,
    /// Tasks that reached a terminal outcome
    pub attempted: u64,
    /// Downloaded
    pub succeeded: u64,
    /// Failed
    pub failed: u64,
    /// Skipped (duplicate or missing texture)
    pub skipped: u64,
    /// Wall-clock duration of the run
    pub elapsed: Duration,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run finished
    pub finished_at: DateTime<Utc>,
    /// Whether the run was cancelled before the range was exhausted
    pub cancelled: bool,
    /// IDs that were never dispatched, if any
    pub not_attempted: Option<IdRange>,
    /// Per-ID terminal outcomes, in completion order
    pub outcomes: Vec<TaskRecord>,
}

impl RunSummary {
    /// Share of attempted tasks that downloaded a texture (0.0 to 100.0)
    pub fn success_rate(&self) -> f64 {
        self.succeeded as f64 / self.attempted.max(1) as f64 * 100.0
    }

    /// Outcome-log entries that ended as failed
    pub fn failures(&self) -> impl Iterator<Item = &TaskRecord> {
        self.outcomes
            .iter()
            .filter(|r| matches!(r.outcome, TaskOutcome::Failed { .. }))
    }

    /// Outcome for a given ID, if it reached a terminal outcome
    pub fn outcome_of(&self, id: SkinId) -> Option<&TaskOutcome> {
        self.outcomes
            .iter()
            .find(|r| r.id == id)
            .map(|r| &r.outcome)
    }
}

/// Events broadcast by a [`Harvester`](crate::Harvester)
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A run started
    Started {
        /// IDs in the range
        total: u64,
        /// Worker count
        workers: usize,
    },
    /// A task reached its terminal outcome
    TaskFinished(TaskRecord),
    /// Periodic progress snapshot
    Progress(ProgressSnapshot),
    /// Cancellation was requested; in-flight tasks are draining
    CancelRequested,
    /// The run ended
    Finished {
        /// Final counters
        snapshot: ProgressSnapshot,
        /// Whether the run was cancelled
        cancelled: bool,
    },
}
