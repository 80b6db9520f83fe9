//! Error types for skin-dl
//!
//! Two layers of errors exist:
//! - [`Error`] is run-level. Returning it from [`Harvester::run`](crate::Harvester::run)
//!   means the run never started or could not continue at all.
//! - [`TaskError`] is per-ID. It never escapes the worker pool; it is folded into a
//!   [`TaskOutcome`](crate::types::TaskOutcome) and recorded by the progress aggregator.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for skin-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for skin-dl
#[derive(Debug, Error)]
pub enum Error {
    /// The requested ID range is empty, reversed or contains non-positive bounds
    #[error("invalid ID range {start}..={end}: bounds must be positive and start <= end")]
    InvalidRange {
        /// Requested first ID
        start: i64,
        /// Requested last ID
        end: i64,
    },

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "workers")
        key: Option<String>,
    },

    /// I/O error (e.g. the output root cannot be created)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client construction or transport error outside a task
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A run is already in progress on this harvester
    #[error("a harvest run is already in progress")]
    AlreadyRunning,

    /// A per-task failure lifted to run level
    #[error("task error: {0}")]
    Task(#[from] TaskError),
}

impl Error {
    /// Shorthand for a configuration error tied to a key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}

/// Per-task failures raised by the fetcher, downloader and writer
#[derive(Debug, Error)]
pub enum TaskError {
    /// The metadata endpoint reports that the ID does not exist
    #[error("skin {id} not found")]
    NotFound {
        /// The requested ID
        id: u64,
    },

    /// The texture referenced by the metadata does not exist
    #[error("texture {hash} not found")]
    AssetNotFound {
        /// Content hash used to locate the texture
        hash: String,
    },

    /// The metadata body could not be parsed into a skin record
    #[error("malformed metadata for skin {id}: {reason}")]
    MalformedResponse {
        /// The requested ID
        id: u64,
        /// Parser error or description of the unexpected shape
        reason: String,
    },

    /// Timeout, connection failure, server-side error status or truncated body
    #[error("transient network error: {reason}")]
    Transient {
        /// What went wrong
        reason: String,
    },

    /// A non-success status that is neither "not found" nor server-side
    #[error("unexpected HTTP status {status} from {url}")]
    UnexpectedStatus {
        /// HTTP status code
        status: u16,
        /// Requested URL
        url: String,
    },

    /// The texture could not be written to local storage
    #[error("failed to write {path}: {source}")]
    Write {
        /// Destination (or temporary) path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A retryable failure persisted past the retry budget
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Total number of attempts made (initial + retries)
        attempts: u32,
        /// The last observed failure
        last: Box<TaskError>,
    },
}

impl TaskError {
    /// Build a transient error from anything displayable
    pub fn transient(reason: impl std::fmt::Display) -> Self {
        TaskError::Transient {
            reason: reason.to_string(),
        }
    }

    /// Short machine-readable code, used in the outcome log
    pub fn code(&self) -> &'static str {
        match self {
            TaskError::NotFound { .. } => "not_found",
            TaskError::AssetNotFound { .. } => "asset_not_found",
            TaskError::MalformedResponse { .. } => "malformed_response",
            TaskError::Transient { .. } => "transient",
            TaskError::UnexpectedStatus { .. } => "unexpected_status",
            TaskError::Write { .. } => "write_error",
            TaskError::RetriesExhausted { .. } => "retries_exhausted",
        }
    }

    /// The innermost failure, looking through [`TaskError::RetriesExhausted`]
    pub fn root(&self) -> &TaskError {
        match self {
            TaskError::RetriesExhausted { last, .. } => last.root(),
            other => other,
        }
    }
}
