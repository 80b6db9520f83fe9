//! # skin-dl
//!
//! Concurrent range harvester for Blessing Skin texture libraries such as
//! [LittleSkin](https://littleskin.cn).
//!
//! Given an inclusive ID range, skin-dl looks up every texture's metadata,
//! sorts it into `skins/`, `capes/` or `others/`, skips files already on disk
//! and downloads the rest, with bounded retries, per-worker request spacing and
//! graceful cancellation.
//!
//! ## Quick Start
//!
//! ```no_run
//! use skin_dl::{Config, Harvester, IdRange};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let harvester = Harvester::new(Config::default())?;
//!
//!     // Stop gracefully on Ctrl+C
//!     tokio::spawn(skin_dl::cancel_on_signal(harvester.cancellation_token()));
//!
//!     // Subscribe to events
//!     let mut events = harvester.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let summary = harvester.run(IdRange::new(1, 500)?).await?;
//!     println!("{} downloaded, {} failed", summary.succeeded, summary.failed);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Metadata and texture endpoints
pub mod client;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Range harvester (worker pool)
pub mod harvester;
/// Output tree layout, dedup and atomic publish
pub mod output;
/// Per-worker request spacing
pub mod pacer;
/// Run statistics and progress reporting
pub mod progress;
/// ID ranges and the dispatch cursor
pub mod range;
/// Retry logic with bounded attempts
pub mod retry;
/// Core types and events
pub mod types;

use tokio_util::sync::CancellationToken;

// Re-export commonly used types
pub use client::{HttpSkinApi, SkinApi};
pub use config::{ApiConfig, Config, RetryConfig};
pub use error::{Error, Result, TaskError};
pub use harvester::Harvester;
pub use range::IdRange;
pub use types::{
    AssetType, Category, Event, ProgressSnapshot, RunSummary, SkinId, SkinRecord, Stage,
    TaskOutcome, TaskRecord, WorkerState,
};

/// Cancel `token` when the process receives a termination signal
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// Returns early, without waiting for a signal, if the token is cancelled by
/// someone else first.
///
/// # Example
///
/// ```no_run
/// use skin_dl::{Config, Harvester, IdRange, cancel_on_signal};
///
/// # async fn example() -> skin_dl::Result<()> {
/// let harvester = Harvester::new(Config::default())?;
/// tokio::spawn(cancel_on_signal(harvester.cancellation_token()));
/// harvester.run(IdRange::new(1, 10)?).await?;
/// # Ok(())
/// # }
/// ```
pub async fn cancel_on_signal(token: CancellationToken) {
    tokio::select! {
        signal = wait_for_signal() => {
            tracing::warn!(signal, "Stopping harvest after in-flight tasks finish");
            token.cancel();
        }
        _ = token.cancelled() => {}
    }
}

/// Resolve on SIGINT or SIGTERM, naming the signal received
///
/// Falls back to [`tokio::signal::ctrl_c`] when a handler cannot be
/// registered (some containers and test harnesses forbid it).
#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{Signal, SignalKind, signal};

    async fn next(stream: Option<&mut Signal>) {
        match stream {
            Some(stream) => {
                stream.recv().await;
            }
            None => std::future::pending().await,
        }
    }

    let mut interrupt = signal(SignalKind::interrupt())
        .inspect_err(|e| tracing::warn!(error = %e, "Could not register SIGINT handler"))
        .ok();
    let mut terminate = signal(SignalKind::terminate())
        .inspect_err(|e| tracing::warn!(error = %e, "Could not register SIGTERM handler"))
        .ok();

    if interrupt.is_none() && terminate.is_none() {
        return ctrl_c_fallback().await;
    }

    tokio::select! {
        _ = next(interrupt.as_mut()) => "SIGINT",
        _ = next(terminate.as_mut()) => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    ctrl_c_fallback().await
}

async fn ctrl_c_fallback() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C, cancellation only via token");
        std::future::pending::<()>().await;
    }
    "Ctrl+C"
}
