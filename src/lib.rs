//! # classmirror
//!
//! Resumable mirror of remote learning-management course trees to a local
//! directory.
//!
//! ## Design Philosophy
//!
//! classmirror is designed to be:
//! - **Provider-agnostic** - one capability interface over unrelated remote
//!   systems (a cookie-session LMS, an OAuth classroom API)
//! - **Resumable** - a durable per-course manifest means interrupted runs
//!   pick up where they left off without refetching completed work
//! - **Unattended-safe** - bounded concurrency, retry with backoff,
//!   rate-limit throttling, and cancellation that never corrupts state
//! - **Library-first** - no CLI or UI; credentials and argument parsing are
//!   the embedding application's concern
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use classmirror::{BrightspaceProvider, SyncConfig, SyncOrchestrator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Client carries the session cookies; acquiring them is up to you
//!     let http = reqwest::Client::builder().cookie_store(true).build()?;
//!     let provider = Arc::new(BrightspaceProvider::new(
//!         http,
//!         url::Url::parse("https://school.brightspace.com")?,
//!         None,
//!     ));
//!
//!     let orchestrator = SyncOrchestrator::new(provider, SyncConfig::default());
//!     tokio::spawn(classmirror::cancel_on_signal(orchestrator.cancel_token()));
//!
//!     for report in orchestrator.run_all().await? {
//!         print!("{report}");
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Download executor (bounded concurrency, retry, atomic writes)
pub mod executor;
/// Sync orchestrator (composition root of one run)
pub mod orchestrator;
/// Path normalization
pub mod paths;
/// Remote content providers
pub mod provider;
/// End-of-run reporting
pub mod report;
/// Retry logic with exponential backoff
pub mod retry;
/// Durable sync state manifest
pub mod state;
/// Content tree model
pub mod types;

// Re-export commonly used types
pub use config::{RetryConfig, SyncConfig};
pub use error::{Error, Result};
pub use executor::DownloadExecutor;
pub use orchestrator::SyncOrchestrator;
pub use provider::{BrightspaceProvider, ClassroomProvider, ContentProvider, ContentStream};
pub use report::{FailureEntry, SyncReport};
pub use state::{FetchOutcome, StateStore, SyncRecord, SyncStatus, WorkItem};
pub use types::{
    ContentRef, Course, ItemKind, Node, NodeKind, PlannedItem, ProviderKind, RemoteId,
};

use tokio_util::sync::CancellationToken;

/// Cancel the given token when a termination signal arrives.
///
/// Spawn this alongside a run to make Ctrl+C stop dispatching new items
/// promptly while in-flight items finish or abort cleanly.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal
///   registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub async fn cancel_on_signal(token: CancellationToken) {
    wait_for_signal().await;
    tracing::info!("Termination signal received, cancelling run");
    token.cancel();
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Signal registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
