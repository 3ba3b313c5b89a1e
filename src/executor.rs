//! Download executor: turns a work list into files on disk with bounded
//! concurrency, retry with backoff, and atomic finalization.
//!
//! Contract per item: stream to a `.part` temp file in the destination
//! directory, fsync, atomically rename into place, then durably record the
//! outcome — in that order, so a resumed run never trusts a `Done` record
//! for a file that was not finalized. One item's terminal failure never
//! aborts the batch.

use futures::StreamExt;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::paths::is_video;
use crate::provider::ContentProvider;
use crate::retry::fetch_with_retry;
use crate::state::{FetchOutcome, StateStore, WorkItem};
use crate::types::ItemKind;

/// Consecutive local I/O failures before the run aborts early instead of
/// failing every remaining item identically (disk full, revoked permissions)
const LOCAL_IO_ABORT_THRESHOLD: usize = 5;

/// Shared context cloned into each worker task
struct WorkerContext {
    provider: Arc<dyn ContentProvider>,
    store: Arc<StateStore>,
    config: SyncConfig,
    dest: PathBuf,
    cancel: CancellationToken,
    /// Deadline all workers wait out after a rate-limit signal
    cooldown_until: Mutex<Option<Instant>>,
    /// Consecutive local I/O failures, reset on any success
    local_io_failures: AtomicUsize,
}

/// Concurrency-bounded fetch pipeline for one course's work list
pub struct DownloadExecutor {
    ctx: Arc<WorkerContext>,
}

impl DownloadExecutor {
    /// Create an executor writing under `dest` (the course output directory)
    pub fn new(
        provider: Arc<dyn ContentProvider>,
        store: Arc<StateStore>,
        config: SyncConfig,
        dest: PathBuf,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            ctx: Arc::new(WorkerContext {
                provider,
                store,
                config,
                dest,
                cancel,
                cooldown_until: Mutex::new(None),
                local_io_failures: AtomicUsize::new(0),
            }),
        }
    }

    /// Drain the work list and return each item's recorded outcome.
    ///
    /// Cancelled in-flight items are omitted: their temp file is discarded
    /// and no record is written, so the next run retries them. Duplicate
    /// remote ids in the input are dispatched at most once.
    pub async fn run(&self, work: Vec<WorkItem>) -> Vec<(WorkItem, FetchOutcome)> {
        let semaphore = Arc::new(Semaphore::new(self.ctx.config.workers.max(1)));
        let mut in_flight: HashSet<crate::types::RemoteId> = HashSet::new();
        let mut tasks = JoinSet::new();

        for item in work {
            if self.ctx.cancel.is_cancelled() {
                tracing::info!("Cancellation requested, not dispatching further items");
                break;
            }
            if !in_flight.insert(item.id.clone()) {
                tracing::warn!(item_id = %item.id, "Duplicate work item, dispatching only once");
                continue;
            }

            let permit = tokio::select! {
                _ = self.ctx.cancel.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
            };

            let ctx = Arc::clone(&self.ctx);
            tasks.spawn(async move {
                let _permit = permit;
                let outcome = process_item(&ctx, &item).await;
                (item, outcome)
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((item, Some(outcome))) => outcomes.push((item, outcome)),
                Ok((item, None)) => {
                    tracing::debug!(item_id = %item.id, "Item aborted by cancellation, no outcome recorded");
                }
                Err(e) => tracing::error!(error = %e, "Worker task panicked"),
            }
        }
        outcomes
    }

    /// True once the local I/O circuit breaker has tripped.
    ///
    /// The breaker cancels this executor's token; callers syncing multiple
    /// courses should check this after [`run`](DownloadExecutor::run) and stop
    /// the whole run, since a disk-full or revoked-permission condition will
    /// recur identically for every remaining course.
    pub fn local_io_aborted(&self) -> bool {
        self.ctx.local_io_failures.load(Ordering::SeqCst) >= LOCAL_IO_ABORT_THRESHOLD
    }
}

/// Fetch one item to completion and record its outcome.
///
/// Returns `None` only when the run was cancelled mid-item: nothing is
/// recorded so the next run retries it.
async fn process_item(ctx: &WorkerContext, item: &WorkItem) -> Option<FetchOutcome> {
    let outcome = match skip_reason(ctx, item) {
        Some(reason) => {
            tracing::info!(item_id = %item.id, path = %item.path.display(), reason = %reason, "Skipping item");
            FetchOutcome::Skipped { reason }
        }
        None => {
            let result = fetch_with_retry(&ctx.config.retry, || fetch_once(ctx, item)).await;
            match result {
                Ok(()) => {
                    ctx.local_io_failures.store(0, Ordering::SeqCst);
                    tracing::info!(item_id = %item.id, path = %item.path.display(), "Item fetched");
                    FetchOutcome::Done {
                        version: item.version.clone(),
                    }
                }
                Err(Error::Cancelled) => return None,
                Err(Error::UnsupportedContent(reason)) => {
                    tracing::info!(item_id = %item.id, reason = %reason, "Skipping item");
                    FetchOutcome::Skipped { reason }
                }
                Err(e) => {
                    if let Error::Io(_) = &e {
                        let failures = ctx.local_io_failures.fetch_add(1, Ordering::SeqCst) + 1;
                        if failures >= LOCAL_IO_ABORT_THRESHOLD {
                            tracing::error!(
                                failures = failures,
                                "Repeated local I/O failures, aborting run early"
                            );
                            ctx.cancel.cancel();
                        }
                    }
                    tracing::warn!(item_id = %item.id, path = %item.path.display(), error = %e, "Item failed");
                    FetchOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
            }
        }
    };

    if let Err(e) = ctx.store.record_outcome(item, outcome.clone()).await {
        tracing::error!(item_id = %item.id, error = %e, "Failed to persist item outcome");
    }
    Some(outcome)
}

/// Short-circuit reasons that never touch the network
fn skip_reason(ctx: &WorkerContext, item: &WorkItem) -> Option<String> {
    if ctx.config.skip_videos && (item.kind == ItemKind::Video || is_video(&item.path)) {
        return Some("video excluded by filter".to_string());
    }
    if item.content.is_none() || item.kind == ItemKind::Unsupported {
        return Some("unsupported type".to_string());
    }
    None
}

/// One fetch attempt: open the content stream, write it to a temp file next
/// to the destination, and atomically rename into place.
async fn fetch_once(ctx: &WorkerContext, item: &WorkItem) -> Result<()> {
    wait_for_cooldown(ctx).await?;
    if ctx.cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    // skip_reason already filtered content-less items
    let content = item
        .content
        .as_ref()
        .ok_or_else(|| Error::UnsupportedContent("no content reference".to_string()))?;

    let stream = match ctx.provider.open_content(content).await {
        Ok(stream) => stream,
        Err(e) => {
            if let Error::RateLimited { retry_after } = &e {
                start_cooldown(ctx, *retry_after).await;
            }
            return Err(e);
        }
    };

    let final_path = ctx.dest.join(&item.path);
    if let Some(parent) = final_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp_path = part_path(&final_path);

    let write_result = write_stream(ctx, stream, &tmp_path).await;
    if let Err(e) = write_result {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        if let Error::RateLimited { retry_after } = &e {
            start_cooldown(ctx, *retry_after).await;
        }
        return Err(e);
    }

    // Rename is atomic on the same filesystem: a reader (or a crashed,
    // resumed run) never observes a partially written final file
    tokio::fs::rename(&tmp_path, &final_path).await?;
    Ok(())
}

async fn write_stream(
    ctx: &WorkerContext,
    mut stream: crate::provider::ContentStream,
    tmp_path: &Path,
) -> Result<()> {
    let mut file = tokio::fs::File::create(tmp_path).await?;
    while let Some(chunk) = stream.next().await {
        if ctx.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        file.write_all(&chunk?).await?;
    }
    file.sync_all().await?;
    Ok(())
}

/// Temp-file path next to the final destination: `notes.pdf` -> `notes.pdf.part`
fn part_path(final_path: &Path) -> PathBuf {
    let mut name = final_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    final_path.with_file_name(name)
}

/// Sleep out any provider cooldown before attempting a fetch
async fn wait_for_cooldown(ctx: &WorkerContext) -> Result<()> {
    loop {
        let deadline = *ctx.cooldown_until.lock().await;
        let Some(deadline) = deadline else { return Ok(()) };
        if deadline <= Instant::now() {
            return Ok(());
        }
        tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep_until(deadline) => {}
        }
    }
}

/// Throttle the whole executor after a rate-limit signal
async fn start_cooldown(ctx: &WorkerContext, retry_after: Option<std::time::Duration>) {
    let window = retry_after.unwrap_or(ctx.config.rate_limit_cooldown);
    let deadline = Instant::now() + window;
    let mut cooldown = ctx.cooldown_until.lock().await;
    let extended = match *cooldown {
        Some(existing) => deadline > existing,
        None => true,
    };
    if extended {
        tracing::warn!(cooldown_secs = window.as_secs(), "Rate limited, throttling all workers");
        *cooldown = Some(deadline);
    }
}
