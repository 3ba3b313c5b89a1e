//! Sync orchestrator: wires enumeration, diffing, execution, and reporting
//! into one run.
//!
//! The orchestrator has no retry logic of its own — per-item resilience
//! lives in the executor, and enumeration errors for a course surface as
//! that course's run error. A run is complete when the work queue drains,
//! regardless of how many items ended failed.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::executor::DownloadExecutor;
use crate::paths::{PathNormalizer, sanitize_component};
use crate::provider::ContentProvider;
use crate::report::SyncReport;
use crate::state::{MANIFEST_FILE_NAME, StateStore};
use crate::types::{Course, RemoteId};

/// Drives sync runs for one provider
pub struct SyncOrchestrator {
    provider: Arc<dyn ContentProvider>,
    config: SyncConfig,
    cancel: CancellationToken,
}

impl SyncOrchestrator {
    /// Create an orchestrator over an already-authenticated provider
    pub fn new(provider: Arc<dyn ContentProvider>, config: SyncConfig) -> Self {
        Self {
            provider,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops dispatching new items promptly when cancelled;
    /// in-flight items finish or abort cleanly and are retried next run
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Enumerate the account's courses without syncing anything
    pub async fn list_courses(&self) -> Result<Vec<Course>> {
        self.provider.list_courses().await
    }

    /// Sync every course the provider enumerates.
    ///
    /// One course's enumeration failure is logged and does not stop the
    /// remaining courses; per-item failures are inside each report.
    pub async fn run_all(&self) -> Result<Vec<SyncReport>> {
        let courses = self.provider.list_courses().await?;
        tracing::info!(count = courses.len(), provider = %self.provider.kind(), "Enumerated courses");
        let mut reports = Vec::with_capacity(courses.len());
        for course in &courses {
            if self.cancel.is_cancelled() {
                tracing::info!("Cancellation requested, stopping before next course");
                break;
            }
            match self.run_course(course).await {
                Ok(report) => reports.push(report),
                Err(Error::Cancelled) => break,
                Err(e) => {
                    tracing::error!(course_id = %course.id, error = %e, "Course sync failed");
                }
            }
        }
        Ok(reports)
    }

    /// Sync the single course with the given remote id
    pub async fn run_course_id(&self, id: &RemoteId) -> Result<SyncReport> {
        let courses = self.provider.list_courses().await?;
        let course = courses
            .into_iter()
            .find(|c| c.id == *id)
            .ok_or_else(|| Error::CourseNotFound(id.to_string()))?;
        self.run_course(&course).await
    }

    /// Run one course: enumerate, diff against stored state, execute the
    /// work list, and report.
    pub async fn run_course(&self, course: &Course) -> Result<SyncReport> {
        let start = Instant::now();
        tracing::info!(course_id = %course.id, name = %course.name, "Syncing course");
        if self.config.force {
            tracing::info!(course_id = %course.id, "Force flag set, refetching all items");
        }

        let course_dir = self.course_dir(course);
        tokio::fs::create_dir_all(&course_dir).await?;
        let store = Arc::new(StateStore::load(
            &course_dir.join(MANIFEST_FILE_NAME),
            self.config.fresh_start,
        )?);

        // Enumeration is sequential and completes before any work is queued:
        // path assignment needs full ancestor context
        let tree = self.provider.list_tree(course).await?;
        let mut normalizer = PathNormalizer::new();
        let planned = tree.flatten(&mut normalizer)?;

        let work = store.diff(&planned, self.config.force).await;
        tracing::info!(
            course_id = %course.id,
            planned = planned.len(),
            to_fetch = work.len(),
            "Diffed tree against state"
        );
        store.mark_pending(&work).await?;

        let executor = DownloadExecutor::new(
            Arc::clone(&self.provider),
            Arc::clone(&store),
            self.config.clone(),
            course_dir,
            self.cancel.child_token(),
        );
        let queued = work.len();
        let outcomes = executor.run(work).await;
        if executor.local_io_aborted() {
            tracing::error!(
                course_id = %course.id,
                "Stopping the run after repeated local I/O failures"
            );
            self.cancel.cancel();
        }

        let report = SyncReport::from_outcomes(
            course.clone(),
            planned.len(),
            queued,
            &outcomes,
            start.elapsed(),
        );
        tracing::info!(
            course_id = %course.id,
            fetched = report.fetched,
            skipped = report.skipped,
            failed = report.failures.len(),
            "Course sync complete"
        );
        Ok(report)
    }

    /// Course output directory: the sanitized remote id under the
    /// destination root, stable however the course gets renamed upstream
    fn course_dir(&self, course: &Course) -> PathBuf {
        self.config.dest_root.join(sanitize_component(course.id.as_str()))
    }
}
