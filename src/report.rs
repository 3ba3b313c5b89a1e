//! End-of-run accounting: what was fetched, what was skipped, and the
//! ordered list of items the run could not materialize.
//!
//! Purely a read of the executor's final outcomes; the reporter keeps no
//! state of its own.

use std::path::PathBuf;
use std::time::Duration;

use crate::state::{FetchOutcome, WorkItem};
use crate::types::{Course, RemoteId};

/// One unrecoverable per-item failure
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailureEntry {
    /// Remote identifier of the failed item
    pub id: RemoteId,
    /// Path the item would have been written to, relative to the course dir
    pub path: PathBuf,
    /// Last error reason
    pub reason: String,
}

/// Final accounting for one course's run.
///
/// A run is complete when the work queue drains, however many items ended
/// failed — partial failure is a reportable outcome, not a run-level error.
#[derive(Clone, Debug)]
pub struct SyncReport {
    /// The course that was synchronized
    pub course: Course,
    /// Leaf items enumerated from the remote tree
    pub planned: usize,
    /// Items already up to date (no fetch needed)
    pub up_to_date: usize,
    /// Items fetched and finalized this run
    pub fetched: usize,
    /// Items recorded as skipped (unsupported or filtered)
    pub skipped: usize,
    /// Queued items cancelled before an outcome was recorded — retried on
    /// the next run
    pub cancelled: usize,
    /// Terminal failures, ordered by path
    pub failures: Vec<FailureEntry>,
    /// Wall-clock duration of the run
    pub elapsed: Duration,
}

impl SyncReport {
    /// Build a report from the executor's outcomes.
    ///
    /// `queued` is the length of the run's work list; queued items with no
    /// recorded outcome were cancelled in flight and are counted as
    /// `cancelled`, not as up to date.
    pub fn from_outcomes(
        course: Course,
        planned: usize,
        queued: usize,
        outcomes: &[(WorkItem, FetchOutcome)],
        elapsed: Duration,
    ) -> Self {
        let mut fetched = 0;
        let mut skipped = 0;
        let mut failures = Vec::new();
        for (item, outcome) in outcomes {
            match outcome {
                FetchOutcome::Done { .. } => fetched += 1,
                FetchOutcome::Skipped { .. } => skipped += 1,
                FetchOutcome::Failed { reason } => failures.push(FailureEntry {
                    id: item.id.clone(),
                    path: item.path.clone(),
                    reason: reason.clone(),
                }),
            }
        }
        failures.sort_by(|a, b| a.path.cmp(&b.path));
        Self {
            course,
            planned,
            up_to_date: planned.saturating_sub(queued),
            fetched,
            skipped,
            cancelled: queued.saturating_sub(outcomes.len()),
            failures,
            elapsed,
        }
    }

    /// True if every work item was materialized or deliberately skipped
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

impl std::fmt::Display for SyncReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{} [{}]: {} fetched, {} up to date, {} skipped, {} failed ({:.1}s)",
            self.course.name,
            self.course.id,
            self.fetched,
            self.up_to_date,
            self.skipped,
            self.failures.len(),
            self.elapsed.as_secs_f64(),
        )?;
        if self.cancelled > 0 {
            writeln!(f, "  {} item(s) cancelled in flight, retried next run", self.cancelled)?;
        }
        for failure in &self.failures {
            writeln!(
                f,
                "  FAILED {} ({}): {}",
                failure.path.display(),
                failure.id,
                failure.reason
            )?;
        }
        Ok(())
    }
}
