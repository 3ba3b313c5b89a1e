//! Sync state store: the durable per-course manifest that makes runs
//! resumable.
//!
//! One JSON manifest lives inside each course's output directory. Every
//! outcome write serializes the full record map to a temp file in the same
//! directory, fsyncs, and atomically renames it over the old manifest, so a
//! kill between writes loses at most the in-flight item and never corrupts
//! prior records. Records are never deleted; an item that disappears
//! upstream keeps its local copy and its record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::types::{ContentRef, ItemKind, PlannedItem, RemoteId};

/// Name of the per-course state manifest, stored inside the course output dir
pub const MANIFEST_FILE_NAME: &str = ".classmirror-state.json";

/// Per-item sync status, persisted in the manifest
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Seen this run, fetch not yet completed — a surviving `Pending` record
    /// means the run was interrupted and the item is retried next run
    Pending,
    /// Fetched and finalized on disk
    Done,
    /// Fetch failed permanently or exhausted retries — retried every run
    Failed,
    /// No download strategy (unsupported kind or filtered out)
    Skipped,
}

/// Persisted per-remote-id record
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRecord {
    /// Current status
    pub status: SyncStatus,
    /// Version marker at the last successful fetch, if the provider gave one
    #[serde(default)]
    pub version: Option<String>,
    /// Assigned local path, relative to the course output directory
    pub path: PathBuf,
    /// Failure or skip reason, if any
    #[serde(default)]
    pub reason: Option<String>,
    /// When the item was last attempted
    #[serde(default)]
    pub last_attempt: Option<DateTime<Utc>>,
}

/// Final outcome of one fetch attempt, reported by the executor
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchOutcome {
    /// File finalized at its path; marker recorded for change detection
    Done {
        /// Version marker observed at fetch time
        version: Option<String>,
    },
    /// Terminal failure after retries (or a permanent error)
    Failed {
        /// Last error reason
        reason: String,
    },
    /// No download strategy — not an error
    Skipped {
        /// Why the item was skipped
        reason: String,
    },
}

/// A planned item the current run decided needs fetching
#[derive(Clone, Debug)]
pub struct WorkItem {
    /// Remote identifier
    pub id: RemoteId,
    /// Display name
    pub name: String,
    /// Item kind
    pub kind: ItemKind,
    /// Content reference, if the provider exposed one
    pub content: Option<ContentRef>,
    /// Version marker observed during enumeration
    pub version: Option<String>,
    /// Path relative to the course output directory
    pub path: PathBuf,
}

impl From<&PlannedItem> for WorkItem {
    fn from(p: &PlannedItem) -> Self {
        Self {
            id: p.id.clone(),
            name: p.name.clone(),
            kind: p.kind,
            content: p.content.clone(),
            version: p.version.clone(),
            path: p.path.clone(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    records: HashMap<RemoteId, SyncRecord>,
}

/// Durable store of [`SyncRecord`]s for one course.
///
/// The single mutable shared resource of a run: all mutation goes through
/// [`record_outcome`](StateStore::record_outcome), serialized by an internal
/// lock, so it is safe under concurrent executor workers.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    inner: Mutex<Manifest>,
}

impl StateStore {
    /// Load the manifest at `path`, or start empty if the file is absent.
    ///
    /// An unreadable or unparsable manifest is [`Error::StateCorruption`]:
    /// the run refuses to start in resume mode rather than guess. Pass
    /// `fresh_start` to discard the corrupt manifest and start empty instead.
    pub fn load(path: &Path, fresh_start: bool) -> Result<Self> {
        let manifest = match std::fs::read(path) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Manifest::default(),
            Err(e) if fresh_start => {
                tracing::warn!(path = %path.display(), error = %e, "Discarding unreadable manifest (fresh start)");
                Manifest::default()
            }
            Err(e) => {
                return Err(Error::StateCorruption {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                });
            }
            Ok(bytes) => match serde_json::from_slice::<Manifest>(&bytes) {
                Ok(m) => m,
                Err(e) if fresh_start => {
                    tracing::warn!(path = %path.display(), error = %e, "Discarding unparsable manifest (fresh start)");
                    Manifest::default()
                }
                Err(e) => {
                    return Err(Error::StateCorruption {
                        path: path.to_path_buf(),
                        reason: e.to_string(),
                    });
                }
            },
        };
        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(manifest),
        })
    }

    /// Snapshot of all records (for reporting and tests)
    pub async fn records(&self) -> HashMap<RemoteId, SyncRecord> {
        self.inner.lock().await.records.clone()
    }

    /// Look up one record
    pub async fn get(&self, id: &RemoteId) -> Option<SyncRecord> {
        self.inner.lock().await.records.get(id).cloned()
    }

    /// Diff the enumerated tree against stored records to produce this run's
    /// work list.
    ///
    /// An item needs fetching iff no record exists, or `force` is set, or its
    /// version marker differs from the stored one, or its assigned path moved
    /// (an upstream rename), or its prior status was `Failed` (retried every
    /// run) or `Pending` (interrupted in-flight work from a killed run).
    /// `Done` and `Skipped` records with an unchanged marker are skipped —
    /// that is the resume guarantee. Folders never reach this function;
    /// [`Node::flatten`](crate::types::Node::flatten) emits leaves only.
    pub async fn diff(&self, planned: &[PlannedItem], force: bool) -> Vec<WorkItem> {
        let inner = self.inner.lock().await;
        planned
            .iter()
            .filter(|p| match inner.records.get(&p.id) {
                None => true,
                Some(_) if force => true,
                Some(r) => {
                    matches!(r.status, SyncStatus::Failed | SyncStatus::Pending)
                        || r.version != p.version
                        || r.path != p.path
                }
            })
            .map(WorkItem::from)
            .collect()
    }

    /// Stamp first-sight `Pending` records for this run's work list, in one
    /// durable write.
    ///
    /// A record that survives as `Pending` past a crash marks its item for
    /// retry on the next run. The stored version marker is only advanced on
    /// `Done`, so an interrupted fetch never looks up to date.
    pub async fn mark_pending(&self, work: &[WorkItem]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        for item in work {
            let record = inner
                .records
                .entry(item.id.clone())
                .or_insert_with(|| SyncRecord {
                    status: SyncStatus::Pending,
                    version: None,
                    path: item.path.clone(),
                    reason: None,
                    last_attempt: None,
                });
            record.status = SyncStatus::Pending;
            record.path = item.path.clone();
            record.reason = None;
        }
        persist(&self.path, &inner).await
    }

    /// Record one item's outcome, durably, before returning.
    ///
    /// Callers must invoke this only after the item's file (if any) has been
    /// finalized with its atomic rename — write-then-record ordering is what
    /// keeps a resumed run from trusting a `Done` record for a file that was
    /// never finalized.
    pub async fn record_outcome(&self, item: &WorkItem, outcome: FetchOutcome) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let record = inner
            .records
            .entry(item.id.clone())
            .or_insert_with(|| SyncRecord {
                status: SyncStatus::Pending,
                version: None,
                path: item.path.clone(),
                reason: None,
                last_attempt: None,
            });
        record.path = item.path.clone();
        record.last_attempt = Some(now);
        match outcome {
            FetchOutcome::Done { version } => {
                record.status = SyncStatus::Done;
                record.version = version;
                record.reason = None;
            }
            FetchOutcome::Failed { reason } => {
                record.status = SyncStatus::Failed;
                record.reason = Some(reason);
            }
            FetchOutcome::Skipped { reason } => {
                record.status = SyncStatus::Skipped;
                // Marker recorded so an unchanged unsupported item is not
                // re-reported as new work every run
                record.version = item.version.clone();
                record.reason = Some(reason);
            }
        }
        persist(&self.path, &inner).await
    }
}

/// Write the manifest to a temp file in the same directory, fsync, and rename
/// it into place. Rename is atomic on the same filesystem, so readers (and a
/// post-crash reload) see either the old manifest or the new one, never a
/// partial write.
async fn persist(path: &Path, manifest: &Manifest) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(manifest)?;
    let tmp = path.with_extension("json.tmp");
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(&bytes).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
