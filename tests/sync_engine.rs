//! End-to-end sync runs against an in-memory provider.
//!
//! These exercise the full orchestrator pipeline on real (temp) filesystems:
//! enumeration, path assignment, state diffing, concurrent execution, and the
//! manifest that ties consecutive runs together.

use async_trait::async_trait;
use bytes::Bytes;
use classmirror::state::{StateStore, SyncStatus, WorkItem, MANIFEST_FILE_NAME};
use classmirror::{
    ContentProvider, ContentRef, ContentStream, Course, Error, ItemKind, Node, ProviderKind,
    RemoteId, Result, RetryConfig, SyncConfig, SyncOrchestrator,
};
use futures::StreamExt;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;
use walkdir::WalkDir;

/// Provider backed by an in-process tree. Content bytes are the item id,
/// fetches are counted, and ids in `fail_ids` fail permanently.
struct MemoryProvider {
    tree: Mutex<Node>,
    fetches: AtomicUsize,
    fail_ids: Mutex<HashSet<String>>,
}

impl MemoryProvider {
    fn new(tree: Node) -> Self {
        Self {
            tree: Mutex::new(tree),
            fetches: AtomicUsize::new(0),
            fail_ids: Mutex::new(HashSet::new()),
        }
    }

    fn set_tree(&self, tree: Node) {
        *self.tree.lock().unwrap() = tree;
    }

    fn fail_permanently(&self, id: &str) {
        self.fail_ids.lock().unwrap().insert(id.to_string());
    }

    fn clear_failures(&self) {
        self.fail_ids.lock().unwrap().clear();
    }

    fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn reset_fetch_count(&self) {
        self.fetches.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl ContentProvider for MemoryProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Memory
    }

    async fn list_courses(&self) -> Result<Vec<Course>> {
        Ok(vec![Course {
            id: RemoteId::new("c1"),
            name: "Course One".to_string(),
            provider: ProviderKind::Memory,
        }])
    }

    async fn list_tree(&self, _course: &Course) -> Result<Node> {
        Ok(self.tree.lock().unwrap().clone())
    }

    async fn open_content(&self, content: &ContentRef) -> Result<ContentStream> {
        let id = match content {
            ContentRef::Url(url) => url.path().trim_start_matches('/').to_string(),
            ContentRef::DriveFile { id, .. } => id.clone(),
        };
        if self.fail_ids.lock().unwrap().contains(&id) {
            return Err(Error::PermanentProvider(format!("item {id} is gone")));
        }
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let payload = Bytes::from(format!("content of {id}"));
        Ok(futures::stream::iter(vec![Ok(payload)]).boxed())
    }
}

fn memory_ref(id: &str) -> Option<ContentRef> {
    Some(ContentRef::Url(
        url::Url::parse(&format!("memory://items/{id}")).unwrap(),
    ))
}

fn file_item(id: &str, name: &str, version: &str) -> Node {
    Node::item(
        id,
        name,
        ItemKind::File,
        memory_ref(id),
        Some(version.to_string()),
    )
}

fn test_config(dest_root: &Path, workers: usize) -> SyncConfig {
    SyncConfig {
        dest_root: dest_root.to_path_buf(),
        workers,
        retry: RetryConfig {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            jitter: false,
        },
        ..SyncConfig::default()
    }
}

fn course() -> Course {
    Course {
        id: RemoteId::new("c1"),
        name: "Course One".to_string(),
        provider: ProviderKind::Memory,
    }
}

/// Relative paths of all regular files below `root`, manifest excluded, sorted.
fn mirrored_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().strip_prefix(root).unwrap().to_path_buf())
        .filter(|p| p.file_name().map(|n| n != MANIFEST_FILE_NAME).unwrap_or(true))
        .collect();
    files.sort();
    files
}

#[tokio::test]
async fn full_sync_then_rerun_is_noop() {
    let dest = tempdir().unwrap();
    let tree = Node::folder(
        "root",
        "Course One",
        vec![Node::folder(
            "A",
            "Folder A",
            vec![
                file_item("x", "x.txt", "v1"),
                Node::item("y", "y", ItemKind::Unsupported, None, None),
            ],
        )],
    );
    let provider = Arc::new(MemoryProvider::new(tree));
    let orchestrator = SyncOrchestrator::new(provider.clone(), test_config(dest.path(), 3));

    let report = orchestrator.run_course(&course()).await.unwrap();
    assert_eq!(report.fetched, 1);
    assert_eq!(report.skipped, 1);
    assert!(report.is_clean());
    assert_eq!(provider.fetch_count(), 1);

    let x = dest.path().join("c1").join("Folder A").join("x.txt");
    assert_eq!(std::fs::read_to_string(&x).unwrap(), "content of x");

    // Second run finds everything recorded at the same version markers
    provider.reset_fetch_count();
    let report = orchestrator.run_course(&course()).await.unwrap();
    assert_eq!(provider.fetch_count(), 0);
    assert_eq!(report.fetched, 0);
    assert_eq!(report.up_to_date, 2);
    assert!(report.is_clean());
}

#[tokio::test]
async fn version_bump_refetches_only_the_changed_item() {
    let dest = tempdir().unwrap();
    let tree = Node::folder(
        "root",
        "Course One",
        vec![Node::folder(
            "A",
            "Folder A",
            vec![
                file_item("x", "x.txt", "v1"),
                file_item("z", "z.txt", "v1"),
            ],
        )],
    );
    let provider = Arc::new(MemoryProvider::new(tree));
    let orchestrator = SyncOrchestrator::new(provider.clone(), test_config(dest.path(), 3));
    orchestrator.run_course(&course()).await.unwrap();
    assert_eq!(provider.fetch_count(), 2);

    // Only x changes upstream
    provider.set_tree(Node::folder(
        "root",
        "Course One",
        vec![Node::folder(
            "A",
            "Folder A",
            vec![
                file_item("x", "x.txt", "v2"),
                file_item("z", "z.txt", "v1"),
            ],
        )],
    ));
    provider.reset_fetch_count();
    let report = orchestrator.run_course(&course()).await.unwrap();
    assert_eq!(provider.fetch_count(), 1);
    assert_eq!(report.fetched, 1);
    assert_eq!(report.up_to_date, 1);
}

#[tokio::test]
async fn pending_records_are_refetched_on_the_next_run() {
    let dest = tempdir().unwrap();
    let tree = Node::folder(
        "root",
        "Course One",
        vec![file_item("x", "x.txt", "v1")],
    );
    let provider = Arc::new(MemoryProvider::new(tree));
    let orchestrator = SyncOrchestrator::new(provider.clone(), test_config(dest.path(), 1));
    orchestrator.run_course(&course()).await.unwrap();

    // Rewrite the record to Pending, as an interrupted run would leave it
    let manifest = dest.path().join("c1").join(MANIFEST_FILE_NAME);
    let store = StateStore::load(&manifest, false).unwrap();
    let item = WorkItem {
        id: RemoteId::new("x"),
        name: "x.txt".to_string(),
        kind: ItemKind::File,
        content: memory_ref("x"),
        version: Some("v1".to_string()),
        path: PathBuf::from("x.txt"),
    };
    store.mark_pending(std::slice::from_ref(&item)).await.unwrap();
    let record = store.get(&RemoteId::new("x")).await.unwrap();
    assert_eq!(record.status, SyncStatus::Pending);
    drop(store);

    provider.reset_fetch_count();
    let report = orchestrator.run_course(&course()).await.unwrap();
    assert_eq!(provider.fetch_count(), 1);
    assert_eq!(report.fetched, 1);
}

#[tokio::test]
async fn paths_are_identical_across_worker_counts() {
    let tree = Node::folder(
        "root",
        "Course One",
        vec![
            Node::folder(
                "A",
                "Week 1",
                vec![
                    file_item("a1", "slides.pdf", "v1"),
                    file_item("a2", "notes.txt", "v1"),
                ],
            ),
            Node::folder(
                "B",
                "Week 2",
                vec![
                    file_item("b1", "slides.pdf", "v1"),
                    Node::folder("B1", "Readings", vec![file_item("b2", "paper.pdf", "v1")]),
                ],
            ),
        ],
    );

    let mut layouts = Vec::new();
    for workers in [1, 8] {
        let dest = tempdir().unwrap();
        let provider = Arc::new(MemoryProvider::new(tree.clone()));
        let orchestrator =
            SyncOrchestrator::new(provider, test_config(dest.path(), workers));
        let report = orchestrator.run_course(&course()).await.unwrap();
        assert_eq!(report.fetched, 4);
        layouts.push(mirrored_files(dest.path()));
    }
    assert_eq!(layouts[0], layouts[1]);
}

#[tokio::test]
async fn name_collisions_get_id_suffixes_and_stay_stable() {
    let dest = tempdir().unwrap();
    let tree = Node::folder(
        "root",
        "Course One",
        vec![
            file_item("first", "notes.pdf", "v1"),
            file_item("second", "notes.pdf", "v1"),
        ],
    );
    let provider = Arc::new(MemoryProvider::new(tree));
    let orchestrator = SyncOrchestrator::new(provider.clone(), test_config(dest.path(), 2));
    orchestrator.run_course(&course()).await.unwrap();

    let files = mirrored_files(dest.path());
    assert_eq!(
        files,
        vec![
            PathBuf::from("c1/notes [second].pdf"),
            PathBuf::from("c1/notes.pdf"),
        ]
    );

    // Rerun resolves the collision the same way and fetches nothing
    provider.reset_fetch_count();
    orchestrator.run_course(&course()).await.unwrap();
    assert_eq!(provider.fetch_count(), 0);
    assert_eq!(mirrored_files(dest.path()), files);
}

#[tokio::test]
async fn force_refetches_unchanged_items() {
    let dest = tempdir().unwrap();
    let tree = Node::folder(
        "root",
        "Course One",
        vec![file_item("x", "x.txt", "v1"), file_item("z", "z.txt", "v1")],
    );
    let provider = Arc::new(MemoryProvider::new(tree));
    let orchestrator = SyncOrchestrator::new(provider.clone(), test_config(dest.path(), 2));
    orchestrator.run_course(&course()).await.unwrap();
    assert_eq!(provider.fetch_count(), 2);

    provider.reset_fetch_count();
    let mut config = test_config(dest.path(), 2);
    config.force = true;
    let forced = SyncOrchestrator::new(provider.clone(), config);
    let report = forced.run_course(&course()).await.unwrap();
    assert_eq!(provider.fetch_count(), 2);
    assert_eq!(report.fetched, 2);
}

#[tokio::test]
async fn one_failing_item_does_not_block_the_rest() {
    let dest = tempdir().unwrap();
    let tree = Node::folder(
        "root",
        "Course One",
        vec![
            file_item("good", "good.txt", "v1"),
            file_item("bad", "bad.txt", "v1"),
            file_item("fine", "fine.txt", "v1"),
        ],
    );
    let provider = Arc::new(MemoryProvider::new(tree));
    provider.fail_permanently("bad");
    let orchestrator = SyncOrchestrator::new(provider.clone(), test_config(dest.path(), 3));

    let report = orchestrator.run_course(&course()).await.unwrap();
    assert_eq!(report.fetched, 2);
    assert_eq!(report.failures.len(), 1);
    assert!(!report.is_clean());
    assert_eq!(report.failures[0].id, RemoteId::new("bad"));
    assert!(dest.path().join("c1").join("good.txt").exists());
    assert!(!dest.path().join("c1").join("bad.txt").exists());

    // Once the remote recovers, only the failed item is retried
    provider.clear_failures();
    provider.reset_fetch_count();
    let report = orchestrator.run_course(&course()).await.unwrap();
    assert_eq!(provider.fetch_count(), 1);
    assert_eq!(report.fetched, 1);
    assert!(report.is_clean());
    assert_eq!(
        std::fs::read_to_string(dest.path().join("c1").join("bad.txt")).unwrap(),
        "content of bad"
    );
}

#[tokio::test]
async fn items_removed_upstream_keep_their_local_copies() {
    let dest = tempdir().unwrap();
    let tree = Node::folder(
        "root",
        "Course One",
        vec![file_item("x", "x.txt", "v1"), file_item("z", "z.txt", "v1")],
    );
    let provider = Arc::new(MemoryProvider::new(tree));
    let orchestrator = SyncOrchestrator::new(provider.clone(), test_config(dest.path(), 2));
    orchestrator.run_course(&course()).await.unwrap();

    provider.set_tree(Node::folder(
        "root",
        "Course One",
        vec![file_item("x", "x.txt", "v1")],
    ));
    provider.reset_fetch_count();
    orchestrator.run_course(&course()).await.unwrap();

    assert_eq!(provider.fetch_count(), 0);
    assert!(dest.path().join("c1").join("z.txt").exists());
    // The stale record survives too, so a restored item is still a no-op
    let store =
        StateStore::load(&dest.path().join("c1").join(MANIFEST_FILE_NAME), false).unwrap();
    assert!(store.get(&RemoteId::new("z")).await.is_some());
}

#[tokio::test]
async fn corrupt_manifest_refuses_to_run_unless_fresh_start() {
    let dest = tempdir().unwrap();
    let course_dir = dest.path().join("c1");
    std::fs::create_dir_all(&course_dir).unwrap();
    std::fs::write(course_dir.join(MANIFEST_FILE_NAME), "{ not json").unwrap();

    let tree = Node::folder("root", "Course One", vec![file_item("x", "x.txt", "v1")]);
    let provider = Arc::new(MemoryProvider::new(tree));

    let orchestrator = SyncOrchestrator::new(provider.clone(), test_config(dest.path(), 1));
    let err = orchestrator.run_course(&course()).await.unwrap_err();
    assert!(matches!(err, Error::StateCorruption { .. }));
    assert_eq!(provider.fetch_count(), 0);

    let mut config = test_config(dest.path(), 1);
    config.fresh_start = true;
    let orchestrator = SyncOrchestrator::new(provider.clone(), config);
    let report = orchestrator.run_course(&course()).await.unwrap();
    assert_eq!(report.fetched, 1);
}

#[tokio::test]
async fn repeated_disk_failures_abort_the_whole_run() {
    let dest = tempdir().unwrap();
    // A regular file where the course folder should be makes every item's
    // write fail with a local I/O error
    std::fs::create_dir_all(dest.path().join("c1")).unwrap();
    std::fs::write(dest.path().join("c1").join("Folder A"), b"obstruction").unwrap();

    let children: Vec<Node> = (1..=6)
        .map(|i| file_item(&format!("f{i}"), &format!("x{i}.txt"), "v1"))
        .collect();
    let tree = Node::folder(
        "root",
        "Course One",
        vec![Node::folder("A", "Folder A", children)],
    );
    let provider = Arc::new(MemoryProvider::new(tree));
    let orchestrator = SyncOrchestrator::new(provider, test_config(dest.path(), 1));

    let report = orchestrator.run_course(&course()).await.unwrap();
    assert!(
        orchestrator.cancel_token().is_cancelled(),
        "a systemic disk failure must stop the whole run, not just one course"
    );
    assert!(report.failures.len() >= 5);
}

#[tokio::test]
async fn run_all_covers_every_course() {
    let dest = tempdir().unwrap();
    let tree = Node::folder("root", "Course One", vec![file_item("x", "x.txt", "v1")]);
    let provider = Arc::new(MemoryProvider::new(tree));
    let orchestrator = SyncOrchestrator::new(provider.clone(), test_config(dest.path(), 2));

    let reports = orchestrator.run_all().await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].fetched, 1);

    let missing = orchestrator
        .run_course_id(&RemoteId::new("nope"))
        .await
        .unwrap_err();
    assert!(matches!(missing, Error::CourseNotFound(_)));
}
