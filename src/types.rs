//! Core types for classmirror: the provider-independent content tree model.
//!
//! A [`Node`] tree is rebuilt fresh from the provider on every run and is
//! read-only once built. [`Node::flatten`] walks it with a defensive cycle
//! guard (provider data is untrusted) and assigns each leaf a stable local
//! path via the [`PathNormalizer`](crate::paths::PathNormalizer).

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::paths::PathNormalizer;

/// Maximum tree depth accepted from a provider before enumeration is
/// considered runaway and aborted for that course.
const MAX_TREE_DEPTH: usize = 64;

/// Remote identifier of a course or node, unique within a (provider, course) pair
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteId(pub String);

impl RemoteId {
    /// Create a new RemoteId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RemoteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RemoteId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for RemoteId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Which remote system a course came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// D2L Brightspace (cookie-session LMS)
    Brightspace,
    /// Google Classroom (OAuth API)
    Classroom,
    /// In-memory provider used by tests
    Memory,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Brightspace => write!(f, "brightspace"),
            ProviderKind::Classroom => write!(f, "classroom"),
            ProviderKind::Memory => write!(f, "memory"),
        }
    }
}

/// A remote course: the root of one content tree, immutable for a run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    /// Remote identifier
    pub id: RemoteId,
    /// Display name
    pub name: String,
    /// Which provider enumerated it
    pub provider: ProviderKind,
}

/// Kind of a leaf item
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    /// A downloadable file
    File,
    /// A link to external content
    Link,
    /// An announcement attachment
    Announcement,
    /// A submission attachment
    Submission,
    /// A video (subject to the skip-videos filter)
    Video,
    /// Known to exist remotely, but no download strategy applies
    Unsupported,
}

/// Node kind: a folder with children or a leaf item
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Structural node, contributes a path segment, never fetched
    Folder,
    /// Leaf node, candidate for fetching
    Item(ItemKind),
}

/// Reference to fetchable content
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentRef {
    /// Direct URL (Brightspace CDN files, link items)
    Url(url::Url),
    /// Google Drive file, optionally exported to an Office format
    DriveFile {
        /// Drive file id
        id: String,
        /// Export MIME type for native Google docs, None for binary files
        export_mime: Option<String>,
    },
}

/// One element of a remote content tree
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Node {
    /// Remote identifier, unique within the course
    pub id: RemoteId,
    /// Display name as the provider reports it (unsanitized)
    pub name: String,
    /// Folder or leaf item
    pub kind: NodeKind,
    /// Where the bytes live, if the provider exposed a reference
    pub content: Option<ContentRef>,
    /// Provider-supplied change marker (etag/hash/last-modified), if any
    pub version: Option<String>,
    /// Children (empty for leaves)
    pub children: Vec<Node>,
}

impl Node {
    /// Construct a folder node
    pub fn folder(id: impl Into<RemoteId>, name: impl Into<String>, children: Vec<Node>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: NodeKind::Folder,
            content: None,
            version: None,
            children,
        }
    }

    /// Construct a leaf item node
    pub fn item(
        id: impl Into<RemoteId>,
        name: impl Into<String>,
        kind: ItemKind,
        content: Option<ContentRef>,
        version: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: NodeKind::Item(kind),
            content,
            version,
            children: Vec::new(),
        }
    }

    /// Flatten the tree into planned items with assigned local paths.
    ///
    /// The root node itself contributes no path segment; it stands for the
    /// course output directory. Traversal is depth-first in the provider's
    /// enumeration order, which the normalizer treats as deterministic input,
    /// so reruns assign identical paths for unchanged trees.
    ///
    /// Duplicate remote ids (a provider bug per the uniqueness invariant) are
    /// logged and their subtree skipped; exceeding [`MAX_TREE_DEPTH`] aborts
    /// enumeration of the course, since provider data is untrusted and the
    /// tree may be effectively cyclic.
    pub fn flatten(&self, normalizer: &mut PathNormalizer) -> Result<Vec<PlannedItem>> {
        let mut items = Vec::new();
        let mut visited = HashSet::new();
        visited.insert(self.id.clone());
        let mut ancestors: Vec<String> = Vec::new();
        for child in &self.children {
            walk(child, &mut ancestors, &mut visited, normalizer, &mut items, 1)?;
        }
        Ok(items)
    }
}

fn walk(
    node: &Node,
    ancestors: &mut Vec<String>,
    visited: &mut HashSet<RemoteId>,
    normalizer: &mut PathNormalizer,
    items: &mut Vec<PlannedItem>,
    depth: usize,
) -> Result<()> {
    if depth > MAX_TREE_DEPTH {
        return Err(Error::PermanentProvider(format!(
            "content tree exceeds depth {MAX_TREE_DEPTH} at node {}",
            node.id
        )));
    }
    if !visited.insert(node.id.clone()) {
        tracing::warn!(node_id = %node.id, name = %node.name, "duplicate remote id in tree, skipping subtree");
        return Ok(());
    }
    match node.kind {
        NodeKind::Folder => {
            ancestors.push(node.name.clone());
            for child in &node.children {
                walk(child, ancestors, visited, normalizer, items, depth + 1)?;
            }
            ancestors.pop();
        }
        NodeKind::Item(kind) => {
            let path = normalizer.assign(ancestors, &node.name, &node.id);
            items.push(PlannedItem {
                id: node.id.clone(),
                name: node.name.clone(),
                kind,
                content: node.content.clone(),
                version: node.version.clone(),
                path,
            });
        }
    }
    Ok(())
}

/// A leaf item with its assigned local path, produced by [`Node::flatten`]
#[derive(Clone, Debug)]
pub struct PlannedItem {
    /// Remote identifier
    pub id: RemoteId,
    /// Display name
    pub name: String,
    /// Item kind
    pub kind: ItemKind,
    /// Content reference, if any
    pub content: Option<ContentRef>,
    /// Version marker, if any
    pub version: Option<String>,
    /// Normalized path relative to the course output directory
    pub path: PathBuf,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn file(id: &str, name: &str) -> Node {
        Node::item(id, name, ItemKind::File, None, None)
    }

    #[test]
    fn flatten_assigns_paths_under_folders() {
        let tree = Node::folder(
            "root",
            "Course",
            vec![Node::folder(
                "m1",
                "Week 1",
                vec![file("f1", "notes.pdf"), file("f2", "slides.pdf")],
            )],
        );
        let mut normalizer = PathNormalizer::new();
        let items = tree.flatten(&mut normalizer).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].path, PathBuf::from("Week 1/notes.pdf"));
        assert_eq!(items[1].path, PathBuf::from("Week 1/slides.pdf"));
    }

    #[test]
    fn flatten_root_contributes_no_segment() {
        let tree = Node::folder("root", "Course", vec![file("f1", "syllabus.pdf")]);
        let mut normalizer = PathNormalizer::new();
        let items = tree.flatten(&mut normalizer).unwrap();
        assert_eq!(items[0].path, PathBuf::from("syllabus.pdf"));
    }

    #[test]
    fn flatten_skips_duplicate_id_subtree() {
        let tree = Node::folder(
            "root",
            "Course",
            vec![
                file("f1", "a.pdf"),
                Node::folder("dup", "Folder", vec![file("f1", "b.pdf")]),
            ],
        );
        let mut normalizer = PathNormalizer::new();
        let items = tree.flatten(&mut normalizer).unwrap();
        assert_eq!(items.len(), 1, "second f1 subtree should be skipped");
        assert_eq!(items[0].path, PathBuf::from("a.pdf"));
    }

    #[test]
    fn flatten_rejects_runaway_depth() {
        let mut node = file("leaf", "deep.pdf");
        for i in 0..70 {
            node = Node::folder(format!("d{i}"), "nest", vec![node]);
        }
        let tree = Node::folder("root", "Course", vec![node]);
        let mut normalizer = PathNormalizer::new();
        let err = tree.flatten(&mut normalizer).unwrap_err();
        assert!(matches!(err, Error::PermanentProvider(_)));
    }

    #[test]
    fn flatten_is_deterministic() {
        let tree = Node::folder(
            "root",
            "Course",
            vec![
                Node::folder("m1", "A", vec![file("f1", "x.pdf"), file("f2", "x.pdf")]),
                file("f3", "y.txt"),
            ],
        );
        let first = tree.flatten(&mut PathNormalizer::new()).unwrap();
        let second = tree.flatten(&mut PathNormalizer::new()).unwrap();
        let first: Vec<_> = first.iter().map(|i| (&i.id, &i.path)).collect();
        let second: Vec<_> = second.iter().map(|i| (&i.id, &i.path)).collect();
        assert_eq!(first, second);
    }
}
