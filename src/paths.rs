//! Path normalization: deterministic, collision-free mapping from tree nodes
//! to local filesystem paths.
//!
//! Sanitization strips characters that are illegal on common filesystems and
//! bounds component length. Collisions between distinct remote ids are
//! resolved by suffixing the later-encountered id, so the first occupant of a
//! path keeps the clean name and reruns over an unchanged tree reproduce
//! identical paths.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::types::RemoteId;

/// Characters that cannot appear in filenames on common filesystems
const BANNED_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Maximum length of a single sanitized path component
const MAX_COMPONENT_LEN: usize = 120;

/// File extensions treated as video for the skip-videos filter
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mpg", "m4v", "mov", "mod", "avi", "3gp", "mkv"];

/// Sanitize one path component.
///
/// Strips banned and control characters, collapses newlines to spaces, trims
/// surrounding whitespace and trailing dots, and truncates to
/// [`MAX_COMPONENT_LEN`] on a character boundary. A name that sanitizes to
/// nothing becomes `"untitled"`.
pub fn sanitize_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .filter(|c| !BANNED_CHARS.contains(c) && !c.is_control())
        .collect();
    let trimmed = cleaned.trim().trim_end_matches('.');
    let mut out: String = trimmed.chars().take(MAX_COMPONENT_LEN).collect();
    // Truncation can expose new trailing whitespace/dots
    while out.ends_with([' ', '.']) {
        out.pop();
    }
    if out.is_empty() {
        return "untitled".to_string();
    }
    out
}

/// Returns true if the path has a video file extension
pub fn is_video(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_lowercase();
            VIDEO_EXTENSIONS.iter().any(|v| *v == e)
        })
        .unwrap_or(false)
}

/// Assigns collision-free local paths within one course output root.
///
/// Pure function of (ancestor names, leaf name, remote id, encounter order):
/// the same traversal always yields the same assignments, regardless of how
/// many download workers later run.
#[derive(Debug, Default)]
pub struct PathNormalizer {
    assigned: HashMap<PathBuf, RemoteId>,
}

impl PathNormalizer {
    /// Create an empty normalizer for one course traversal
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign a path for a leaf, disambiguating collisions between distinct
    /// remote ids by suffixing the later-encountered id before the extension.
    /// The suffixed candidate may itself be taken (a sibling can literally be
    /// named that), so the tag is extended with a counter until the path is
    /// unoccupied.
    ///
    /// Asking again for the same id at the same candidate path returns the
    /// already-assigned path.
    pub fn assign(&mut self, ancestors: &[String], name: &str, id: &RemoteId) -> PathBuf {
        let mut path = PathBuf::new();
        for ancestor in ancestors {
            path.push(sanitize_component(ancestor));
        }
        let leaf = sanitize_component(name);
        let candidate = path.join(&leaf);

        match self.assigned.get(&candidate) {
            None => {
                self.assigned.insert(candidate.clone(), id.clone());
                candidate
            }
            Some(owner) if owner == id => candidate,
            Some(_) => {
                let safe_id = sanitize_component(id.as_str());
                let mut attempt = 0u32;
                loop {
                    let tag = if attempt == 0 {
                        safe_id.clone()
                    } else {
                        format!("{safe_id}.{attempt}")
                    };
                    let disambiguated = path.join(suffix_with_tag(&leaf, &tag));
                    let taken_by_other =
                        matches!(self.assigned.get(&disambiguated), Some(owner) if owner != id);
                    if taken_by_other {
                        attempt += 1;
                        continue;
                    }
                    self.assigned.insert(disambiguated.clone(), id.clone());
                    return disambiguated;
                }
            }
        }
    }
}

/// Insert ` [tag]` before the extension: `notes.pdf` -> `notes [42].pdf`
fn suffix_with_tag(leaf: &str, tag: &str) -> String {
    let p = Path::new(leaf);
    match (p.file_stem().and_then(|s| s.to_str()), p.extension().and_then(|e| e.to_str())) {
        (Some(stem), Some(ext)) => format!("{stem} [{tag}].{ext}"),
        _ => format!("{leaf} [{tag}]"),
    }
}
