//! Remote content provider capability interface
//!
//! One implementation per remote system. Providers supply raw metadata and
//! byte streams only: reads are idempotent, nothing local is mutated, and
//! rate-limit/auth failures surface as distinguishable error kinds so the
//! executor can apply the right backoff.

pub mod brightspace;
pub mod classroom;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::{ContentRef, Course, Node, ProviderKind};

pub use brightspace::BrightspaceProvider;
pub use classroom::ClassroomProvider;

/// Readable byte stream for one item's content
pub type ContentStream = BoxStream<'static, Result<bytes::Bytes>>;

/// Capability interface over a remote content tree
///
/// Implementations must be safely callable repeatedly: `list_courses` and
/// `list_tree` are pure reads of remote state, and `open_content` may be
/// re-invoked for the same item across retries and runs.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// Which remote system this provider talks to
    fn kind(&self) -> ProviderKind;

    /// Enumerate the account's courses
    async fn list_courses(&self) -> Result<Vec<Course>>;

    /// Enumerate one course's full content tree.
    ///
    /// Returns the root node; the root itself stands for the course output
    /// directory and contributes no path segment.
    async fn list_tree(&self, course: &Course) -> Result<Node>;

    /// Open a byte stream for an item's content
    async fn open_content(&self, content: &ContentRef) -> Result<ContentStream>;
}

/// Check an HTTP response, converting non-success statuses into classified
/// provider errors. A 429 carries the server's `Retry-After` through to the
/// executor's cooldown handling.
pub(crate) fn check_response(resp: reqwest::Response, context: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs);
        return Err(Error::RateLimited { retry_after });
    }
    Err(Error::from_status(status, context))
}

/// Wrap a reqwest body stream as a [`ContentStream`]
pub(crate) fn body_stream(resp: reqwest::Response) -> ContentStream {
    resp.bytes_stream().map(|chunk| chunk.map_err(Error::from)).boxed()
}

/// Fetch a Google Drive file as a byte stream, exporting native Google docs
/// to the requested Office MIME type. Shared by both providers: Brightspace
/// courses routinely link Drive-hosted files, and Classroom attachments are
/// almost entirely Drive files.
pub(crate) async fn open_drive_file(
    http: &reqwest::Client,
    token: &str,
    id: &str,
    export_mime: Option<&str>,
) -> Result<ContentStream> {
    let url = match export_mime {
        Some(mime) => format!(
            "https://www.googleapis.com/drive/v2/files/{id}/export?mimeType={}",
            urlencoding::encode(mime)
        ),
        None => format!("https://www.googleapis.com/drive/v3/files/{id}?alt=media"),
    };
    let resp = http.get(&url).bearer_auth(token).send().await?;
    let resp = check_response(resp, "drive file")?;
    Ok(body_stream(resp))
}

/// Extract the Drive file id from a sharing URL.
///
/// Handles the `/d/<id>/...` form and the legacy `/open?id=<id>` form the
/// way the LMS embeds them.
pub(crate) fn drive_file_id(url: &str) -> Option<String> {
    let tail = if let Some(rest) = url.split_once("/d/").map(|(_, r)| r) {
        rest
    } else {
        url.split_once("/open?id=").map(|(_, r)| r)?
    };
    let id: String = tail
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if id.is_empty() { None } else { Some(id) }
}
