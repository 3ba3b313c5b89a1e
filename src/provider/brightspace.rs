//! D2L Brightspace provider (cookie-session LMS)
//!
//! The caller supplies a [`reqwest::Client`] whose cookie jar already holds a
//! valid session (`d2lSessionVal`/`d2lSecureSessionVal`) — credential
//! acquisition is an external setup concern. Optionally a Google OAuth token
//! enables Drive-hosted course files; without it those items are skipped.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Deserialize;
use url::Url;

use super::{ContentProvider, ContentStream, body_stream, check_response, drive_file_id, open_drive_file};
use crate::error::{Error, Result};
use crate::paths::is_video;
use crate::types::{ContentRef, Course, ItemKind, Node, ProviderKind, RemoteId};

/// Learning environment API version (content endpoints)
const LE_VERSION: &str = "1.51";
/// Learning platform API version (enrollment endpoints)
const LP_VERSION: &str = "1.35";

const DOCX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
const PPTX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Brightspace content provider
pub struct BrightspaceProvider {
    http: reqwest::Client,
    base_url: Url,
    google_token: Option<String>,
}

impl BrightspaceProvider {
    /// Create a provider against a Brightspace instance.
    ///
    /// `http` must carry the session cookies; `google_token` is an optional
    /// OAuth bearer token for Drive-hosted course files.
    pub fn new(http: reqwest::Client, base_url: Url, google_token: Option<String>) -> Self {
        Self {
            http,
            base_url,
            google_token,
        }
    }

    fn api_url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::PermanentProvider(format!("bad API path {path}: {e}")))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str, context: &str) -> Result<T> {
        let url = self.api_url(path)?;
        let resp = self.http.get(url).send().await?;
        let resp = check_response(resp, context)?;
        Ok(resp.json::<T>().await?)
    }

    fn build_module<'a>(&'a self, course_id: &'a str, module: &'a ModulePayload) -> BoxFuture<'a, Result<Node>> {
        Box::pin(async move {
            let mut children = Vec::with_capacity(module.structure.len());
            for entry in &module.structure {
                if entry.entry_type == 0 {
                    let detail: ModulePayload = self
                        .get_json(
                            &format!("/d2l/api/le/{LE_VERSION}/{course_id}/content/modules/{}", entry.id),
                            "module detail",
                        )
                        .await?;
                    children.push(self.build_module(course_id, &detail).await?);
                } else {
                    let topic: TopicPayload = self
                        .get_json(
                            &format!("/d2l/api/le/{LE_VERSION}/{course_id}/content/topics/{}", entry.id),
                            "topic detail",
                        )
                        .await?;
                    children.push(self.topic_node(&topic));
                }
            }
            Ok(Node::folder(
                module.id.to_string(),
                module.title.trim(),
                children,
            ))
        })
    }

    /// Map a topic payload to a leaf node, classifying where its bytes live
    fn topic_node(&self, topic: &TopicPayload) -> Node {
        let id = RemoteId::new(topic.id.to_string());
        let title = topic.title.trim().to_string();
        let version = topic.last_modified_date.clone();

        let Some(url) = topic.url.as_deref().filter(|u| !u.is_empty()) else {
            return Node::item(id, title, ItemKind::Unsupported, None, version);
        };

        // Files hosted in the Brightspace CDN carry a site-relative URL; the
        // topic title has no extension, so take it from the URL
        if url.starts_with('/') {
            let name = match url.rsplit_once('.').map(|(_, ext)| ext) {
                Some(ext) if !ext.contains('/') => format!("{title}.{ext}"),
                _ => title,
            };
            let kind = if is_video(std::path::Path::new(&name)) {
                ItemKind::Video
            } else {
                ItemKind::File
            };
            return match self.base_url.join(url) {
                Ok(absolute) => Node::item(id, name, kind, Some(ContentRef::Url(absolute)), version),
                Err(e) => {
                    tracing::warn!(topic_id = %id, url = url, error = %e, "Unparsable CDN URL");
                    Node::item(id, name, ItemKind::Unsupported, None, version)
                }
            };
        }

        if url.contains("youtu.be") || url.contains("youtube.com") {
            return Node::item(id, title, ItemKind::Video, None, version);
        }

        // Native Google docs export to Office formats; anything else on
        // Drive (including Office files parked on Docs) downloads as-is
        if url.contains("docs.google.com") && !url.contains("&rtpof=true") {
            let (mime, ext) = if url.contains("document") {
                (DOCX_MIME, "docx")
            } else if url.contains("presentation") {
                (PPTX_MIME, "pptx")
            } else if url.contains("spreadsheet") {
                (XLSX_MIME, "xlsx")
            } else {
                return Node::item(id, title, ItemKind::Unsupported, None, version);
            };
            return match drive_file_id(url) {
                Some(file_id) => Node::item(
                    id,
                    format!("{title}.{ext}"),
                    ItemKind::File,
                    Some(ContentRef::DriveFile {
                        id: file_id,
                        export_mime: Some(mime.to_string()),
                    }),
                    version,
                ),
                None => Node::item(id, title, ItemKind::Unsupported, None, version),
            };
        }

        if url.contains("drive.google.com") || url.contains("docs.google.com") {
            return match drive_file_id(url) {
                Some(file_id) => Node::item(
                    id,
                    title,
                    ItemKind::File,
                    Some(ContentRef::DriveFile {
                        id: file_id,
                        export_mime: None,
                    }),
                    version,
                ),
                None => Node::item(id, title, ItemKind::Unsupported, None, version),
            };
        }

        // External link with no download strategy
        Node::item(id, title, ItemKind::Link, None, version)
    }
}

#[async_trait]
impl ContentProvider for BrightspaceProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Brightspace
    }

    async fn list_courses(&self) -> Result<Vec<Course>> {
        let enrollments: EnrollmentsPayload = self
            .get_json(
                &format!("/d2l/api/lp/{LP_VERSION}/enrollments/myenrollments/"),
                "enrollments",
            )
            .await?;
        Ok(enrollments
            .items
            .into_iter()
            .filter(|e| e.org_unit.unit_type.name == "Course Offering")
            .map(|e| Course {
                id: RemoteId::new(e.org_unit.id.to_string()),
                name: e.org_unit.name,
                provider: ProviderKind::Brightspace,
            })
            .collect())
    }

    async fn list_tree(&self, course: &Course) -> Result<Node> {
        let course_id = course.id.as_str();
        let modules: Vec<ModulePayload> = self
            .get_json(
                &format!("/d2l/api/le/{LE_VERSION}/{course_id}/content/root/"),
                "content root",
            )
            .await?;
        let mut children = Vec::with_capacity(modules.len());
        for module in &modules {
            children.push(self.build_module(course_id, module).await?);
        }
        Ok(Node::folder(course.id.clone(), course.name.clone(), children))
    }

    async fn open_content(&self, content: &ContentRef) -> Result<ContentStream> {
        match content {
            ContentRef::Url(url) => {
                let resp = self.http.get(url.clone()).send().await?;
                let resp = check_response(resp, "content fetch")?;
                Ok(body_stream(resp))
            }
            ContentRef::DriveFile { id, export_mime } => match &self.google_token {
                Some(token) => {
                    open_drive_file(&self.http, token, id, export_mime.as_deref()).await
                }
                None => Err(Error::UnsupportedContent(
                    "Google Drive file but no Google credentials configured".to_string(),
                )),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct EnrollmentsPayload {
    #[serde(rename = "Items")]
    items: Vec<EnrollmentPayload>,
}

#[derive(Debug, Deserialize)]
struct EnrollmentPayload {
    #[serde(rename = "OrgUnit")]
    org_unit: OrgUnitPayload,
}

#[derive(Debug, Deserialize)]
struct OrgUnitPayload {
    #[serde(rename = "Id")]
    id: i64,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Type")]
    unit_type: OrgUnitTypePayload,
}

#[derive(Debug, Deserialize)]
struct OrgUnitTypePayload {
    #[serde(rename = "Name")]
    name: String,
}

#[derive(Debug, Deserialize)]
struct ModulePayload {
    #[serde(rename = "Id")]
    id: i64,
    #[serde(rename = "Title")]
    title: String,
    #[serde(rename = "Structure", default)]
    structure: Vec<StructureEntryPayload>,
}

#[derive(Debug, Deserialize)]
struct StructureEntryPayload {
    #[serde(rename = "Id")]
    id: i64,
    #[serde(rename = "Type")]
    entry_type: i32,
}

#[derive(Debug, Deserialize)]
struct TopicPayload {
    #[serde(rename = "Id")]
    id: i64,
    #[serde(rename = "Title")]
    title: String,
    #[serde(rename = "Url")]
    url: Option<String>,
    #[serde(rename = "LastModifiedDate")]
    last_modified_date: Option<String>,
}
