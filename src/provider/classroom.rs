//! Google Classroom provider (OAuth API)
//!
//! Builds a synthetic course tree out of the Classroom API's flat listings:
//! `Announcements/`, `Materials/<topic>/<title>/` and `Classwork/<topic>/<title>/`
//! folders holding the attachments of each post. Token acquisition and
//! refresh are external setup concerns; the provider only spends a bearer
//! token it is given.

use async_trait::async_trait;
use serde::Deserialize;

use super::{ContentProvider, ContentStream, body_stream, check_response, open_drive_file};
use crate::error::Result;
use crate::types::{ContentRef, Course, ItemKind, Node, ProviderKind, RemoteId};

const API_BASE: &str = "https://classroom.googleapis.com/v1";

/// Topic bucket for posts without a topic id
const NO_TOPIC: &str = "No Topic";

const DOCX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
const PPTX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Google Classroom content provider
pub struct ClassroomProvider {
    http: reqwest::Client,
    token: String,
}

impl ClassroomProvider {
    /// Create a provider spending the given OAuth bearer token
    pub fn new(http: reqwest::Client, token: impl Into<String>) -> Self {
        Self {
            http,
            token: token.into(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str, context: &str) -> Result<T> {
        let resp = self
            .http
            .get(format!("{API_BASE}/{path}"))
            .bearer_auth(&self.token)
            .send()
            .await?;
        let resp = check_response(resp, context)?;
        Ok(resp.json::<T>().await?)
    }

    /// Map one attachment to a leaf node. `post_id` scopes the node id so the
    /// same Drive file attached to two posts stays two distinct tree nodes.
    fn material_node(post_id: &str, material: &MaterialPayload, version: Option<&str>) -> Option<Node> {
        if let Some(df) = &material.drive_file {
            let inner = &df.drive_file;
            let id = RemoteId::new(format!("{post_id}:{}", inner.id));
            let link = inner.alternate_link.as_deref().unwrap_or_default();
            // Native Google docs export to Office formats; plain Drive
            // binaries (and Office files parked on Docs) download as-is
            let export = if link.contains("docs.google.com") && !link.contains("&rtpof=true") {
                if link.contains("document") {
                    Some((DOCX_MIME, "docx"))
                } else if link.contains("presentation") {
                    Some((PPTX_MIME, "pptx"))
                } else if link.contains("spreadsheet") {
                    Some((XLSX_MIME, "xlsx"))
                } else {
                    None
                }
            } else {
                None
            };
            let (name, export_mime) = match export {
                Some((mime, ext)) => (format!("{}.{ext}", inner.title), Some(mime.to_string())),
                None => (inner.title.clone(), None),
            };
            return Some(Node::item(
                id,
                name,
                ItemKind::File,
                Some(ContentRef::DriveFile {
                    id: inner.id.clone(),
                    export_mime,
                }),
                version.map(String::from),
            ));
        }
        if let Some(video) = &material.youtube_video {
            // No stream-extraction strategy; recorded as skipped rather than
            // silently dropped
            return Some(Node::item(
                RemoteId::new(format!("{post_id}:yt:{}", video.id)),
                video.title.clone().unwrap_or_else(|| video.id.clone()),
                ItemKind::Video,
                None,
                version.map(String::from),
            ));
        }
        if let Some(link) = &material.link {
            return Some(Node::item(
                RemoteId::new(format!("{post_id}:link:{}", link.url)),
                link.title.clone().unwrap_or_else(|| link.url.clone()),
                ItemKind::Link,
                None,
                version.map(String::from),
            ));
        }
        if material.form.is_some() {
            return Some(Node::item(
                RemoteId::new(format!("{post_id}:form")),
                "form".to_string(),
                ItemKind::Unsupported,
                None,
                version.map(String::from),
            ));
        }
        None
    }

    /// Group posts into `<section>/<topic>/<title>/` folders
    fn post_section(
        section_id: &str,
        section_name: &str,
        posts: &[PostPayload],
        topics: &std::collections::HashMap<String, String>,
    ) -> Node {
        // Preserve enumeration order of first appearance per topic
        let mut topic_order: Vec<(String, String)> = Vec::new();
        for post in posts {
            let key = post.topic_id.clone().unwrap_or_default();
            if !topic_order.iter().any(|(k, _)| *k == key) {
                let name = post
                    .topic_id
                    .as_ref()
                    .and_then(|id| topics.get(id).cloned())
                    .unwrap_or_else(|| NO_TOPIC.to_string());
                topic_order.push((key, name));
            }
        }

        let mut topic_folders = Vec::new();
        for (key, topic_name) in &topic_order {
            let mut post_folders = Vec::new();
            for post in posts {
                if post.topic_id.clone().unwrap_or_default() != *key {
                    continue;
                }
                let title = post.title.clone().unwrap_or_else(|| post.id.clone());
                let children: Vec<Node> = post
                    .materials
                    .iter()
                    .filter_map(|m| Self::material_node(&post.id, m, post.update_time.as_deref()))
                    .collect();
                if children.is_empty() {
                    continue;
                }
                post_folders.push(Node::folder(
                    format!("{section_id}:post:{}", post.id),
                    title,
                    children,
                ));
            }
            if post_folders.is_empty() {
                continue;
            }
            topic_folders.push(Node::folder(
                format!("{section_id}:topic:{key}"),
                topic_name.clone(),
                post_folders,
            ));
        }
        Node::folder(section_id, section_name, topic_folders)
    }
}

#[async_trait]
impl ContentProvider for ClassroomProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Classroom
    }

    async fn list_courses(&self) -> Result<Vec<Course>> {
        let payload: CoursesPayload = self.get_json("courses", "course list").await?;
        Ok(payload
            .courses
            .into_iter()
            .map(|c| Course {
                id: RemoteId::new(c.id),
                name: c.name,
                provider: ProviderKind::Classroom,
            })
            .collect())
    }

    async fn list_tree(&self, course: &Course) -> Result<Node> {
        let course_id = course.id.as_str();

        let topics: TopicsPayload = self
            .get_json(&format!("courses/{course_id}/topics"), "topics")
            .await?;
        let topic_names: std::collections::HashMap<String, String> = topics
            .topic
            .into_iter()
            .map(|t| (t.topic_id, t.name))
            .collect();

        let announcements: AnnouncementsPayload = self
            .get_json(&format!("courses/{course_id}/announcements"), "announcements")
            .await?;
        let materials: MaterialsPayload = self
            .get_json(
                &format!("courses/{course_id}/courseWorkMaterials"),
                "course work materials",
            )
            .await?;
        let coursework: CourseWorkPayload = self
            .get_json(&format!("courses/{course_id}/courseWork"), "course work")
            .await?;

        // Announcements have no topics or titles; each becomes a folder
        // named by its id, as the remote UI has nothing better to offer
        let mut announcement_folders = Vec::new();
        for post in &announcements.announcements {
            let children: Vec<Node> = post
                .materials
                .iter()
                .filter_map(|m| Self::material_node(&post.id, m, post.update_time.as_deref()))
                .collect();
            if children.is_empty() {
                continue;
            }
            announcement_folders.push(Node::folder(
                format!("announcement:{}", post.id),
                post.id.clone(),
                children,
            ));
        }

        Ok(Node::folder(
            course.id.clone(),
            course.name.clone(),
            vec![
                Node::folder("announcements", "Announcements", announcement_folders),
                Self::post_section(
                    "materials",
                    "Materials",
                    &materials.course_work_material,
                    &topic_names,
                ),
                Self::post_section("classwork", "Classwork", &coursework.course_work, &topic_names),
            ],
        ))
    }

    async fn open_content(&self, content: &ContentRef) -> Result<ContentStream> {
        match content {
            ContentRef::DriveFile { id, export_mime } => {
                open_drive_file(&self.http, &self.token, id, export_mime.as_deref()).await
            }
            ContentRef::Url(url) => {
                let resp = self.http.get(url.clone()).send().await?;
                let resp = check_response(resp, "content fetch")?;
                Ok(body_stream(resp))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct CoursesPayload {
    #[serde(default)]
    courses: Vec<CoursePayload>,
}

#[derive(Debug, Deserialize)]
struct CoursePayload {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct TopicsPayload {
    #[serde(default)]
    topic: Vec<TopicPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TopicPayload {
    topic_id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct AnnouncementsPayload {
    #[serde(default)]
    announcements: Vec<PostPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MaterialsPayload {
    #[serde(default)]
    course_work_material: Vec<PostPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CourseWorkPayload {
    #[serde(default)]
    course_work: Vec<PostPayload>,
}

/// Shared shape of announcements, course work materials, and course work:
/// the fields the tree needs are common to all three
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostPayload {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    topic_id: Option<String>,
    #[serde(default)]
    update_time: Option<String>,
    #[serde(default)]
    materials: Vec<MaterialPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MaterialPayload {
    #[serde(default)]
    drive_file: Option<SharedDriveFilePayload>,
    #[serde(default)]
    youtube_video: Option<YoutubeVideoPayload>,
    #[serde(default)]
    link: Option<LinkPayload>,
    #[serde(default)]
    form: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SharedDriveFilePayload {
    drive_file: DriveFilePayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFilePayload {
    id: String,
    title: String,
    #[serde(default)]
    alternate_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct YoutubeVideoPayload {
    id: String,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LinkPayload {
    url: String,
    #[serde(default)]
    title: Option<String>,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeKind;

    fn drive_material(id: &str, title: &str, link: &str) -> MaterialPayload {
        MaterialPayload {
            drive_file: Some(SharedDriveFilePayload {
                drive_file: DriveFilePayload {
                    id: id.to_string(),
                    title: title.to_string(),
                    alternate_link: Some(link.to_string()),
                },
            }),
            youtube_video: None,
            link: None,
            form: None,
        }
    }

    #[test]
    fn drive_binary_material_maps_to_drive_ref() {
        let node = ClassroomProvider::material_node(
            "post1",
            &drive_material("D1", "scan.pdf", "https://drive.google.com/file/d/D1/view"),
            Some("2023-05-01T00:00:00Z"),
        )
        .unwrap();
        assert_eq!(node.id, RemoteId::from("post1:D1"));
        assert_eq!(node.name, "scan.pdf");
        assert_eq!(node.version.as_deref(), Some("2023-05-01T00:00:00Z"));
        assert!(matches!(
            node.content,
            Some(ContentRef::DriveFile { ref export_mime, .. }) if export_mime.is_none()
        ));
    }

    #[test]
    fn native_doc_material_gets_export_mime_and_extension() {
        let node = ClassroomProvider::material_node(
            "post1",
            &drive_material("D2", "Essay", "https://docs.google.com/document/d/D2/edit"),
            None,
        )
        .unwrap();
        assert_eq!(node.name, "Essay.docx");
        assert!(matches!(
            node.content,
            Some(ContentRef::DriveFile { ref export_mime, .. })
                if export_mime.as_deref() == Some(DOCX_MIME)
        ));
    }

    #[test]
    fn youtube_material_is_video_without_content() {
        let material = MaterialPayload {
            drive_file: None,
            youtube_video: Some(YoutubeVideoPayload {
                id: "yt1".to_string(),
                title: Some("Intro".to_string()),
            }),
            link: None,
            form: None,
        };
        let node = ClassroomProvider::material_node("p", &material, None).unwrap();
        assert_eq!(node.kind, NodeKind::Item(ItemKind::Video));
        assert!(node.content.is_none());
    }

    #[test]
    fn same_drive_file_on_two_posts_stays_distinct() {
        let m = drive_material("D1", "shared.pdf", "https://drive.google.com/file/d/D1/view");
        let a = ClassroomProvider::material_node("postA", &m, None).unwrap();
        let b = ClassroomProvider::material_node("postB", &m, None).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn posts_group_under_topics_with_fallback_bucket() {
        let topics = std::collections::HashMap::from([(
            "t1".to_string(),
            "Unit 1".to_string(),
        )]);
        let posts = vec![
            PostPayload {
                id: "p1".to_string(),
                title: Some("Worksheet".to_string()),
                topic_id: Some("t1".to_string()),
                update_time: None,
                materials: vec![drive_material(
                    "D1",
                    "ws.pdf",
                    "https://drive.google.com/file/d/D1/view",
                )],
            },
            PostPayload {
                id: "p2".to_string(),
                title: Some("Stray".to_string()),
                topic_id: None,
                update_time: None,
                materials: vec![drive_material(
                    "D2",
                    "stray.pdf",
                    "https://drive.google.com/file/d/D2/view",
                )],
            },
        ];
        let section = ClassroomProvider::post_section("materials", "Materials", &posts, &topics);
        assert_eq!(section.children.len(), 2);
        assert_eq!(section.children[0].name, "Unit 1");
        assert_eq!(section.children[1].name, NO_TOPIC);
        assert_eq!(section.children[0].children[0].name, "Worksheet");
    }

    #[test]
    fn posts_without_materials_produce_no_folders() {
        let posts = vec![PostPayload {
            id: "p1".to_string(),
            title: Some("Text only".to_string()),
            topic_id: None,
            update_time: None,
            materials: vec![],
        }];
        let section = ClassroomProvider::post_section(
            "classwork",
            "Classwork",
            &posts,
            &std::collections::HashMap::new(),
        );
        assert!(section.children.is_empty());
    }
}
