//! `RemoteStore` over the Drive v3 REST API.
//!
//! Every response record is validated into a `Node` here; records missing
//! `id`, `name` or `mimeType` are reported as `SyncError::Remote`. A 404 is
//! never an error: listings come back empty, metadata `None`, deletes Ok.

use std::time::Duration;

use async_trait::async_trait;
use mirror_core::{Node, NodeKind, RemoteStore, SyncError};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::config::Config;

pub const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

const NODE_FIELDS: &str = "id, name, mimeType, parents";

type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<Value>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

/// Validate one raw file record.
pub fn parse_node(raw: &Value) -> Result<Node> {
    let field = |name: &str| {
        raw.get(name)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| SyncError::Remote(format!("File record without {}: {}", name, raw)))
    };
    let id = field("id")?;
    let name = field("name")?;
    let kind = if field("mimeType")? == FOLDER_MIME {
        NodeKind::Folder
    } else {
        NodeKind::File
    };
    let parent_id = raw
        .get("parents")
        .and_then(Value::as_array)
        .and_then(|parents| parents.first())
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(Node {
        id,
        name,
        kind,
        parent_id,
    })
}

/// Quote a value for use inside a `q` expression.
fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// `multipart/related` body: JSON metadata part, then the content part.
pub fn multipart_body(boundary: &str, metadata: &Value, content: &[u8], mime_type: &str) -> Vec<u8> {
    let mut body = Vec::with_capacity(content.len() + 512);
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(metadata.to_string().as_bytes());
    body.extend_from_slice(format!("\r\n--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", mime_type).as_bytes());
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}

pub struct DriveGateway {
    client: Client,
    api_base: String,
    upload_base: String,
    token: Option<String>,
}

impl DriveGateway {
    pub fn new(
        api_base: impl Into<String>,
        upload_base: impl Into<String>,
        token: Option<String>,
        timeout: Option<Duration>,
    ) -> anyhow::Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            upload_base: upload_base.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let token = config.access_token();
        if token.is_none() {
            warn!(
                "No access token (set {} or drive.access_token); every remote call will fail",
                config.drive.access_token_env
            );
        }
        Self::new(
            &config.drive.api_base,
            &config.drive.upload_base,
            token,
            config.request_timeout(),
        )
    }

    fn token(&self) -> Result<&str> {
        self.token.as_deref().ok_or(SyncError::Unavailable)
    }

    /// Send a request. `Ok(None)` means 404.
    async fn execute(&self, request: RequestBuilder) -> Result<Option<Value>> {
        let token = self.token()?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| SyncError::Remote(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status == StatusCode::UNAUTHORIZED {
            warn!("Drive rejected the access token");
            return Err(SyncError::Unavailable);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Remote(format!("{}: {}", status, body.trim())));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SyncError::Remote(e.to_string()))?;
        if bytes.is_empty() {
            return Ok(Some(Value::Null));
        }
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| SyncError::Remote(format!("Invalid response body: {}", e)))
    }

    fn files_url(&self) -> String {
        format!("{}/files", self.api_base)
    }

    fn file_url(&self, id: &str) -> String {
        format!("{}/files/{}", self.api_base, id)
    }
}

#[async_trait]
impl RemoteStore for DriveGateway {
    async fn list_children(&self, node_id: &str) -> Result<Vec<Node>> {
        let query = format!("'{}' in parents and trashed = false", escape_query(node_id));
        let fields = format!("nextPageToken, files({})", NODE_FIELDS);
        let mut nodes = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.client.get(self.files_url()).query(&[
                ("q", query.as_str()),
                ("fields", fields.as_str()),
                ("pageSize", "1000"),
                ("supportsAllDrives", "true"),
                ("includeItemsFromAllDrives", "true"),
            ]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let Some(body) = self.execute(request).await? else {
                return Ok(Vec::new());
            };
            let page: FileList = serde_json::from_value(body)
                .map_err(|e| SyncError::Remote(format!("Invalid file list: {}", e)))?;
            for raw in &page.files {
                nodes.push(parse_node(raw)?);
            }

            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }

        debug!("Listed {} children of {}", nodes.len(), node_id);
        Ok(nodes)
    }

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<Node> {
        let request = self
            .client
            .post(self.files_url())
            .query(&[("supportsAllDrives", "true"), ("fields", NODE_FIELDS)])
            .json(&json!({
                "name": name,
                "mimeType": FOLDER_MIME,
                "parents": [parent_id],
            }));
        match self.execute(request).await? {
            Some(body) => parse_node(&body),
            None => Err(SyncError::NotFound(parent_id.to_string())),
        }
    }

    async fn copy_file(
        &self,
        file_id: &str,
        dest_parent_id: &str,
        new_name: Option<&str>,
    ) -> Result<Node> {
        let mut metadata = json!({ "parents": [dest_parent_id] });
        if let Some(name) = new_name {
            metadata["name"] = json!(name);
        }
        let request = self
            .client
            .post(format!("{}/copy", self.file_url(file_id)))
            .query(&[("supportsAllDrives", "true"), ("fields", NODE_FIELDS)])
            .json(&metadata);
        match self.execute(request).await? {
            Some(body) => parse_node(&body),
            None => Err(SyncError::NotFound(file_id.to_string())),
        }
    }

    async fn delete_node(&self, node_id: &str) -> Result<()> {
        let request = self
            .client
            .delete(self.file_url(node_id))
            .query(&[("supportsAllDrives", "true")]);
        if self.execute(request).await?.is_none() {
            debug!("Delete of {} skipped, already gone", node_id);
        }
        Ok(())
    }

    async fn get_metadata(&self, node_id: &str) -> Result<Option<Node>> {
        let request = self
            .client
            .get(self.file_url(node_id))
            .query(&[("supportsAllDrives", "true"), ("fields", NODE_FIELDS)]);
        match self.execute(request).await? {
            Some(body) => parse_node(&body).map(Some),
            None => Ok(None),
        }
    }

    async fn upload_file(
        &self,
        parent_id: &str,
        name: &str,
        content: &[u8],
        mime_type: &str,
    ) -> Result<Node> {
        let boundary = format!("drive-mirror-{}", uuid::Uuid::new_v4().simple());
        let metadata = json!({ "name": name, "parents": [parent_id] });
        let body = multipart_body(&boundary, &metadata, content, mime_type);

        let request = self
            .client
            .post(format!("{}/files", self.upload_base))
            .query(&[
                ("uploadType", "multipart"),
                ("supportsAllDrives", "true"),
                ("fields", NODE_FIELDS),
            ])
            .header(CONTENT_TYPE, format!("multipart/related; boundary={}", boundary))
            .body(body);
        match self.execute(request).await? {
            Some(body) => parse_node(&body),
            None => Err(SyncError::NotFound(parent_id.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_folder_and_file_records() {
        let folder = parse_node(&json!({
            "id": "f1",
            "name": "Element 1",
            "mimeType": FOLDER_MIME,
            "parents": ["root"]
        }))
        .unwrap();
        assert!(folder.is_folder());
        assert_eq!(folder.parent_id.as_deref(), Some("root"));

        let file = parse_node(&json!({
            "id": "d1",
            "name": "policy.pdf",
            "mimeType": "application/pdf"
        }))
        .unwrap();
        assert_eq!(file.kind, NodeKind::File);
        assert_eq!(file.parent_id, None);
    }

    #[test]
    fn rejects_incomplete_records() {
        for raw in [
            json!({ "name": "x", "mimeType": FOLDER_MIME }),
            json!({ "id": "", "name": "x", "mimeType": FOLDER_MIME }),
            json!({ "id": "a", "mimeType": FOLDER_MIME }),
            json!({ "id": "a", "name": "x" }),
            json!({ "id": 7, "name": "x", "mimeType": FOLDER_MIME }),
        ] {
            assert!(matches!(parse_node(&raw), Err(SyncError::Remote(_))), "{}", raw);
        }
    }

    #[test]
    fn query_values_are_escaped() {
        assert_eq!(escape_query("abc"), "abc");
        assert_eq!(escape_query("it's"), "it\\'s");
        assert_eq!(escape_query("a\\b"), "a\\\\b");
    }

    #[test]
    fn multipart_body_layout() {
        let body = multipart_body("b0", &json!({ "name": "a.md" }), b"hello", "text/markdown");
        let text = String::from_utf8(body).unwrap();
        assert_eq!(
            text,
            "--b0\r\n\
             Content-Type: application/json; charset=UTF-8\r\n\r\n\
             {\"name\":\"a.md\"}\r\n\
             --b0\r\n\
             Content-Type: text/markdown\r\n\r\n\
             hello\r\n\
             --b0--\r\n"
        );
    }

    #[tokio::test]
    async fn missing_token_is_unavailable() {
        let gateway = DriveGateway::new(
            "http://127.0.0.1:9",
            "http://127.0.0.1:9",
            None,
            Some(Duration::from_secs(1)),
        )
        .unwrap();

        assert_eq!(gateway.list_children("x").await, Err(SyncError::Unavailable));
        assert_eq!(gateway.delete_node("x").await, Err(SyncError::Unavailable));
    }

    #[test]
    fn links_point_at_drive() {
        let gateway =
            DriveGateway::new("http://a", "http://b", None, Some(Duration::from_secs(1))).unwrap();
        assert_eq!(
            gateway.node_link("abc", NodeKind::Folder),
            "https://drive.google.com/drive/folders/abc"
        );
    }
}
