//! DriveGateway against a local HTTP stub.

mod common;

use std::time::Duration;

use common::{Reply, serve};
use drive_mirror::DriveGateway;
use drive_mirror::drive::FOLDER_MIME;
use mirror_core::{NodeKind, RemoteStore, SyncError};
use serde_json::json;

fn gateway(url: &str) -> DriveGateway {
    DriveGateway::new(url, url, Some("token-123".into()), Some(Duration::from_secs(5))).unwrap()
}

#[tokio::test]
async fn listing_follows_page_tokens() {
    let server = serve(vec![
        Reply::json(
            200,
            json!({
                "files": [{ "id": "a", "name": "Element 1", "mimeType": FOLDER_MIME }],
                "nextPageToken": "page-2"
            }),
        ),
        Reply::json(
            200,
            json!({
                "files": [{ "id": "b", "name": "guide.pdf", "mimeType": "application/pdf" }]
            }),
        ),
    ])
    .await;

    let nodes = gateway(&server.url).list_children("root").await.unwrap();

    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes[0].kind, NodeKind::Folder);
    assert_eq!(nodes[1].name, "guide.pdf");

    let requests = server.requests.lock().unwrap();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].line.starts_with("GET /files?"));
    assert!(requests[0].line.contains("trashed"));
    assert!(requests[0].line.contains("supportsAllDrives=true"));
    assert!(!requests[0].line.contains("&pageToken="));
    assert!(requests[1].line.contains("&pageToken=page-2"));
    assert!(requests[0].headers.to_lowercase().contains("authorization: bearer token-123"));
}

#[tokio::test]
async fn missing_folder_lists_empty() {
    let server = serve(vec![Reply::json(404, json!({ "error": "notFound" }))]).await;

    let nodes = gateway(&server.url).list_children("gone").await.unwrap();
    assert!(nodes.is_empty());
}

#[tokio::test]
async fn not_found_is_absent_not_an_error() {
    let server = serve(vec![Reply::empty(404), Reply::empty(404)]).await;
    let drive = gateway(&server.url);

    assert_eq!(drive.get_metadata("gone").await, Ok(None));
    assert_eq!(drive.delete_node("gone").await, Ok(()));
}

#[tokio::test]
async fn create_folder_sends_folder_metadata() {
    let server = serve(vec![Reply::json(
        200,
        json!({ "id": "new", "name": "4.3", "mimeType": FOLDER_MIME, "parents": ["p"] }),
    )])
    .await;

    let node = gateway(&server.url).create_folder("p", "4.3").await.unwrap();

    assert_eq!(node.id, "new");
    assert!(node.is_folder());
    let requests = server.requests.lock().unwrap();
    assert!(requests[0].line.starts_with("POST /files?"));
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["mimeType"], FOLDER_MIME);
    assert_eq!(body["parents"], json!(["p"]));
}

#[tokio::test]
async fn copy_renames_into_destination() {
    let server = serve(vec![Reply::json(
        200,
        json!({ "id": "copy", "name": "policy.docx", "mimeType": "application/msword" }),
    )])
    .await;

    gateway(&server.url)
        .copy_file("src", "dest", Some("policy.docx"))
        .await
        .unwrap();

    let requests = server.requests.lock().unwrap();
    assert!(requests[0].line.starts_with("POST /files/src/copy?"));
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body, json!({ "parents": ["dest"], "name": "policy.docx" }));
}

#[tokio::test]
async fn upload_is_multipart_related() {
    let server = serve(vec![Reply::json(
        200,
        json!({ "id": "toc", "name": "DAFTAR ISI.md", "mimeType": "text/markdown" }),
    )])
    .await;

    let node = gateway(&server.url)
        .upload_file("root", "DAFTAR ISI.md", b"# DAFTAR ISI", "text/markdown")
        .await
        .unwrap();

    assert_eq!(node.id, "toc");
    let requests = server.requests.lock().unwrap();
    assert!(requests[0].line.contains("uploadType=multipart"));
    assert!(requests[0].headers.contains("multipart/related; boundary=drive-mirror-"));
    let body = requests[0].body_text();
    assert!(body.contains("\"name\":\"DAFTAR ISI.md\""));
    assert!(body.contains("Content-Type: text/markdown\r\n\r\n# DAFTAR ISI\r\n"));
}

#[tokio::test]
async fn rejected_token_is_unavailable() {
    let server = serve(vec![Reply::json(401, json!({ "error": "invalid_token" }))]).await;

    let err = gateway(&server.url).list_children("root").await.unwrap_err();
    assert_eq!(err, SyncError::Unavailable);
}

#[tokio::test]
async fn server_errors_and_bad_records_are_remote() {
    let server = serve(vec![
        Reply::json(500, json!({ "error": "backendError" })),
        Reply::json(200, json!({ "files": [{ "id": "a", "name": "x" }] })),
    ])
    .await;
    let drive = gateway(&server.url);

    assert!(matches!(drive.list_children("root").await, Err(SyncError::Remote(_))));
    assert!(matches!(drive.list_children("root").await, Err(SyncError::Remote(_))));
}

#[tokio::test]
async fn request_timeout_is_optional() {
    let server = serve(vec![
        Reply::json(200, json!({ "files": [] })).delayed(Duration::from_millis(300)),
        Reply::json(200, json!({ "files": [] })).delayed(Duration::from_millis(300)),
    ])
    .await;

    let unbounded = DriveGateway::new(&server.url, &server.url, Some("t".into()), None).unwrap();
    assert_eq!(unbounded.list_children("root").await, Ok(Vec::new()));

    let bounded = DriveGateway::new(
        &server.url,
        &server.url,
        Some("t".into()),
        Some(Duration::from_millis(50)),
    )
    .unwrap();
    assert!(matches!(bounded.list_children("root").await, Err(SyncError::Remote(_))));
}
