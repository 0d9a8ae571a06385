//! Cloudinary backend against a mock HTTP server.

#![cfg(feature = "storage-cloudinary")]

use futures::StreamExt;
use mockito::{Matcher, Server, ServerGuard};
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use stowage_storage::cloudinary::{CloudinaryError, CloudinaryStorage, Credentials, HttpCloudinaryApi};
use stowage_storage::{ByteRange, Storage, StorageError, StoreBody};

const SECRET: &str = "mockito-secret-do-not-leak";

fn storage(server: &ServerGuard) -> CloudinaryStorage {
    let credentials = Credentials::new(
        "demo".to_string(),
        "1234567890".to_string(),
        SECRET.to_string(),
    );
    let api = HttpCloudinaryApi::new(credentials.clone(), server.url(), Duration::from_secs(5))
        .unwrap();

    CloudinaryStorage::new(credentials, Arc::new(api))
        .with_api_base_url(&server.url())
        .with_delivery_base_url(&server.url())
}

#[tokio::test]
async fn store_posts_signed_multipart_upload() {
    let mut server = Server::new_async().await;
    let secure_url = format!("{}/demo/raw/upload/v1/notes/today", server.url());
    let mock = server
        .mock("POST", "/v1_1/demo/raw/upload")
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex(r#"name="public_id""#.to_string()),
            Matcher::Regex("notes/today".to_string()),
            Matcher::Regex(r#"name="signature""#.to_string()),
            Matcher::Regex(r#"name="api_key""#.to_string()),
            Matcher::Regex("hello cloud".to_string()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(format!(
            r#"{{"public_id":"notes/today","secure_url":"{}","bytes":11,"version":1}}"#,
            secure_url
        ))
        .create_async()
        .await;

    let url = storage(&server)
        .store(
            StoreBody::from("hello cloud".to_string()),
            "notes/today.txt",
            Some("text/plain"),
            None,
        )
        .await
        .unwrap();

    assert_eq!(url, secure_url);
    mock.assert_async().await;
}

#[tokio::test]
async fn store_failure_keeps_vendor_error() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/v1_1/demo/image/upload")
        .with_status(401)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error":{"message":"Invalid Signature"}}"#)
        .create_async()
        .await;

    let err = storage(&server)
        .store(StoreBody::from(vec![1, 2, 3]), "a/b.png", Some("image/png"), None)
        .await
        .unwrap_err();

    assert!(matches!(err, StorageError::UploadFailed { ref key, .. } if key == "a/b.png"));
    let source = err.source().unwrap();
    match source.downcast_ref::<CloudinaryError>() {
        Some(CloudinaryError::Status { status, message }) => {
            assert_eq!(*status, 401);
            assert_eq!(message, "Invalid Signature");
        }
        other => panic!("unexpected source: {:?}", other),
    }
    assert!(!err.to_string().contains(SECRET));
}

#[tokio::test]
async fn delete_treats_not_found_as_success() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v1_1/demo/raw/destroy")
        .match_body(Matcher::Regex("public_id=docs%2Freport".to_string()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"result":"not found"}"#)
        .create_async()
        .await;

    storage(&server).delete_file("docs/report.pdf").await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn delete_rejection_is_an_error() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/v1_1/demo/image/destroy")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"result":"error"}"#)
        .create_async()
        .await;

    let err = storage(&server).delete_file("a.png").await.unwrap_err();
    assert!(matches!(err, StorageError::DeleteFailed { .. }));
}

#[tokio::test]
async fn ranged_download_sends_range_header() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/demo/image/upload/v1/pics/cat")
        .match_header("range", "bytes=0-3")
        .with_status(206)
        .with_body("cat!")
        .create_async()
        .await;

    let stream = storage(&server)
        .get_file_stream("pics/cat.jpg", Some(ByteRange::new(Some(0), Some(3))))
        .await
        .unwrap();
    let chunks: Vec<_> = stream.collect().await;
    let body: Vec<u8> = chunks.into_iter().flat_map(|c| c.unwrap().to_vec()).collect();

    assert_eq!(body, b"cat!");
    mock.assert_async().await;
}

#[tokio::test]
async fn whole_object_download_sends_no_range_header() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/demo/image/upload/v1/pics/cat")
        .match_header("range", Matcher::Missing)
        .with_status(200)
        .with_body("whole cat")
        .create_async()
        .await;

    assert!(storage(&server)
        .get_file_stream("pics/cat.jpg", None)
        .await
        .is_some());
    mock.assert_async().await;
}

#[tokio::test]
async fn missing_object_yields_no_stream_and_no_temp_file() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/demo/image/upload/v1/gone")
        .with_status(404)
        .create_async()
        .await;

    let scratch = tempfile::tempdir().unwrap();
    let storage = storage(&server).with_scratch_dir(scratch.path());

    assert!(storage.get_file_stream("gone.png", None).await.is_none());
    assert!(matches!(
        storage.get_file_handle("gone.png").await,
        Err(StorageError::DownloadFailed { .. })
    ));
    assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn usage_uses_basic_auth() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/v1_1/demo/usage")
        .match_header("authorization", Matcher::Regex("^Basic ".to_string()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"plan":"Free","credits":{"usage":0.5,"limit":25},"storage":{"usage":1048576},"bandwidth":{"usage":0},"resources":4}"#,
        )
        .create_async()
        .await;

    let usage = storage(&server).usage().await.unwrap().unwrap();

    assert_eq!(usage.plan.as_deref(), Some("Free"));
    assert_eq!(usage.credits_used, Some(0.5));
    assert_eq!(usage.storage_bytes, Some(1_048_576));
    assert_eq!(usage.resources, Some(4));
    mock.assert_async().await;
}

#[tokio::test]
async fn usage_failure_keeps_status() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/v1_1/demo/usage")
        .with_status(401)
        .with_body("Unauthorized")
        .create_async()
        .await;

    let err = storage(&server).usage().await.unwrap_err();
    assert!(matches!(err, StorageError::UsageFailed { .. }));
    let source = err.source().unwrap().downcast_ref::<CloudinaryError>().unwrap();
    assert_eq!(source.status(), Some(401));
}
