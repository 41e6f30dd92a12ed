//! E2E tests for the backup trigger and authorization flow

mod common;

use common::{TestOptions, TestServer, CODE, CSRF_STATE};
use reqwest::StatusCode;
use std::time::Duration;

use driveback_storage::RemoteOp;

#[tokio::test]
async fn test_health() {
    let server = TestServer::new().await;

    let response = server.get("/health").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_first_backup_creates_then_updates() {
    let server = TestServer::new().await;

    let (status, body) = server.get_json("/backup").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "pong");
    assert_eq!(server.state.engine.state().await.current_id(), "mem-1");

    let (status, _) = server.get_json("/backup").await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(
        server.remote.ops().await,
        vec![
            RemoteOp::Create { id: "mem-1".to_string() },
            RemoteOp::Update { id: "mem-1".to_string() },
        ]
    );
    assert_eq!(
        server.remote.object_name("mem-1").await.as_deref(),
        Some("test_folder.zip")
    );
}

#[tokio::test]
async fn test_missing_archive_returns_500_and_server_survives() {
    let server = TestServer::new().await;
    tokio::fs::remove_file(server.archive_path()).await.unwrap();

    let (status, body) = server.get_json("/backup").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["message"], "File backup failed");
    assert!(body["error"].as_str().unwrap().contains("I/O error"));
    assert!(server.remote.ops().await.is_empty());

    // Still serving, and the next trigger works once the archive is back.
    assert_eq!(server.get("/health").await.status(), StatusCode::OK);
    tokio::fs::write(server.archive_path(), b"restored").await.unwrap();
    let (status, _) = server.get_json("/backup").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(server.remote.create_count().await, 1);
}

#[tokio::test]
async fn test_concurrent_triggers_create_once() {
    let server = TestServer::start(TestOptions {
        remote_delay: Some(Duration::from_millis(20)),
        ..TestOptions::default()
    })
    .await;

    let mut requests = Vec::new();
    for _ in 0..4 {
        let client = server.client.clone();
        let url = server.url("/backup");
        requests.push(tokio::spawn(async move {
            client.get(url).send().await.unwrap().status()
        }));
    }

    for request in requests {
        assert_eq!(request.await.unwrap(), StatusCode::OK);
    }

    assert_eq!(server.remote.create_count().await, 1);
    assert_eq!(server.remote.update_count().await, 3);
    assert_eq!(server.remote.len().await, 1);

    let (_, status) = server.get_json("/status").await;
    assert_eq!(status["file_id"], "mem-1");
    assert_eq!(status["backups_completed"], 4);
}

#[tokio::test]
async fn test_timeout_returns_504() {
    let server = TestServer::start(TestOptions {
        remote_delay: Some(Duration::from_secs(5)),
        timeout: Duration::from_millis(50),
        ..TestOptions::default()
    })
    .await;

    let (status, body) = server.get_json("/backup").await;

    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["message"], "File backup failed");
    assert_eq!(server.state.engine.state().await.file_id, None);
}

#[tokio::test]
async fn test_authorization_flow() {
    let server = TestServer::start(TestOptions {
        authorized: false,
        ..TestOptions::default()
    })
    .await;

    let (status, body) = server.get_json("/backup").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["message"], "Authorization pending");

    let response = server.get("/authorize").await;
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    let location = response.headers()["location"].to_str().unwrap();
    assert!(location.contains(CSRF_STATE));

    let (status, _) = server.get_json("/callback?code=4/test-code").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = server
        .get_json(&format!("/callback?code={}&state=forged", CODE))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = server
        .get_json(&format!("/callback?code=wrong&state={}", CSRF_STATE))
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(!server.token_path().exists());

    let (status, body) = server
        .get_json(&format!("/callback?code={}&state={}", CODE, CSRF_STATE))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Authorization complete");
    assert!(server.token_path().exists());

    let (status, _) = server.get_json("/backup").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(server.state.engine.state().await.current_id(), "mem-1");

    let (status, _) = server.get_json("/authorize").await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_provider_error_on_callback() {
    let server = TestServer::start(TestOptions {
        authorized: false,
        ..TestOptions::default()
    })
    .await;

    let (status, body) = server.get_json("/callback?error=access_denied").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("access_denied"));
    assert!(!server.state.auth.is_authorized().await);
}

#[tokio::test]
async fn test_status_reports_backup_state() {
    let server = TestServer::new().await;

    let (status, body) = server.get_json("/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["authorized"], true);
    assert!(body["file_id"].is_null());
    assert!(body["last_backup_at"].is_null());
    assert_eq!(body["backups_completed"], 0);

    server.get_json("/backup").await;

    let (_, body) = server.get_json("/status").await;
    assert_eq!(body["file_id"], "mem-1");
    assert!(body["last_backup_at"].is_string());
    assert_eq!(body["last_size_bytes"], 17);
    assert_eq!(body["backups_completed"], 1);
}

#[tokio::test]
async fn test_shutdown_stops_server() {
    let server = TestServer::new().await;
    assert_eq!(server.get("/health").await.status(), StatusCode::OK);

    server.state.shutdown.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), server.handle)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}
