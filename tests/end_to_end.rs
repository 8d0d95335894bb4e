//! End-to-end tests for the assembled router
//!
//! Most tests drive the router in-process with `oneshot`; the shutdown test
//! binds a real socket and talks to it with `reqwest`.

mod common;

use axum::http::{Method, StatusCode, header};
use chrono::{DateTime, Utc};
use common::{HELLO_TXT, Site, body_text, get, request};
use dummypage::{
    handlers::{self, version::VersionResponse},
    server::Server,
};
use std::time::Duration;
use tower::ServiceExt;

#[tokio::test]
async fn test_index_renders_version() {
    let site = Site::new();
    let (app, _state) = site.router();

    let response = app.oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/html")
    );
    assert_eq!(body_text(response).await, "<h1>dummypage 2.0.0</h1>");
}

#[tokio::test]
async fn test_version_returns_json_with_rfc3339_timestamp() {
    let mut site = Site::new();
    site.config.server.version = "9.9.9".to_string();
    let (app, _state) = site.router();

    let before = Utc::now();
    let response = app.oneshot(get("/version")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");

    let raw: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(raw["version"], "9.9.9");
    let timestamp = raw["timestamp"].as_str().unwrap();
    let parsed = DateTime::parse_from_rfc3339(timestamp).expect("timestamp should be RFC 3339");
    assert!(parsed.with_timezone(&Utc) >= before - chrono::Duration::seconds(1));

    let typed: VersionResponse = serde_json::from_value(raw).unwrap();
    assert_eq!(typed.version, "9.9.9");
}

#[tokio::test]
async fn test_unknown_path_renders_not_found_page() {
    let site = Site::new();
    let (app, _state) = site.router();

    let response = app.oneshot(get("/nonexistent")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        body_text(response).await,
        "<h1>Not Found</h1><p>&#x2F;nonexistent</p>"
    );
}

#[tokio::test]
async fn test_not_found_page_escapes_path() {
    let site = Site::new();
    let (app, _state) = site.router();

    let response = app.oneshot(get("/%3Cscript%3E")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_text(response).await;
    assert!(body.contains("%3Cscript%3E"));
    assert!(!body.contains("<script>"));
}

#[tokio::test]
async fn test_traversal_on_large_route_is_forbidden() {
    let site = Site::new();
    let (app, _state) = site.router();

    let response = app.oneshot(get("/large/../../etc/passwd")).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_files_prefix_serves_directory() {
    let site = Site::new();

    let (app, _state) = site.router();
    let response = app.oneshot(get("/files/hello.txt")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, HELLO_TXT);

    let (app, _state) = site.router();
    let response = app.oneshot(get("/files/missing.txt")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        body_text(response).await,
        "<h1>Not Found</h1><p>&#x2F;files&#x2F;missing.txt</p>"
    );
}

#[tokio::test]
async fn test_static_assets_carry_max_age() {
    let site = Site::new();
    let (app, _state) = site.router();

    let response = app.oneshot(get("/style.css")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CACHE_CONTROL],
        "public, max-age=3600"
    );
    assert!(body_text(response).await.contains("color"));
}

#[tokio::test]
async fn test_static_assets_are_gzipped_on_request() {
    let site = Site::new();
    let (app, _state) = site.router();

    let mut request = get("/style.css");
    request
        .headers_mut()
        .insert(header::ACCEPT_ENCODING, "gzip".parse().unwrap());
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_ENCODING], "gzip");
}

#[tokio::test]
async fn test_missing_view_degrades_to_plain_500() {
    let site = Site::new();
    std::fs::remove_file(site.root().join("static/templates/index.html")).unwrap();
    let (app, _state) = site.router();

    let response = app.oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_text(response).await, "Internal Server Error");
}

#[tokio::test]
async fn test_metrics_endpoint_can_be_disabled() {
    let mut site = Site::new();
    site.config.metrics.enabled = false;
    let (app, _state) = site.router();

    // Falls through to the static directory, which has no such file
    let response = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_head_on_version_has_no_body() {
    let site = Site::new();
    let (app, _state) = site.router();

    let response = app.oneshot(request(Method::HEAD, "/version")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.is_empty());
}

#[tokio::test]
async fn test_graceful_shutdown_over_real_socket() {
    let mut site = Site::new();
    site.config.server.shutdown_grace_seconds = 1;
    let state = site.state();
    let router = handlers::build_router(state).unwrap();

    let server = Server::bind(&site.config.server).await.unwrap();
    let addr = server.local_addr().unwrap();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

    let running = tokio::spawn(server.run(
        router,
        async move {
            let _ = stop_rx.await;
        },
        site.shutdown.clone(),
    ));

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{}/version", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: VersionResponse = response.json().await.unwrap();
    assert_eq!(body.version, "2.0.0");

    stop_tx.send(()).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(10), running)
        .await
        .expect("server should stop within the grace period")
        .unwrap();
    assert!(result.is_ok());
    assert!(site.shutdown.is_cancelled());

    // The listener is gone
    let after = client
        .get(format!("http://{}/version", addr))
        .timeout(Duration::from_secs(2))
        .send()
        .await;
    assert!(after.is_err());
}

#[tokio::test]
async fn test_shutdown_cuts_stalled_download_after_grace() {
    let mut site = Site::new();
    site.config.server.shutdown_grace_seconds = 1;
    let state = site.state();
    let router = handlers::build_router(state.clone()).unwrap();

    let server = Server::bind(&site.config.server).await.unwrap();
    let addr = server.local_addr().unwrap();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let running = tokio::spawn(server.run(
        router,
        async move {
            let _ = stop_rx.await;
        },
        site.shutdown.clone(),
    ));

    // Start a download and stop reading after the first chunk
    let mut response = reqwest::get(format!("http://{}/large/{}", addr, common::BIG_FILE))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let first = response.chunk().await.unwrap();
    assert!(first.is_some());

    stop_tx.send(()).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(10), running)
        .await
        .expect("server should stop after the grace period")
        .unwrap();
    assert!(result.is_ok());
    assert!(site.shutdown.is_cancelled());

    drop(response);
    // The body task may need a moment to observe the cancellation
    for _ in 0..50 {
        if state.streamer().active_streams() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(state.streamer().active_streams(), 0);
}
