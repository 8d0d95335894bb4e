//! Shared fixtures for integration tests
//!
//! Each test gets its own temporary site tree so tests can run in parallel.

#![allow(dead_code)]

use axum::{
    Router,
    body::{Body, Bytes},
    extract::connect_info::MockConnectInfo,
    http::{Method, Request},
    response::Response,
};
use dummypage::{
    config::Config,
    handlers::{self, AppState},
};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub const INDEX_VIEW: &str = "<h1>dummypage {{ version }}</h1>";
pub const NOT_FOUND_VIEW: &str = "<h1>Not Found</h1><p>{{ path }}</p>";
pub const STYLE_CSS: &str = "body {\n  color: #222;\n  font-family: system-ui, sans-serif;\n  margin: 3rem auto;\n}\n";
pub const HELLO_TXT: &str = "hello from the files directory\n";
pub const BIG_FILE: &str = "big.bin";
pub const BIG_FILE_LEN: usize = 300_000;

/// Deterministic content spanning several 64 KiB chunks
pub fn big_file_bytes() -> Vec<u8> {
    (0..BIG_FILE_LEN).map(|i| (i % 251) as u8).collect()
}

/// A throwaway site: static assets, views, plain files and large files
pub struct Site {
    pub dir: TempDir,
    pub config: Config,
    pub shutdown: CancellationToken,
}

impl Site {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let root = dir.path();

        write(root, "static/style.css", STYLE_CSS.as_bytes());
        write(root, "static/templates/index.html", INDEX_VIEW.as_bytes());
        write(root, "static/templates/404.html", NOT_FOUND_VIEW.as_bytes());
        write(root, "files/hello.txt", HELLO_TXT.as_bytes());
        write(root, &format!("large/{}", BIG_FILE), &big_file_bytes());
        write(root, "large/small.txt", b"0123456789");
        std::fs::create_dir_all(root.join("large/nested")).expect("Failed to create dir");
        write(root, "outside.txt", b"secret");

        let mut config = Config::default();
        config.server.addr = "127.0.0.1:0".to_string();
        config.assets.static_dir = root.join("static");
        config.assets.views_dir = root.join("static/templates");
        config.assets.files_dir = root.join("files");
        config.assets.large_files_dir = root.join("large");
        // Most tests fire many requests; rate limiting gets its own tests.
        config.rate_limit.max = 10_000;

        Self {
            dir,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn state(&self) -> AppState {
        AppState::new(Arc::new(self.config.clone()), self.shutdown.clone())
            .expect("AppState::new should succeed")
    }

    /// Full router with the standard pipeline, as a client at 10.0.0.1 sees it
    pub fn router(&self) -> (Router, AppState) {
        let state = self.state();
        let router = handlers::build_router(state.clone())
            .expect("build_router should succeed")
            .layer(MockConnectInfo(client_addr()));
        (router, state)
    }
}

fn write(root: &Path, relative: &str, contents: &[u8]) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create parent dir");
    }
    std::fs::write(path, contents).expect("Failed to write fixture file");
}

pub fn client_addr() -> SocketAddr {
    SocketAddr::from(([10, 0, 0, 1], 40000))
}

pub fn get(uri: &str) -> Request<Body> {
    request(Method::GET, uri)
}

pub fn request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("valid request")
}

pub async fn body_bytes(response: Response) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should be readable")
}

pub async fn body_text(response: Response) -> String {
    String::from_utf8(body_bytes(response).await.to_vec()).expect("body should be UTF-8")
}
