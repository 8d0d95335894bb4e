//! Version endpoint

use axum::{Json, extract::State};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AppState;

/// Body of `GET /version`
#[derive(Debug, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    /// Serialized as RFC 3339
    pub timestamp: DateTime<Utc>,
}

/// Report the configured version and the current server time
///
/// # Example
///
/// ```bash
/// curl http://localhost:3000/version
/// # {"version":"2.0.0","timestamp":"2026-10-18T09:12:44.051Z"}
/// ```
pub async fn handler(State(state): State<AppState>) -> Json<VersionResponse> {
    Json(VersionResponse {
        version: state.config().server.version.clone(),
        timestamp: Utc::now(),
    })
}
