//! 404 page for unmatched paths

use axum::{
    extract::{OriginalUri, State},
    http::StatusCode,
    response::Html,
};
use serde_json::json;

use super::AppState;
use crate::error::AppResult;

/// Render the `404` view; a rendering failure becomes a plain-text 500
///
/// `OriginalUri` keeps the full path when this runs as the fallback of a
/// nested directory service.
pub async fn handler(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
) -> AppResult<(StatusCode, Html<String>)> {
    let page = state
        .templates()
        .render("404", &json!({ "path": uri.path() }))?;
    Ok((StatusCode::NOT_FOUND, Html(page)))
}
