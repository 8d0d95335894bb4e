//! Large-file downloads

use axum::{
    extract::{Path, State},
    http::{HeaderMap, header},
    response::Response,
};

use super::AppState;
use crate::error::AppResult;

/// Stream `file` from the large-files directory
///
/// # Response
///
/// - `200 OK` (or `206 Partial Content` for a `Range` request) with the file
/// - `403 Forbidden` for paths escaping the directory, or directories
/// - `404 Not Found` if the file does not exist
/// - `416 Range Not Satisfiable` for ranges past the end of the file
pub async fn handler(
    State(state): State<AppState>,
    Path(file): Path<String>,
    headers: HeaderMap,
) -> AppResult<Response> {
    state
        .streamer()
        .serve(&file, headers.get(header::RANGE))
        .await
}
