//! Index page

use axum::{extract::State, response::Html};
use serde_json::json;

use super::AppState;
use crate::error::AppResult;

/// Render the `index` view with the configured version
pub async fn handler(State(state): State<AppState>) -> AppResult<Html<String>> {
    let page = state
        .templates()
        .render("index", &json!({ "version": state.config().server.version }))?;
    Ok(Html(page))
}
