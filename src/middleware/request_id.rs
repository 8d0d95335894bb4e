//! Request ID stage for request correlation
//!
//! Reuses a well-formed incoming `x-request-id` (so ids survive a proxy hop)
//! or generates a UUID v4, then makes it available throughout the request
//! lifecycle via the request context and Axum extensions.

use async_trait::async_trait;
use axum::{
    extract::Request,
    http::{HeaderValue, header::HeaderName},
    response::Response,
};
use uuid::Uuid;

use super::{Next, RequestContext, Stage};

/// Request ID header name
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Longest client-supplied id that is accepted
pub const MAX_REQUEST_ID_LEN: usize = 128;

/// Request ID wrapper type for Axum extensions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a new random request ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Accept a client-supplied id if it is short and printable ASCII
    pub fn from_header(value: &HeaderValue) -> Option<Self> {
        let value = value.to_str().ok()?.trim();
        let valid = !value.is_empty()
            && value.len() <= MAX_REQUEST_ID_LEN
            && value.bytes().all(|b| b.is_ascii_graphic());
        valid.then(|| Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stage that attaches a request ID to each request and its response
pub struct RequestIdStage;

#[async_trait]
impl Stage for RequestIdStage {
    fn name(&self) -> &'static str {
        "request_id"
    }

    async fn handle(
        &self,
        ctx: &mut RequestContext,
        mut request: Request,
        next: Next<'_>,
    ) -> Response {
        let request_id = request
            .headers()
            .get(&REQUEST_ID_HEADER)
            .and_then(RequestId::from_header)
            .unwrap_or_default();

        tracing::debug!(
            request_id = %request_id,
            method = %ctx.method,
            uri = %request.uri(),
            "Incoming request"
        );

        request.extensions_mut().insert(request_id.clone());
        ctx.request_id = Some(request_id.clone());

        let mut response = next.run(ctx, request).await;

        if let Ok(header_value) = HeaderValue::from_str(request_id.as_str()) {
            response
                .headers_mut()
                .insert(REQUEST_ID_HEADER, header_value);
        }

        response
    }
}
