//! Response caching stage
//!
//! GET and HEAD on ordinary routes are answered from the cache while the
//! entry is fresh. Misses run the rest of the pipeline, then buffer and store
//! the body if it is small enough. Streaming and metrics routes never touch
//! the cache.

use async_trait::async_trait;
use axum::{
    body::{Body, HttpBody},
    extract::Request,
    http::{HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use std::time::Instant;

use super::{Next, RequestContext, Stage};
use crate::cache::{ResponseCache, X_CACHE};
use crate::error::INTERNAL_ERROR_BODY;
use crate::routes::Route;

pub const CACHE_HIT: &str = "hit";
pub const CACHE_MISS: &str = "miss";
pub const CACHE_UNREACHABLE: &str = "unreachable";

pub struct CacheStage {
    cache: Arc<ResponseCache>,
}

impl CacheStage {
    pub fn new(cache: Arc<ResponseCache>) -> Self {
        Self { cache }
    }

    fn bypass(ctx: &RequestContext) -> bool {
        let method_ok = ctx.method == Method::GET || ctx.method == Method::HEAD;
        !method_ok || ctx.route.is_streaming() || ctx.route == Route::Metrics
    }
}

fn mark(mut response: Response, value: &'static str) -> Response {
    response
        .headers_mut()
        .insert(X_CACHE, HeaderValue::from_static(value));
    response
}

#[async_trait]
impl Stage for CacheStage {
    fn name(&self) -> &'static str {
        "cache"
    }

    async fn handle(&self, ctx: &mut RequestContext, request: Request, next: Next<'_>) -> Response {
        if Self::bypass(ctx) {
            let response = next.run(ctx, request).await;
            return mark(response, CACHE_UNREACHABLE);
        }

        let key = ResponseCache::key_for(&ctx.path);
        let now = Instant::now();
        if let Some(entry) = self.cache.lookup_at(&key, now) {
            tracing::debug!(key = %key, "Cache hit");
            ctx.status = Some(entry.status);
            let mut response = entry.to_response(now);
            if ctx.method == Method::HEAD {
                *response.body_mut() = Body::empty();
            }
            return mark(response, CACHE_HIT);
        }

        let response = next.run(ctx, request).await;

        // Only full GET bodies are stored; responses negotiated on request
        // headers (Vary) would be served to the wrong clients.
        let storable = ctx.method == Method::GET
            && response.status().is_success()
            && !response.headers().contains_key(header::VARY)
            && response
                .body()
                .size_hint()
                .upper()
                .is_some_and(|n| n <= self.cache.max_body_bytes() as u64);
        if !storable {
            return mark(response, CACHE_MISS);
        }

        let (parts, body) = response.into_parts();
        match axum::body::to_bytes(body, self.cache.max_body_bytes()).await {
            Ok(bytes) => {
                self.cache
                    .store(&key, parts.status, &parts.headers, bytes.clone());
                mark(Response::from_parts(parts, Body::from(bytes)), CACHE_MISS)
            }
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Failed to buffer response for cache");
                ctx.status = Some(StatusCode::INTERNAL_SERVER_ERROR);
                (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_BODY).into_response()
            }
        }
    }
}
