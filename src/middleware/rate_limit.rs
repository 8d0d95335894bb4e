//! Rate limiting stage keyed by client address

use async_trait::async_trait;
use axum::{
    extract::Request,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use super::{Next, RequestContext, Stage};
use crate::error::AppError;
use crate::rate_limit::RateLimiter;

pub struct RateLimitStage {
    limiter: Arc<RateLimiter>,
    exempt_streaming: bool,
}

impl RateLimitStage {
    pub fn new(limiter: Arc<RateLimiter>, exempt_streaming: bool) -> Self {
        Self {
            limiter,
            exempt_streaming,
        }
    }
}

#[async_trait]
impl Stage for RateLimitStage {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn handle(&self, ctx: &mut RequestContext, request: Request, next: Next<'_>) -> Response {
        if self.exempt_streaming && ctx.route.is_streaming() {
            return next.run(ctx, request).await;
        }

        let decision = self.limiter.check(&ctx.client_ip);
        if !decision.allowed {
            tracing::warn!(
                ip = %ctx.client_ip,
                path = %ctx.path,
                request_id = ctx.request_id_str(),
                limit = decision.limit,
                retry_after_secs = decision.reset_secs(),
                "Rate limit exceeded"
            );
            ctx.status = Some(StatusCode::TOO_MANY_REQUESTS);
            let mut response = AppError::RateLimited {
                retry_after_secs: decision.reset_secs(),
            }
            .into_response();
            decision.apply_headers(response.headers_mut());
            return response;
        }

        let mut response = next.run(ctx, request).await;
        self.limiter.complete(&decision, response.status());
        decision.apply_headers(response.headers_mut());
        response
    }
}
