//! One structured log event per request

use async_trait::async_trait;
use axum::{extract::Request, response::Response};

use super::{Next, RequestContext, Stage};

pub struct LoggingStage;

#[async_trait]
impl Stage for LoggingStage {
    fn name(&self) -> &'static str {
        "logging"
    }

    async fn handle(&self, ctx: &mut RequestContext, request: Request, next: Next<'_>) -> Response {
        let response = next.run(ctx, request).await;
        let status = response.status();
        ctx.status = Some(status);

        let latency_ms = ctx.started_at.elapsed().as_secs_f64() * 1000.0;
        macro_rules! request_event {
            ($level:expr) => {
                tracing::event!(
                    $level,
                    status = status.as_u16(),
                    method = %ctx.method,
                    path = %ctx.path,
                    ip = %ctx.client_ip,
                    latency_ms,
                    user_agent = %ctx.user_agent,
                    request_id = ctx.request_id_str(),
                    "request"
                )
            };
        }

        if status.is_server_error() {
            request_event!(tracing::Level::ERROR);
        } else if status.is_client_error() {
            request_event!(tracing::Level::WARN);
        } else {
            request_event!(tracing::Level::INFO);
        }

        response
    }
}
