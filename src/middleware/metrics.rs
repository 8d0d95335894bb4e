//! Request metrics stage

use async_trait::async_trait;
use axum::{extract::Request, response::Response};
use std::sync::Arc;

use super::{Next, RequestContext, Stage};
use crate::metrics::MetricsRegistry;
use crate::routes::Route;

/// Tracks in-flight requests and records count and latency per status
///
/// Requests to the metrics endpoint are not observed.
pub struct MetricsStage {
    registry: Arc<MetricsRegistry>,
}

impl MetricsStage {
    pub fn new(registry: Arc<MetricsRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Stage for MetricsStage {
    fn name(&self) -> &'static str {
        "metrics"
    }

    async fn handle(&self, ctx: &mut RequestContext, request: Request, next: Next<'_>) -> Response {
        if ctx.route == Route::Metrics {
            return next.run(ctx, request).await;
        }

        // Dropped during a panic or cancellation, the guard still records.
        let in_flight = self.registry.track(ctx.method.as_str(), &ctx.route_label);
        let response = next.run(ctx, request).await;
        in_flight.finish(response.status().as_u16());
        response
    }
}
