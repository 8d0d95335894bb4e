//! Request-processing pipeline
//!
//! Cross-cutting concerns run as an ordered list of [`Stage`]s wrapped around
//! the router:
//!
//! ```text
//! recovery → request_id → csrf → rate_limit → cache → metrics → logging → router
//! ```
//!
//! Each stage receives the request, the per-request [`RequestContext`], and
//! a [`Next`] handle to the rest of the chain. A stage may answer on its own
//! (429, 403, cache hit) or call `next.run()` and post-process the response
//! on its way back out. The whole list is installed on the router as a single
//! Axum middleware layer by [`Pipeline::layer`].

use async_trait::async_trait;
use axum::{
    Router,
    extract::{Request, State},
    middleware as axum_middleware,
    response::Response,
};
use std::sync::Arc;

pub mod cache;
pub mod context;
pub mod csrf;
pub mod logging;
pub mod metrics;
pub mod rate_limit;
pub mod recovery;
pub mod request_id;

pub use context::RequestContext;
pub use request_id::{REQUEST_ID_HEADER, RequestId};

use crate::error::AppResult;
use crate::handlers::AppState;
use crate::routes::RouteTable;

/// One step of the request pipeline
#[async_trait]
pub trait Stage: Send + Sync + 'static {
    /// Short identifier used in logs and tests
    fn name(&self) -> &'static str;

    async fn handle(&self, ctx: &mut RequestContext, request: Request, next: Next<'_>) -> Response;
}

/// The remainder of the pipeline after the current stage
pub struct Next<'a> {
    stages: &'a [Arc<dyn Stage>],
    endpoint: axum_middleware::Next,
}

impl Next<'_> {
    /// Run the next stage, or the router once all stages have run
    pub async fn run(self, ctx: &mut RequestContext, request: Request) -> Response {
        match self.stages.split_first() {
            Some((stage, rest)) => {
                let next = Next {
                    stages: rest,
                    endpoint: self.endpoint,
                };
                stage.handle(ctx, request, next).await
            }
            None => self.endpoint.run(request).await,
        }
    }
}

/// An ordered, immutable list of stages
#[derive(Clone)]
pub struct Pipeline {
    stages: Arc<[Arc<dyn Stage>]>,
    routes: Arc<RouteTable>,
}

impl Pipeline {
    pub fn builder(routes: Arc<RouteTable>) -> PipelineBuilder {
        PipelineBuilder {
            stages: Vec::new(),
            routes,
        }
    }

    /// The standard stage order, with disabled features left out
    pub fn standard(state: &AppState) -> AppResult<Self> {
        let config = state.config();
        let mut builder = Self::builder(state.routes())
            .stage(recovery::RecoveryStage)
            .stage(request_id::RequestIdStage);

        if config.csrf.enabled {
            builder = builder.stage(csrf::CsrfStage::new(&config.csrf)?);
        }
        if config.rate_limit.enabled {
            builder = builder.stage(rate_limit::RateLimitStage::new(
                state.limiter(),
                config.rate_limit.exempt_streaming,
            ));
        }
        if config.cache.enabled {
            builder = builder.stage(cache::CacheStage::new(state.cache()));
        }
        if config.metrics.enabled {
            builder = builder.stage(metrics::MetricsStage::new(state.metrics()));
        }

        Ok(builder.stage(logging::LoggingStage).build())
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Drive one request through every stage and then `endpoint`
    pub async fn run(&self, request: Request, endpoint: axum_middleware::Next) -> Response {
        let mut ctx = RequestContext::from_request(&request, &self.routes);
        let next = Next {
            stages: &self.stages,
            endpoint,
        };
        next.run(&mut ctx, request).await
    }

    /// Install this pipeline around every route of `router`
    pub fn layer<S>(self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router.layer(axum_middleware::from_fn_with_state(self, dispatch))
    }
}

async fn dispatch(
    State(pipeline): State<Pipeline>,
    request: Request,
    next: axum_middleware::Next,
) -> Response {
    pipeline.run(request, next).await
}

/// Collects stages in the order they should run
pub struct PipelineBuilder {
    stages: Vec<Arc<dyn Stage>>,
    routes: Arc<RouteTable>,
}

impl PipelineBuilder {
    pub fn stage(mut self, stage: impl Stage) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            stages: self.stages.into(),
            routes: self.routes,
        }
    }
}
