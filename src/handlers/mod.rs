//! HTTP request handlers and router assembly

use axum::{
    Router,
    handler::Handler,
    http::{HeaderValue, header},
    routing::get,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{
    compression::CompressionLayer, services::ServeDir, set_header::SetResponseHeaderLayer,
    timeout::TimeoutLayer, trace::TraceLayer,
};

use crate::cache::ResponseCache;
use crate::config::{Config, LARGE_FILES_ROUTE, VERSION_ROUTE};
use crate::error::AppResult;
use crate::files::FileStreamer;
use crate::metrics::MetricsRegistry;
use crate::middleware::Pipeline;
use crate::rate_limit::RateLimiter;
use crate::routes::RouteTable;
use crate::templates::Templates;

pub mod index;
pub mod large_file;
pub mod metrics;
pub mod not_found;
pub mod version;

/// Application state shared across all handlers and pipeline stages
///
/// All fields are Arc'd for cheap cloning across Axum handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    templates: Arc<Templates>,
    streamer: Arc<FileStreamer>,
    metrics: Arc<MetricsRegistry>,
    limiter: Arc<RateLimiter>,
    cache: Arc<ResponseCache>,
    routes: Arc<RouteTable>,
}

impl AppState {
    /// Create a new AppState, loading views from the configured directory
    ///
    /// `shutdown` is cancelled once the shutdown grace period ends; open
    /// downloads stop when it fires.
    pub fn new(config: Arc<Config>, shutdown: CancellationToken) -> AppResult<Self> {
        let templates = Templates::load(&config.assets.views_dir, &config.assets.views_ext)?;
        Self::with_templates(config, templates, shutdown)
    }

    /// Create a new AppState with an already loaded set of views
    pub fn with_templates(
        config: Arc<Config>,
        templates: Templates,
        shutdown: CancellationToken,
    ) -> AppResult<Self> {
        let streamer = FileStreamer::new(&config.assets.large_files_dir, shutdown)?;
        let metrics = MetricsRegistry::new(
            config.metrics.namespace.clone(),
            config.metrics.subsystem.clone(),
        );

        Ok(Self {
            templates: Arc::new(templates),
            streamer: Arc::new(streamer),
            metrics: Arc::new(metrics),
            limiter: Arc::new(RateLimiter::new(&config.rate_limit)),
            cache: Arc::new(ResponseCache::new(&config.cache)),
            routes: Arc::new(RouteTable::new(&config)),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn templates(&self) -> &Templates {
        &self.templates
    }

    pub fn streamer(&self) -> &FileStreamer {
        &self.streamer
    }

    pub fn metrics(&self) -> Arc<MetricsRegistry> {
        Arc::clone(&self.metrics)
    }

    pub fn limiter(&self) -> Arc<RateLimiter> {
        Arc::clone(&self.limiter)
    }

    pub fn cache(&self) -> Arc<ResponseCache> {
        Arc::clone(&self.cache)
    }

    pub fn routes(&self) -> Arc<RouteTable> {
        Arc::clone(&self.routes)
    }
}

/// Build the full application router with the standard pipeline
pub fn build_router(state: AppState) -> AppResult<Router> {
    let pipeline = Pipeline::standard(&state)?;
    Ok(build_router_with(state, pipeline))
}

/// Build the application router around a caller-supplied pipeline
pub fn build_router_with(state: AppState, pipeline: Pipeline) -> Router {
    let config = state.config();

    // Everything except downloads is bounded by the request timeout.
    let mut timed = Router::new()
        .route("/", get(index::handler))
        .route(VERSION_ROUTE, get(version::handler));
    if config.metrics.enabled {
        timed = timed.route(&config.metrics.path, get(metrics::handler));
    }
    #[allow(deprecated)]
    let timed = timed.layer(TimeoutLayer::new(config.server.request_timeout()));

    let streaming = Router::new().route(
        &format!("{}/{{*file}}", LARGE_FILES_ROUTE),
        get(large_file::handler),
    );

    let max_age = HeaderValue::from_str(&format!(
        "public, max-age={}",
        config.assets.max_age_seconds
    ))
    .unwrap_or_else(|_| HeaderValue::from_static("public, max-age=3600"));

    let not_found_service = not_found::handler.with_state(state.clone());
    let files = ServeDir::new(&config.assets.files_dir)
        .call_fallback_on_method_not_allowed(true)
        .fallback(not_found_service.clone());
    let assets = ServeDir::new(&config.assets.static_dir)
        .call_fallback_on_method_not_allowed(true)
        .fallback(not_found_service);
    let asset_layers = tower::ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CACHE_CONTROL,
            max_age,
        ))
        .layer(CompressionLayer::new());

    let mut app = Router::new()
        .merge(timed)
        .merge(streaming)
        .nest_service(&config.assets.files_route(), files);

    let static_route = config.assets.static_route();
    if static_route == "/" {
        app = app.fallback_service(asset_layers.service(assets));
    } else {
        app = app
            .nest_service(&static_route, asset_layers.service(assets))
            .fallback(not_found::handler);
    }

    pipeline
        .layer(app)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
