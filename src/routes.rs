//! Fixed route table
//!
//! The server exposes a small closed set of routes. Pipeline stages need to
//! know which one a request targets before the router runs (cache bypass,
//! streaming exemptions, metric labels), so classification is done here from
//! the request path alone.

use crate::config::{Config, LARGE_FILES_ROUTE, VERSION_ROUTE, path_has_prefix};

/// Every route the server answers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// `GET /` rendered index page
    Index,
    /// `GET /version`
    Version,
    /// `GET /large/{file}` streamed download
    LargeFile,
    /// Prometheus exposition endpoint
    Metrics,
    /// Files directory under the files prefix
    Files,
    /// Static assets under the static prefix
    Static,
    /// Anything else (answered by the 404 page)
    Fallback,
}

impl Route {
    /// Large-file downloads are streamed and never buffered or timed out
    pub fn is_streaming(&self) -> bool {
        matches!(self, Route::LargeFile)
    }
}

/// Path-to-route classification with stable metric labels
#[derive(Debug, Clone)]
pub struct RouteTable {
    metrics_path: String,
    files_prefix: String,
    files_label: String,
    static_prefix: String,
    static_label: String,
}

impl RouteTable {
    pub fn new(config: &Config) -> Self {
        let files_prefix = config.assets.files_route();
        let static_prefix = config.assets.static_route();
        let static_label = if static_prefix == "/" {
            "/*".to_string()
        } else {
            format!("{}/*", static_prefix)
        };

        Self {
            metrics_path: config.metrics.path.clone(),
            files_label: format!("{}/*", files_prefix),
            files_prefix,
            static_prefix,
            static_label,
        }
    }

    /// Classify a request path (without query string)
    pub fn classify(&self, path: &str) -> Route {
        if path == "/" {
            return Route::Index;
        }
        if path == VERSION_ROUTE {
            return Route::Version;
        }
        if path_has_prefix(path, LARGE_FILES_ROUTE) {
            return Route::LargeFile;
        }
        if path == self.metrics_path {
            return Route::Metrics;
        }
        if path_has_prefix(path, &self.files_prefix) {
            return Route::Files;
        }
        if self.static_prefix == "/" || path_has_prefix(path, &self.static_prefix) {
            return Route::Static;
        }
        Route::Fallback
    }

    /// Bounded label for metrics and logs
    ///
    /// Raw request paths are never used as label values, so a client probing
    /// random URLs cannot grow the number of series.
    pub fn label(&self, route: Route) -> &str {
        match route {
            Route::Index => "/",
            Route::Version => VERSION_ROUTE,
            Route::LargeFile => "/large/:file",
            Route::Metrics => &self.metrics_path,
            Route::Files => &self.files_label,
            Route::Static => &self.static_label,
            Route::Fallback => "*",
        }
    }
}
