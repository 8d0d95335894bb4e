//! Configuration management for dummypage
//!
//! Settings come from three layers, applied in order:
//! 1. Built-in defaults (`Config::default()` is a complete, valid configuration)
//! 2. An optional TOML file (`--config <path>`)
//! 3. `APP_*` environment variables
//!
//! The merged result is validated once and then shared read-only (`Arc<Config>`).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, AppResult};

/// Prefix shared by every recognised environment variable
pub const ENV_PREFIX: &str = "APP_";

/// Path of the large-file download route; other prefixes may not shadow it
pub const LARGE_FILES_ROUTE: &str = "/large";

/// Path of the version route
pub const VERSION_ROUTE: &str = "/version";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub assets: AssetsConfig,
    pub rate_limit: RateLimitConfig,
    pub cache: CacheConfig,
    pub csrf: CsrfConfig,
    pub metrics: MetricsConfig,
    pub log: LogConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address, `host:port` (host names are resolved at bind time)
    pub addr: String,
    /// Version reported by `GET /version`
    pub version: String,
    /// Timeout for every route except large-file downloads
    pub request_timeout_seconds: u64,
    /// How long in-flight requests may run after a shutdown signal
    pub shutdown_grace_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "localhost:3000".to_string(),
            version: "2.0.0".to_string(),
            request_timeout_seconds: 10,
            shutdown_grace_seconds: 10,
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}

/// Directories and URL prefixes for everything served from disk
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AssetsConfig {
    pub static_dir: PathBuf,
    pub static_prefix: String,
    pub files_dir: PathBuf,
    pub files_prefix: String,
    pub large_files_dir: PathBuf,
    pub views_dir: PathBuf,
    pub views_ext: String,
    /// `Cache-Control: max-age` for static assets and files
    pub max_age_seconds: u64,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            static_dir: PathBuf::from("./static"),
            static_prefix: "/".to_string(),
            files_dir: PathBuf::from("./files"),
            files_prefix: "files".to_string(),
            large_files_dir: PathBuf::from("./large"),
            views_dir: PathBuf::from("./static/templates"),
            views_ext: ".html".to_string(),
            max_age_seconds: 3600,
        }
    }
}

impl AssetsConfig {
    /// Static prefix as a route path (`/` or `/assets`, never a trailing slash)
    pub fn static_route(&self) -> String {
        normalize_prefix(&self.static_prefix)
    }

    /// Files prefix as a route path (`files` becomes `/files`)
    pub fn files_route(&self) -> String {
        normalize_prefix(&self.files_prefix)
    }
}

/// Fixed-window rate limiting
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Requests allowed per window and client
    pub max: u64,
    pub window_seconds: u64,
    /// Give the slot back when the response status is below 400
    pub skip_successful: bool,
    /// Give the slot back when the response status is 400 or above
    pub skip_failed: bool,
    /// Allow requests when the limiter storage fails (default: deny)
    pub fail_open: bool,
    /// Do not rate limit the large-file route
    pub exempt_streaming: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max: 10,
            window_seconds: 60,
            skip_successful: true,
            skip_failed: false,
            fail_open: false,
            exempt_streaming: false,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

/// Response cache for GET/HEAD on non-streaming routes
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_seconds: u64,
    /// Responses with larger (or unknown) bodies are passed through uncached
    pub max_body_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: 600,
            max_body_bytes: 1024 * 1024,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

/// Double-submit cookie CSRF guard
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CsrfConfig {
    pub enabled: bool,
    pub cookie_name: String,
    pub header_name: String,
    /// Skip the check on the large-file route
    pub exempt_streaming: bool,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cookie_name: "csrf_".to_string(),
            header_name: "X-Csrf-Token".to_string(),
            exempt_streaming: false,
        }
    }
}

/// Request metrics and the exposition endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub namespace: String,
    pub subsystem: String,
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: "http".to_string(),
            subsystem: "service".to_string(),
            path: "/metrics".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// "trace", "debug", "info", "warn" or "error"
    pub level: String,
    /// "stdout", "stderr" or a file path (appended to)
    pub destination: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            destination: "stdout".to_string(),
            json: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file and validate it
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path_display = path.as_ref().display().to_string();
        let config = Self::read_file(path.as_ref())?;

        config
            .validate()
            .map_err(|e| AppError::ConfigValidationFailed {
                path: path_display,
                reason: e.to_string(),
            })?;

        Ok(config)
    }

    /// Load the full configuration stack: defaults, optional file, process environment
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let mut config = match path {
            Some(path) => Self::read_file(path)?,
            None => Self::default(),
        };

        config.apply_env(std::env::vars())?;

        let source = path
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<environment>".to_string());
        config
            .validate()
            .map_err(|e| AppError::ConfigValidationFailed {
                path: source,
                reason: e.to_string(),
            })?;

        Ok(config)
    }

    fn read_file(path: &Path) -> AppResult<Self> {
        let path_display = path.display().to_string();

        let content =
            std::fs::read_to_string(path).map_err(|source| AppError::ConfigFileRead {
                path: path_display.clone(),
                source,
            })?;

        toml::from_str(&content).map_err(|source| AppError::ConfigParseFailed {
            path: path_display,
            source,
        })
    }

    /// Apply `APP_*` overrides from the given variables
    ///
    /// Variables outside the recognised set are ignored so the process
    /// environment can be passed through unfiltered. A recognised variable
    /// with a malformed value is an error.
    pub fn apply_env<I, K, V>(&mut self, vars: I) -> AppResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let key = key.as_ref();
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref().trim();

            match name {
                "SERVER_ADDR" => self.server.addr = value.to_string(),
                "SERVER_VERSION" => self.server.version = value.to_string(),
                "SERVER_REQUEST_TIMEOUT_SECONDS" => {
                    self.server.request_timeout_seconds = parse_env(key, value)?
                }
                "SERVER_SHUTDOWN_GRACE_SECONDS" => {
                    self.server.shutdown_grace_seconds = parse_env(key, value)?
                }
                "ASSETS_STATIC_DIR" => self.assets.static_dir = PathBuf::from(value),
                "ASSETS_STATIC_PREFIX" => self.assets.static_prefix = value.to_string(),
                "ASSETS_FILES_DIR" => self.assets.files_dir = PathBuf::from(value),
                "ASSETS_FILES_PREFIX" => self.assets.files_prefix = value.to_string(),
                "ASSETS_LARGE_FILES_DIR" => self.assets.large_files_dir = PathBuf::from(value),
                "ASSETS_VIEWS_DIR" => self.assets.views_dir = PathBuf::from(value),
                "ASSETS_VIEWS_EXT" => self.assets.views_ext = value.to_string(),
                "ASSETS_MAX_AGE_SECONDS" => self.assets.max_age_seconds = parse_env(key, value)?,
                "RATE_LIMIT_ENABLED" => self.rate_limit.enabled = parse_bool(key, value)?,
                "RATE_LIMIT_MAX" => self.rate_limit.max = parse_env(key, value)?,
                "RATE_LIMIT_WINDOW_SECONDS" => {
                    self.rate_limit.window_seconds = parse_env(key, value)?
                }
                "RATE_LIMIT_SKIP_SUCCESSFUL" => {
                    self.rate_limit.skip_successful = parse_bool(key, value)?
                }
                "RATE_LIMIT_SKIP_FAILED" => self.rate_limit.skip_failed = parse_bool(key, value)?,
                "RATE_LIMIT_FAIL_OPEN" => self.rate_limit.fail_open = parse_bool(key, value)?,
                "RATE_LIMIT_EXEMPT_STREAMING" => {
                    self.rate_limit.exempt_streaming = parse_bool(key, value)?
                }
                "CACHE_ENABLED" => self.cache.enabled = parse_bool(key, value)?,
                "CACHE_TTL_SECONDS" => self.cache.ttl_seconds = parse_env(key, value)?,
                "CACHE_MAX_BODY_BYTES" => self.cache.max_body_bytes = parse_env(key, value)?,
                "CSRF_ENABLED" => self.csrf.enabled = parse_bool(key, value)?,
                "CSRF_EXEMPT_STREAMING" => self.csrf.exempt_streaming = parse_bool(key, value)?,
                "METRICS_ENABLED" => self.metrics.enabled = parse_bool(key, value)?,
                "METRICS_NAMESPACE" => self.metrics.namespace = value.to_string(),
                "METRICS_SUBSYSTEM" => self.metrics.subsystem = value.to_string(),
                "METRICS_PATH" => self.metrics.path = value.to_string(),
                "LOG_LEVEL" => self.log.level = value.to_ascii_lowercase(),
                "LOG_DESTINATION" => self.log.destination = value.to_string(),
                "LOG_JSON" => self.log.json = parse_bool(key, value)?,
                _ => {}
            }
        }
        Ok(())
    }

    /// Validate configuration after parsing
    ///
    /// This is called automatically by `from_file()` and `load()`, but can also
    /// be called explicitly when constructing Config by hand (e.g., in tests).
    pub fn validate(&self) -> AppResult<()> {
        if self.server.addr.trim().is_empty() {
            return Err(AppError::Config("server.addr must not be empty".to_string()));
        }
        if self.server.version.trim().is_empty() {
            return Err(AppError::Config(
                "server.version must not be empty".to_string(),
            ));
        }
        if self.server.request_timeout_seconds == 0 {
            return Err(AppError::Config(
                "server.request_timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if !self.assets.views_ext.starts_with('.') {
            return Err(AppError::Config(format!(
                "assets.views_ext must start with '.', got {:?}",
                self.assets.views_ext
            )));
        }

        if self.rate_limit.max == 0 {
            return Err(AppError::Config(
                "rate_limit.max must be at least 1".to_string(),
            ));
        }
        if self.rate_limit.window_seconds == 0 {
            return Err(AppError::Config(
                "rate_limit.window_seconds must be at least 1".to_string(),
            ));
        }

        for (field, value) in [
            ("metrics.namespace", &self.metrics.namespace),
            ("metrics.subsystem", &self.metrics.subsystem),
        ] {
            if !is_metric_identifier(value) {
                return Err(AppError::Config(format!(
                    "{} must match [a-zA-Z_][a-zA-Z0-9_]*, got {:?}",
                    field, value
                )));
            }
        }
        if !self.metrics.path.starts_with('/') || self.metrics.path.len() < 2 {
            return Err(AppError::Config(format!(
                "metrics.path must be an absolute path like /metrics, got {:?}",
                self.metrics.path
            )));
        }
        let static_route = self.assets.static_route();
        let shadowed = self.metrics.path == VERSION_ROUTE
            || path_has_prefix(&self.metrics.path, LARGE_FILES_ROUTE)
            || path_has_prefix(&self.metrics.path, &self.assets.files_route())
            || (static_route != "/" && path_has_prefix(&self.metrics.path, &static_route));
        if shadowed {
            return Err(AppError::Config(format!(
                "metrics.path {:?} collides with a built-in route or prefix",
                self.metrics.path
            )));
        }

        if !LOG_LEVELS.contains(&self.log.level.as_str()) {
            return Err(AppError::Config(format!(
                "log.level must be one of {:?}, got {:?}",
                LOG_LEVELS, self.log.level
            )));
        }
        if self.log.destination.trim().is_empty() {
            return Err(AppError::Config(
                "log.destination must not be empty".to_string(),
            ));
        }

        let files_route = self.assets.files_route();
        if files_route == "/" {
            return Err(AppError::Config(
                "assets.files_prefix must not be the root path".to_string(),
            ));
        }
        let reserved = [LARGE_FILES_ROUTE, VERSION_ROUTE, self.metrics.path.as_str()];
        for (field, route) in [
            ("assets.files_prefix", files_route.as_str()),
            ("assets.static_prefix", self.assets.static_route().as_str()),
        ] {
            if reserved.contains(&route) {
                return Err(AppError::Config(format!(
                    "{} {:?} collides with a built-in route",
                    field, route
                )));
            }
        }
        if files_route == self.assets.static_route() {
            return Err(AppError::Config(
                "assets.files_prefix and assets.static_prefix must differ".to_string(),
            ));
        }

        Ok(())
    }
}

impl FromStr for Config {
    type Err = AppError;

    fn from_str(toml_str: &str) -> Result<Self, Self::Err> {
        let config: Config =
            toml::from_str(toml_str).map_err(|source| AppError::ConfigParseFailed {
                path: "<string>".to_string(),
                source,
            })?;

        config.validate()?;
        Ok(config)
    }
}

/// Normalize a URL prefix to `/name` form; empty and `/` both mean the root
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// Whether `path` is `prefix` itself or lies below it on a segment boundary
///
/// `/files/a.txt` is under `/files`, `/filesystem` is not.
pub fn path_has_prefix(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

fn is_metric_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_env<T>(var: &str, value: &str) -> AppResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| AppError::ConfigEnv {
        var: var.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(var: &str, value: &str) -> AppResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(AppError::ConfigEnv {
            var: var.to_string(),
            reason: format!("expected a boolean, got {:?}", other),
        }),
    }
}
