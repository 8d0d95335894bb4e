//! Command-line interface for dummypage
//!
//! Provides argument parsing and subcommand handling for the dummypage binary.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Demonstration web server with guarded downloads, caching and metrics
#[derive(Parser)]
#[command(name = "dummypage")]
#[command(version)]
#[command(about = "Demonstration web server with guarded downloads, caching and metrics")]
#[command(
    long_about = "dummypage serves rendered views, static assets and large file downloads \
    behind a fixed pipeline of recovery, request ids, CSRF protection, rate limiting, \
    response caching, Prometheus metrics and access logging."
)]
pub struct Cli {
    /// Path to configuration file (defaults plus APP_* variables when omitted)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate a template configuration file
    Config {
        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Generate template configuration content
///
/// Every value matches the built-in default, so the template loads to the
/// same configuration as running without a file.
pub fn generate_config_template() -> &'static str {
    r#"# dummypage configuration
# ========================
#
# Every key is optional; omitted keys keep their default. Any key can also be
# overridden with an environment variable named APP_<SECTION>_<KEY>, for
# example APP_SERVER_ADDR or APP_RATE_LIMIT_MAX.

# ─────────────────────────────────────────────────────────────────────────────
# SERVER
# ─────────────────────────────────────────────────────────────────────────────

[server]
# Listen address as host:port
addr = "localhost:3000"

# Version reported by GET /version and shown on the index page
version = "2.0.0"

# Timeout for every route except large-file downloads
request_timeout_seconds = 10

# How long in-flight requests may finish after SIGINT/SIGTERM before
# open downloads are closed
shutdown_grace_seconds = 10

# ─────────────────────────────────────────────────────────────────────────────
# ASSETS
# ─────────────────────────────────────────────────────────────────────────────

[assets]
# Static assets, served gzip-compressed with Cache-Control max-age
static_dir = "./static"
static_prefix = "/"

# Plain file directory, mounted under its own prefix
files_dir = "./files"
files_prefix = "files"

# Downloads served from GET /large/<file>
large_files_dir = "./large"

# Views rendered for / and for the 404 page (index.html, 404.html)
views_dir = "./static/templates"
views_ext = ".html"

max_age_seconds = 3600

# ─────────────────────────────────────────────────────────────────────────────
# RATE LIMITING
# ─────────────────────────────────────────────────────────────────────────────
#
# Fixed window per client IP. With skip_successful, only responses with a
# status of 400 or above count toward the limit.

[rate_limit]
enabled = true
max = 10
window_seconds = 60
skip_successful = true
skip_failed = false
# Allow requests when the limiter storage fails (default: deny)
fail_open = false
# Do not rate limit GET /large/<file>
exempt_streaming = false

# ─────────────────────────────────────────────────────────────────────────────
# RESPONSE CACHE
# ─────────────────────────────────────────────────────────────────────────────

[cache]
enabled = true
ttl_seconds = 600
# Larger bodies are passed through uncached
max_body_bytes = 1048576

# ─────────────────────────────────────────────────────────────────────────────
# CSRF
# ─────────────────────────────────────────────────────────────────────────────
#
# Double-submit cookie: unsafe methods must echo the cookie in the header.

[csrf]
enabled = true
cookie_name = "csrf_"
header_name = "X-Csrf-Token"
exempt_streaming = false

# ─────────────────────────────────────────────────────────────────────────────
# METRICS
# ─────────────────────────────────────────────────────────────────────────────

[metrics]
enabled = true
namespace = "http"
subsystem = "service"
path = "/metrics"

# ─────────────────────────────────────────────────────────────────────────────
# LOGGING
# ─────────────────────────────────────────────────────────────────────────────

[log]
# trace, debug, info, warn or error (RUST_LOG takes precedence when set)
level = "info"
# stdout, stderr or a file path (appended to)
destination = "stdout"
json = false
"#
}
