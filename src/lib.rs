//! dummypage - demonstration web server
//!
//! Serves rendered views, static assets and large file downloads behind a
//! fixed request pipeline: panic recovery, request ids, CSRF protection,
//! fixed-window rate limiting, response caching, Prometheus metrics and
//! access logging.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod files;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod rate_limit;
pub mod routes;
pub mod server;
pub mod telemetry;
pub mod templates;
