//! Fixed-window rate limiting
//!
//! Each client key owns one bucket `(count, window_start)`. The first hit in a
//! window opens it with `count = 1` and every later hit increments it, denied
//! hits included. A hit is allowed while the count stays at or below `max`.
//! A hit after `window` has elapsed replaces the bucket instead of
//! incrementing it.
//!
//! Buckets live behind the [`LimiterStorage`] trait. The in-memory storage
//! shards keys over a `DashMap`, so two clients never contend on one lock.

use axum::http::{HeaderMap, HeaderValue, StatusCode};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::RateLimitConfig;

pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";

/// Limiter backend failure
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("rate limit storage unavailable: {0}")]
    Unavailable(String),
}

/// Result of recording one hit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Hits counted in the current window, denied ones included
    pub count: u64,
    pub window_start: Instant,
    pub allowed: bool,
}

/// Bucket storage shared by all requests
pub trait LimiterStorage: Send + Sync + 'static {
    /// Count one hit for `key` and report whether it fits under `max`
    ///
    /// Denied hits are counted too, so the count may exceed `max`. They never
    /// move the window start.
    fn hit(
        &self,
        key: &str,
        max: u64,
        window: Duration,
        now: Instant,
    ) -> Result<WindowCount, StorageError>;

    /// Give back one previously allowed hit, if its window is still current
    fn release(&self, key: &str, window_start: Instant) -> Result<(), StorageError>;

    /// Drop buckets whose window has ended; returns how many were removed
    fn purge_expired(&self, window: Duration, now: Instant) -> usize;

    /// Number of tracked keys
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    count: u64,
    window_start: Instant,
}

/// In-process bucket storage
#[derive(Debug, Default)]
pub struct MemoryStorage {
    buckets: DashMap<String, Bucket>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LimiterStorage for MemoryStorage {
    fn hit(
        &self,
        key: &str,
        max: u64,
        window: Duration,
        now: Instant,
    ) -> Result<WindowCount, StorageError> {
        // The entry guard holds the shard lock for the whole read-modify-write.
        let mut bucket = self.buckets.entry(key.to_owned()).or_insert(Bucket {
            count: 0,
            window_start: now,
        });

        if now.saturating_duration_since(bucket.window_start) >= window {
            *bucket = Bucket {
                count: 0,
                window_start: now,
            };
        }

        bucket.count = bucket.count.saturating_add(1);
        let allowed = bucket.count <= max;

        Ok(WindowCount {
            count: bucket.count,
            window_start: bucket.window_start,
            allowed,
        })
    }

    fn release(&self, key: &str, window_start: Instant) -> Result<(), StorageError> {
        if let Some(mut bucket) = self.buckets.get_mut(key)
            && bucket.window_start == window_start
        {
            bucket.count = bucket.count.saturating_sub(1);
        }
        Ok(())
    }

    fn purge_expired(&self, window: Duration, now: Instant) -> usize {
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.window_start) < window);
        before.saturating_sub(self.buckets.len())
    }

    fn len(&self) -> usize {
        self.buckets.len()
    }
}

/// Outcome of a rate-limit check, carried until the response is known
#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// Time until the current window ends
    pub reset_after: Duration,
    ticket: Option<Ticket>,
}

#[derive(Debug, Clone)]
struct Ticket {
    key: String,
    window_start: Instant,
}

impl RateLimitDecision {
    /// Seconds until the window resets, rounded up
    pub fn reset_secs(&self) -> u64 {
        let secs = self.reset_after.as_secs();
        if self.reset_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }

    /// Write the `X-RateLimit-*` headers
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(self.limit));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(self.remaining));
        headers.insert(X_RATELIMIT_RESET, HeaderValue::from(self.reset_secs()));
    }
}

/// Fixed-window limiter keyed by client address
pub struct RateLimiter {
    storage: Arc<dyn LimiterStorage>,
    max: u64,
    window: Duration,
    fail_open: bool,
    skip_successful: bool,
    skip_failed: bool,
}

impl RateLimiter {
    /// Limiter backed by [`MemoryStorage`]
    pub fn new(config: &RateLimitConfig) -> Self {
        Self::with_storage(config, Arc::new(MemoryStorage::new()))
    }

    pub fn with_storage(config: &RateLimitConfig, storage: Arc<dyn LimiterStorage>) -> Self {
        Self {
            storage,
            max: config.max,
            window: config.window(),
            fail_open: config.fail_open,
            skip_successful: config.skip_successful,
            skip_failed: config.skip_failed,
        }
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Whether `key` may make a request now
    pub fn allow(&self, key: &str) -> bool {
        self.check(key).allowed
    }

    pub fn check(&self, key: &str) -> RateLimitDecision {
        self.check_at(key, Instant::now())
    }

    /// Check against an explicit clock reading
    pub fn check_at(&self, key: &str, now: Instant) -> RateLimitDecision {
        match self.storage.hit(key, self.max, self.window, now) {
            Ok(hit) => {
                let elapsed = now.saturating_duration_since(hit.window_start);
                RateLimitDecision {
                    allowed: hit.allowed,
                    limit: self.max,
                    remaining: self.max.saturating_sub(hit.count),
                    reset_after: self.window.saturating_sub(elapsed),
                    ticket: hit.allowed.then(|| Ticket {
                        key: key.to_owned(),
                        window_start: hit.window_start,
                    }),
                }
            }
            Err(e) => {
                tracing::error!(
                    key,
                    error = %e,
                    fail_open = self.fail_open,
                    "Rate limit storage failed"
                );
                RateLimitDecision {
                    allowed: self.fail_open,
                    limit: self.max,
                    remaining: 0,
                    reset_after: self.window,
                    ticket: None,
                }
            }
        }
    }

    /// Apply the skip policy once the response status is known
    ///
    /// Returns true when the hit was given back.
    pub fn complete(&self, decision: &RateLimitDecision, status: StatusCode) -> bool {
        let Some(ticket) = &decision.ticket else {
            return false;
        };

        let failed = status.is_client_error() || status.is_server_error();
        let skip = if failed {
            self.skip_failed
        } else {
            self.skip_successful
        };
        if !skip {
            return false;
        }

        match self.storage.release(&ticket.key, ticket.window_start) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key = %ticket.key, error = %e, "Failed to release rate limit hit");
                false
            }
        }
    }

    /// Remove buckets whose window has ended
    pub fn purge_expired(&self) -> usize {
        self.storage.purge_expired(self.window, Instant::now())
    }

    pub fn tracked_keys(&self) -> usize {
        self.storage.len()
    }

    /// Purge expired buckets once per window until `shutdown` is cancelled
    pub fn spawn_sweeper(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.window);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::debug!("Rate limit sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let removed = self.purge_expired();
                        if removed > 0 {
                            tracing::debug!(removed, "Purged expired rate limit buckets");
                        }
                    }
                }
            }
        })
    }
}
