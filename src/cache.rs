//! TTL response cache
//!
//! Entries are keyed by normalized request path and expire lazily: a lookup
//! that finds a stale entry removes it and reports a miss. Nothing sweeps in
//! the background, so memory is bounded by the number of distinct cacheable
//! paths, which the route table keeps small.

use axum::{
    body::{Body, Bytes},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::CacheConfig;

/// Marker header on every response passing the cache stage
pub const X_CACHE: &str = "x-cache";

/// A stored response
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub stored_at: Instant,
    pub expires_at: Instant,
}

impl CachedResponse {
    pub fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }

    /// Rebuild a response from this entry
    ///
    /// `Cache-Control` advertises the remaining lifetime, not the full TTL.
    pub fn to_response(&self, now: Instant) -> Response {
        let mut response = Response::new(Body::from(self.body.clone()));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers.clone();

        let max_age = self.remaining(now).as_secs();
        if let Ok(value) = HeaderValue::from_str(&format!("public, max-age={}", max_age)) {
            response.headers_mut().insert(header::CACHE_CONTROL, value);
        }
        response
    }
}

/// Concurrent path-keyed response store
pub struct ResponseCache {
    entries: DashMap<String, Arc<CachedResponse>>,
    ttl: Duration,
    max_body_bytes: usize,
}

impl ResponseCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: config.ttl(),
            max_body_bytes: config.max_body_bytes,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cache key for a request path
    ///
    /// Repeated slashes collapse and a trailing slash is dropped, so `/a//b/`
    /// and `/a/b` share an entry. The query string is not part of the key.
    pub fn key_for(path: &str) -> String {
        let mut key = String::with_capacity(path.len() + 1);
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            key.push('/');
            key.push_str(segment);
        }
        if key.is_empty() {
            key.push('/');
        }
        key
    }

    pub fn lookup(&self, key: &str) -> Option<Arc<CachedResponse>> {
        self.lookup_at(key, Instant::now())
    }

    /// Look up `key`, treating anything at or past `expires_at` as absent
    pub fn lookup_at(&self, key: &str, now: Instant) -> Option<Arc<CachedResponse>> {
        // Clone out and release the shard read lock before any removal.
        let entry = self.entries.get(key).map(|e| Arc::clone(e.value()))?;
        if entry.is_fresh(now) {
            return Some(entry);
        }

        // Only remove if nobody replaced it with a fresh entry meanwhile.
        self.entries.remove_if(key, |_, current| !current.is_fresh(now));
        None
    }

    pub fn store(&self, key: &str, status: StatusCode, headers: &HeaderMap, body: Bytes) {
        self.store_at(key, status, headers, body, Instant::now());
    }

    /// Store a successful response; non-2xx and oversized bodies are ignored
    pub fn store_at(
        &self,
        key: &str,
        status: StatusCode,
        headers: &HeaderMap,
        body: Bytes,
        now: Instant,
    ) -> bool {
        if !status.is_success() || body.len() > self.max_body_bytes {
            return false;
        }

        let mut headers = headers.clone();
        headers.remove(header::SET_COOKIE);
        headers.remove(X_CACHE);

        let entry = CachedResponse {
            status,
            headers,
            body,
            stored_at: now,
            expires_at: now + self.ttl,
        };
        self.entries.insert(key.to_owned(), Arc::new(entry));
        true
    }
}
