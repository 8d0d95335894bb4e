//! Response cache behaviour at the storage level
//!
//! Router-level hit/miss behaviour is covered in `pipeline.rs`.

use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use dummypage::cache::ResponseCache;
use dummypage::config::CacheConfig;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn cache(ttl_seconds: u64) -> ResponseCache {
    ResponseCache::new(&CacheConfig {
        ttl_seconds,
        ..CacheConfig::default()
    })
}

fn html_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    headers
}

#[tokio::test]
async fn test_hit_replays_status_headers_and_body() {
    let cache = cache(600);
    let now = Instant::now();
    let body = Bytes::from_static(b"<h1>hello</h1>");
    assert!(cache.store_at("/", StatusCode::OK, &html_headers(), body.clone(), now));

    let entry = cache.lookup_at("/", now + Duration::from_secs(1)).unwrap();
    let response = entry.to_response(now + Duration::from_secs(100));
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/html; charset=utf-8"
    );
    assert_eq!(response.headers()[header::CACHE_CONTROL], "public, max-age=500");

    let replayed = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(replayed, body);
}

#[test]
fn test_entry_expires_exactly_at_ttl() {
    let cache = cache(10);
    let now = Instant::now();
    cache.store_at("/page", StatusCode::OK, &HeaderMap::new(), Bytes::from("x"), now);

    assert!(cache.lookup_at("/page", now + Duration::from_millis(9_999)).is_some());
    assert!(cache.lookup_at("/page", now + Duration::from_secs(10)).is_none());
    // The stale entry was evicted on the way out
    assert!(cache.is_empty());
}

#[test]
fn test_restore_after_expiry_serves_new_body() {
    let cache = cache(10);
    let start = Instant::now();
    cache.store_at("/", StatusCode::OK, &HeaderMap::new(), Bytes::from("old"), start);

    let later = start + Duration::from_secs(11);
    assert!(cache.lookup_at("/", later).is_none());
    cache.store_at("/", StatusCode::OK, &HeaderMap::new(), Bytes::from("new"), later);

    assert_eq!(cache.lookup_at("/", later).unwrap().body, Bytes::from("new"));
}

#[test]
fn test_cookies_are_not_stored() {
    let cache = cache(60);
    let mut headers = html_headers();
    headers.insert(header::SET_COOKIE, HeaderValue::from_static("session=abc"));
    cache.store("/", StatusCode::OK, &headers, Bytes::from("x"));

    let entry = cache.lookup("/").unwrap();
    assert!(!entry.headers.contains_key(header::SET_COOKIE));
    assert!(entry.headers.contains_key(header::CONTENT_TYPE));
}

#[test]
fn test_non_success_and_oversized_are_rejected() {
    let cache = ResponseCache::new(&CacheConfig {
        max_body_bytes: 4,
        ..CacheConfig::default()
    });
    let now = Instant::now();

    assert!(!cache.store_at("/a", StatusCode::NOT_FOUND, &HeaderMap::new(), Bytes::from("x"), now));
    assert!(!cache.store_at("/b", StatusCode::OK, &HeaderMap::new(), Bytes::from("12345"), now));
    assert!(cache.store_at("/c", StatusCode::OK, &HeaderMap::new(), Bytes::from("1234"), now));
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_equivalent_paths_share_a_key() {
    assert_eq!(ResponseCache::key_for("/a//b/"), "/a/b");
    assert_eq!(ResponseCache::key_for("/a/b"), "/a/b");
    assert_eq!(ResponseCache::key_for(""), "/");
    assert_eq!(ResponseCache::key_for("//"), "/");
}

#[test]
fn test_concurrent_readers_and_writers() {
    let cache = Arc::new(cache(60));

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                for i in 0..500 {
                    let key = format!("/page/{}", i % 20);
                    if (i + t) % 3 == 0 {
                        cache.store(&key, StatusCode::OK, &HeaderMap::new(), Bytes::from(key.clone()));
                    } else if let Some(entry) = cache.lookup(&key) {
                        // Never a torn entry: the body always matches its key
                        assert_eq!(entry.body, Bytes::from(key));
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(cache.len(), 20);
}
