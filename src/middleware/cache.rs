//! In-memory GET response cache.
//!
//! Responses are keyed by method, path and query. Only `200 OK` responses to
//! GET requests are stored; hits are replayed without calling the handler and
//! tagged with `x-cache: HIT`.

use std::{
    sync::Arc,
    time::Duration,
};

use axum::{
    body::{Body, Bytes, HttpBody},
    extract::{OriginalUri, Request, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use tokio::{task::JoinHandle, time::Instant};

use crate::error::AppError;

pub const CACHE_HEADER: &str = "x-cache";
/// Key prefixes of the public catalog, dropped whenever products or categories change.
pub const CATALOG_PREFIXES: [&str; 2] = ["GET /api/products", "GET /api/categories"];
const MAX_CACHEABLE_BODY: u64 = 2 * 1024 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct Expiry {
    inserted_at: Instant,
    ttl: Duration,
}

impl Expiry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inserted_at: Instant::now(),
            ttl,
        }
    }

    pub fn inserted_at(&self) -> Instant {
        self.inserted_at
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) >= self.ttl
    }
}

#[derive(Debug, Clone)]
struct CachedResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    expiry: Expiry,
}

impl CachedResponse {
    fn to_response(&self) -> Response {
        let mut response = Response::new(Body::from(self.body.clone()));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers.clone();
        response
    }
}

pub struct ResponseCache {
    entries: DashMap<String, CachedResponse>,
    ttl: Duration,
    max_entries: usize,
}

impl ResponseCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    pub fn key_for(method: &Method, uri: &Uri) -> String {
        match uri.query() {
            Some(query) => format!("{method} {}?{query}", uri.path()),
            None => format!("{method} {}", uri.path()),
        }
    }

    /// Returns a replay of the stored response while it is fresh.
    pub fn get(&self, key: &str) -> Option<Response> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.expiry.is_expired_at(now) => {
                return Some(entry.to_response());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    pub fn insert(&self, key: String, status: StatusCode, headers: HeaderMap, body: Bytes) {
        let entry = CachedResponse {
            status,
            headers,
            body,
            expiry: Expiry::new(self.ttl),
        };
        self.entries.insert(key, entry);
        if self.entries.len() > self.max_entries {
            self.evict_oldest();
        }
    }

    /// Drops the oldest tenth of the entries (at least one) by insertion time.
    fn evict_oldest(&self) {
        let mut ages: Vec<(String, Instant)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().expiry.inserted_at()))
            .collect();
        ages.sort_by_key(|(_, inserted_at)| *inserted_at);

        let count = (ages.len() / 10).max(1);
        for (key, _) in ages.into_iter().take(count) {
            self.entries.remove(&key);
        }
        tracing::debug!(evicted = count, "response cache over capacity");
    }

    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.expiry.is_expired_at(now));
        before.saturating_sub(self.entries.len())
    }

    pub fn invalidate_prefix(&self, prefix: &str) {
        self.entries.retain(|key, _| !key.starts_with(prefix));
    }

    pub fn invalidate_catalog(&self) {
        for prefix in CATALOG_PREFIXES {
            self.invalidate_prefix(prefix);
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Periodically removes expired entries. The task ends once the cache is dropped.
    pub fn spawn_sweeper(cache: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(cache);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else {
                    break;
                };
                let removed = cache.purge_expired();
                if removed > 0 {
                    tracing::debug!(removed, "swept expired cache entries");
                }
            }
        })
    }
}

pub async fn cache_layer(
    State(cache): State<Arc<ResponseCache>>,
    request: Request,
    next: Next,
) -> Response {
    if request.method() != Method::GET {
        return next.run(request).await;
    }

    // Nested routers see a stripped URI; key on the full one.
    let key = match request.extensions().get::<OriginalUri>() {
        Some(OriginalUri(uri)) => ResponseCache::key_for(request.method(), uri),
        None => ResponseCache::key_for(request.method(), request.uri()),
    };
    if let Some(mut hit) = cache.get(&key) {
        tracing::debug!(%key, "cache hit");
        hit.headers_mut()
            .insert(CACHE_HEADER, HeaderValue::from_static("HIT"));
        return hit;
    }

    let response = next.run(request).await;
    if !is_cacheable(&response) {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    match axum::body::to_bytes(body, MAX_CACHEABLE_BODY as usize).await {
        Ok(bytes) => {
            cache.insert(key, parts.status, parts.headers.clone(), bytes.clone());
            parts
                .headers
                .insert(CACHE_HEADER, HeaderValue::from_static("MISS"));
            Response::from_parts(parts, Body::from(bytes))
        }
        Err(err) => {
            AppError::Internal(anyhow::anyhow!("failed to read response body: {err}"))
                .into_response()
        }
    }
}

fn is_cacheable(response: &Response) -> bool {
    if response.status() != StatusCode::OK {
        return false;
    }
    if response.headers().contains_key(header::SET_COOKIE) {
        return false;
    }
    // Streaming or oversized bodies are passed through untouched.
    response
        .body()
        .size_hint()
        .upper()
        .is_some_and(|upper| upper <= MAX_CACHEABLE_BODY)
}
