use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
    middleware::from_fn_with_state,
    routing::get,
};
use marketplace_api::{
    middleware::{
        auth::issue_token,
        client::client_key,
        rate_limit::{
            CounterStore, LIMIT_HEADER, MemoryStore, REMAINING_HEADER, RESET_HEADER,
            RateLimitDecision, RateLimitPolicy, RateLimiter, StoreError, WindowHit,
            rate_limit_layer,
        },
    },
    state::JwtSecret,
};
use tower::ServiceExt;
use uuid::Uuid;

const SECRET: &str = "rate-limit-secret";

const WINDOW: Duration = Duration::from_secs(60);

struct FailingStore;

#[async_trait]
impl CounterStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<u64>, StoreError> {
        Err(StoreError::Unavailable("down".into()))
    }

    async fn increment(
        &self,
        _key: &str,
        _window: Duration,
        _limit: u64,
    ) -> Result<WindowHit, StoreError> {
        Err(StoreError::Unavailable("down".into()))
    }

    async fn reset(&self, _key: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("down".into()))
    }
}

fn limiter(max: u64) -> RateLimiter {
    RateLimiter::new(Arc::new(MemoryStore::new()), RateLimitPolicy::api(max, WINDOW))
}

fn app(limiter: RateLimiter) -> Router {
    Router::new()
        .route("/api/ping", get(|| async { "pong" }))
        .layer(from_fn_with_state(limiter, rate_limit_layer))
}

fn request_from(ip: &str) -> Request<Body> {
    Request::builder()
        .uri("/api/ping")
        .header("x-forwarded-for", ip)
        .header(header::USER_AGENT, "tests")
        .body(Body::empty())
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn requests_beyond_the_limit_are_rejected() {
    let limiter = limiter(3);

    for expected_remaining in [2, 1, 0] {
        let decision = limiter.check("client-a").await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, expected_remaining);
        assert_eq!(decision.limit, 3);
    }

    let decision = limiter.check("client-a").await;
    assert!(!decision.allowed);
    assert_eq!(decision.remaining, 0);
    assert!(decision.reset_secs() >= 1);

    let other = limiter.check("client-b").await;
    assert!(other.allowed);
    assert_eq!(other.remaining, 2);
}

#[tokio::test(start_paused = true)]
async fn window_slides_forward() {
    let limiter = limiter(2);
    assert!(limiter.check("a").await.allowed);
    tokio::time::advance(Duration::from_secs(30)).await;
    assert!(limiter.check("a").await.allowed);

    // The first hit leaves the window; one slot frees up.
    tokio::time::advance(Duration::from_secs(31)).await;
    assert!(limiter.check("a").await.allowed);
    assert!(!limiter.check("a").await.allowed);
}

#[tokio::test]
async fn failing_store_allows_requests() {
    let limiter = RateLimiter::new(Arc::new(FailingStore), RateLimitPolicy::auth());
    for _ in 0..20 {
        let decision = limiter.check("anyone").await;
        assert!(decision.allowed);
        assert_eq!(decision.limit, 10);
    }
}

#[tokio::test(start_paused = true)]
async fn layer_returns_429_with_retry_after() {
    let app = app(limiter(2));

    for _ in 0..2 {
        let response = app.clone().oneshot(request_from("10.0.0.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[LIMIT_HEADER], "2");
        assert!(response.headers().contains_key(REMAINING_HEADER));
        assert!(response.headers().contains_key(RESET_HEADER));
    }

    let response = app.clone().oneshot(request_from("10.0.0.1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response.headers()[header::RETRY_AFTER]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));
    assert_eq!(response.headers()[REMAINING_HEADER], "0");

    let response = app.clone().oneshot(request_from("10.0.0.2")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test(start_paused = true)]
async fn memory_store_get_reset_and_purge() {
    let store = MemoryStore::new();
    assert_eq!(store.get("k").await.unwrap(), None);

    store.increment("k", WINDOW, 10).await.unwrap();
    let hit = store.increment("k", WINDOW, 10).await.unwrap();
    assert_eq!(hit.count, 2);
    assert_eq!(hit.reset_after, WINDOW);
    assert_eq!(store.get("k").await.unwrap(), Some(2));

    store.reset("k").await.unwrap();
    assert_eq!(store.get("k").await.unwrap(), None);

    store.increment("idle", WINDOW, 10).await.unwrap();
    tokio::time::advance(WINDOW).await;
    assert_eq!(store.purge_idle(), 1);
}

#[test]
fn reset_seconds_round_up() {
    let decision = RateLimitDecision {
        allowed: false,
        limit: 1,
        remaining: 0,
        reset_after: Duration::from_millis(1500),
    };
    assert_eq!(decision.reset_secs(), 2);

    let decision = RateLimitDecision {
        reset_after: Duration::ZERO,
        ..decision
    };
    assert_eq!(decision.reset_secs(), 1);
}

#[tokio::test(start_paused = true)]
async fn denied_hits_are_not_recorded() {
    let store = MemoryStore::new();
    for _ in 0..2 {
        store.increment("k", WINDOW, 2).await.unwrap();
    }
    for _ in 0..50 {
        let hit = store.increment("k", WINDOW, 2).await.unwrap();
        assert_eq!(hit.count, 3);
    }
    assert_eq!(store.get("k").await.unwrap(), Some(2));

    tokio::time::advance(Duration::from_secs(20)).await;
    let hit = store.increment("k", WINDOW, 2).await.unwrap();
    assert_eq!(hit.count, 3);
    // The oldest kept hit decides when a slot frees up.
    assert_eq!(hit.reset_after, Duration::from_secs(40));

    tokio::time::advance(Duration::from_secs(40)).await;
    assert_eq!(store.increment("k", WINDOW, 2).await.unwrap().count, 1);
}

#[tokio::test(start_paused = true)]
async fn limited_response_uses_the_error_body() {
    let app = app(limiter(1));
    app.clone().oneshot(request_from("10.0.0.3")).await.unwrap();

    let response = app.oneshot(request_from("10.0.0.3")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["message"], "Too Many Requests");
    assert_eq!(json["data"]["error"], "Too Many Requests");
}

fn request_with_token(ip: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri("/api/ping")
        .header("x-forwarded-for", ip)
        .header(header::USER_AGENT, "tests")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn rotating_unverified_tokens_share_the_address_counter() {
    let limiter = limiter(2).with_secret(JwtSecret(SECRET.into()));
    let app = app(limiter);

    let mut statuses = Vec::new();
    for i in 0..5 {
        let response = app
            .clone()
            .oneshot(request_with_token("10.0.0.4", &format!("junk{i}")))
            .await
            .unwrap();
        statuses.push(response.status());
    }
    assert_eq!(statuses[..2], [StatusCode::OK, StatusCode::OK]);
    assert!(statuses[2..].iter().all(|s| *s == StatusCode::TOO_MANY_REQUESTS));

    // A signed-in user gets their own counter even from the same address.
    let token = issue_token(SECRET, Uuid::new_v4(), "buyer").unwrap();
    let response = app
        .oneshot(request_with_token("10.0.0.4", &token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[test]
fn client_key_uses_verified_user_or_address() {
    let user_id = Uuid::new_v4();
    let token = issue_token(SECRET, user_id, "buyer").unwrap();
    let bearer = |token: &str, ip: &str| {
        Request::builder()
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header("x-forwarded-for", ip)
            .body(())
            .unwrap()
    };

    let key = client_key(&bearer(&token, "10.0.0.1"), Some(SECRET));
    assert!(key.starts_with("user:"));
    assert_eq!(key, client_key(&bearer(&token, "10.0.0.9"), Some(SECRET)));
    assert!(!key.contains(&user_id.to_string()));

    // Unverifiable or unchecked tokens fall back to the address.
    assert!(client_key(&bearer("abc.def", "10.0.0.1"), Some(SECRET)).starts_with("ip:"));
    assert!(client_key(&bearer(&token, "10.0.0.1"), Some("other-secret")).starts_with("ip:"));
    assert!(client_key(&bearer(&token, "10.0.0.1"), None).starts_with("ip:"));
    assert_eq!(
        client_key(&bearer("junk1", "10.0.0.1"), Some(SECRET)),
        client_key(&bearer("junk2", "10.0.0.1"), Some(SECRET))
    );

    let anonymous = Request::builder()
        .header("x-forwarded-for", "10.0.0.1, 172.16.0.1")
        .header(header::USER_AGENT, "curl")
        .body(())
        .unwrap();
    let other_agent = Request::builder()
        .header("x-forwarded-for", "10.0.0.1")
        .header(header::USER_AGENT, "firefox")
        .body(())
        .unwrap();
    assert!(client_key(&anonymous, None).starts_with("ip:"));
    assert_ne!(client_key(&anonymous, None), client_key(&other_agent, None));
}
