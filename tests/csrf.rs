use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{HeaderMap, HeaderValue, Method, Request, StatusCode, header},
    middleware::from_fn_with_state,
    routing::{get, post},
};
use marketplace_api::middleware::csrf::{
    COOKIE_NAME, CsrfConfig, CsrfRejection, HEADER_NAME, check_origin, cookie_token, csrf_layer,
    generate_token, issue_token, tokens_match,
};
use tower::ServiceExt;

const TRUSTED: &str = "http://localhost:3000";

fn config() -> CsrfConfig {
    CsrfConfig::new(vec![TRUSTED.to_string()]).with_exempt_path("/api/webhooks")
}

fn app() -> Router {
    Router::new()
        .route("/api/things", get(|| async { "list" }).post(|body: String| async move { body }))
        .route("/api/webhooks/payment", post(|| async { "ok" }))
        .route("/api/csrf", get(issue_token))
        .layer(from_fn_with_state(Arc::new(config()), csrf_layer))
}

fn post_request(cookie: Option<&str>, header_token: Option<&str>) -> axum::http::request::Builder {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/api/things")
        .header(header::ORIGIN, TRUSTED);
    if let Some(token) = cookie {
        builder = builder.header(header::COOKIE, format!("theme=dark; {COOKIE_NAME}={token}"));
    }
    if let Some(token) = header_token {
        builder = builder.header(HEADER_NAME, token);
    }
    builder
}

async fn status_of(request: Request<Body>) -> StatusCode {
    app().oneshot(request).await.unwrap().status()
}

#[tokio::test]
async fn safe_methods_are_not_checked() {
    let request = Request::builder()
        .uri("/api/things")
        .header(header::ORIGIN, "https://evil.example")
        .body(Body::empty())
        .unwrap();
    assert_eq!(status_of(request).await, StatusCode::OK);
}

#[tokio::test]
async fn post_without_tokens_is_forbidden() {
    let request = post_request(None, None).body(Body::empty()).unwrap();
    assert_eq!(status_of(request).await, StatusCode::FORBIDDEN);

    let request = post_request(Some("abc"), None).body(Body::empty()).unwrap();
    assert_eq!(status_of(request).await, StatusCode::FORBIDDEN);

    let request = post_request(None, Some("abc")).body(Body::empty()).unwrap();
    assert_eq!(status_of(request).await, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn matching_cookie_and_header_pass() {
    let token = generate_token();
    let request = post_request(Some(&token), Some(&token))
        .body(Body::from("payload"))
        .unwrap();
    let response = app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"payload");
}

#[tokio::test]
async fn mismatched_tokens_are_forbidden() {
    let request = post_request(Some(&generate_token()), Some(&generate_token()))
        .body(Body::empty())
        .unwrap();
    assert_eq!(status_of(request).await, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn untrusted_origin_is_forbidden_even_with_tokens() {
    let token = generate_token();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/things")
        .header(header::ORIGIN, "https://evil.example")
        .header(header::COOKIE, format!("{COOKIE_NAME}={token}"))
        .header(HEADER_NAME, &token)
        .body(Body::empty())
        .unwrap();
    assert_eq!(status_of(request).await, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn form_and_json_body_tokens_are_accepted_and_body_restored() {
    let token = generate_token();
    let form = format!("name=lamp&_csrf={token}");
    let request = post_request(Some(&token), None)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form.clone()))
        .unwrap();
    let response = app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(body, form.as_bytes());

    let json = serde_json::json!({ "name": "lamp", "_csrf": token }).to_string();
    let request = post_request(Some(&token), None)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json))
        .unwrap();
    assert_eq!(status_of(request).await, StatusCode::OK);

    let json = serde_json::json!({ "_csrf": "wrong" }).to_string();
    let request = post_request(Some(&token), None)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json))
        .unwrap();
    assert_eq!(status_of(request).await, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn exempt_paths_skip_the_check() {
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/webhooks/payment")
        .body(Body::empty())
        .unwrap();
    assert_eq!(status_of(request).await, StatusCode::OK);
}

#[tokio::test]
async fn issued_token_matches_cookie() {
    let request = Request::builder().uri("/api/csrf").body(Body::empty()).unwrap();
    let response = app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap().to_string();
    assert!(cookie.contains("SameSite=Strict"));
    assert!(cookie.contains("Path=/"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let token = json["data"]["token"].as_str().unwrap();
    assert_eq!(token.len(), 43);
    assert!(cookie.starts_with(&format!("{COOKIE_NAME}={token};")));
}

#[test]
fn origin_falls_back_to_referer() {
    let config = config();
    let mut headers = HeaderMap::new();
    assert_eq!(check_origin(&config, &headers), Ok(()));

    headers.insert(
        header::REFERER,
        HeaderValue::from_static("http://localhost:3000/checkout?step=2"),
    );
    assert_eq!(check_origin(&config, &headers), Ok(()));

    headers.insert(
        header::REFERER,
        HeaderValue::from_static("http://localhost:3001/checkout"),
    );
    assert_eq!(
        check_origin(&config, &headers),
        Err(CsrfRejection::UntrustedOrigin)
    );

    // Origin takes precedence over Referer.
    headers.insert(header::ORIGIN, HeaderValue::from_static("http://localhost:3000"));
    assert_eq!(check_origin(&config, &headers), Ok(()));
}

#[test]
fn token_helpers() {
    let token = generate_token();
    assert!(tokens_match(&token, &token));
    assert!(!tokens_match(&token, &generate_token()));
    assert!(!tokens_match(&token, ""));

    let mut headers = HeaderMap::new();
    headers.insert(
        header::COOKIE,
        HeaderValue::from_str(&format!("a=1; {COOKIE_NAME}={token}; b=2")).unwrap(),
    );
    assert_eq!(cookie_token(&headers), Some(token));
}
