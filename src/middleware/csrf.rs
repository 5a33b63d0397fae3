//! Double-submit-cookie CSRF protection.
//!
//! Unsafe requests must come from a trusted origin (when the browser says
//! where they come from) and must echo the `csrf-token` cookie in the
//! `x-csrf-token` header or a `_csrf` body field.

use std::sync::Arc;

use axum::{
    Json,
    body::{Body, Bytes},
    extract::{OriginalUri, Request, State},
    http::{HeaderMap, HeaderValue, Method, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use password_hash::rand_core::{OsRng, RngCore};
use serde::Serialize;
use subtle::ConstantTimeEq;
use utoipa::ToSchema;

use crate::{
    error::AppError,
    response::{ApiResponse, Meta},
};

pub const COOKIE_NAME: &str = "csrf-token";
pub const HEADER_NAME: &str = "x-csrf-token";
pub const FORM_FIELD: &str = "_csrf";
const TOKEN_BYTES: usize = 32;
const MAX_INSPECTED_BODY: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct CsrfConfig {
    pub trusted_origins: Vec<String>,
    pub exempt_paths: Vec<String>,
}

impl CsrfConfig {
    pub fn new(trusted_origins: Vec<String>) -> Self {
        Self {
            trusted_origins,
            exempt_paths: Vec::new(),
        }
    }

    pub fn with_exempt_path(mut self, prefix: impl Into<String>) -> Self {
        self.exempt_paths.push(prefix.into());
        self
    }

    fn is_exempt(&self, path: &str) -> bool {
        self.exempt_paths.iter().any(|prefix| path.starts_with(prefix))
    }

    fn is_trusted(&self, origin: &str) -> bool {
        let origin = origin.trim_end_matches('/');
        self.trusted_origins.iter().any(|trusted| trusted == origin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsrfRejection {
    UntrustedOrigin,
    MissingToken,
    TokenMismatch,
}

impl CsrfRejection {
    pub fn reason(&self) -> &'static str {
        match self {
            CsrfRejection::UntrustedOrigin => "untrusted origin",
            CsrfRejection::MissingToken => "missing csrf token",
            CsrfRejection::TokenMismatch => "csrf token mismatch",
        }
    }
}

pub fn is_safe_method(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}

pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn tokens_match(expected: &str, provided: &str) -> bool {
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

pub fn token_cookie(token: &str) -> String {
    format!("{COOKIE_NAME}={token}; Path=/; SameSite=Strict")
}

/// Origin check: `Origin` wins, `Referer` is the fallback, neither is allowed.
pub fn check_origin(config: &CsrfConfig, headers: &HeaderMap) -> Result<(), CsrfRejection> {
    if let Some(origin) = headers.get(header::ORIGIN) {
        let origin = origin.to_str().map_err(|_| CsrfRejection::UntrustedOrigin)?;
        return if config.is_trusted(origin) {
            Ok(())
        } else {
            Err(CsrfRejection::UntrustedOrigin)
        };
    }

    if let Some(referer) = headers.get(header::REFERER) {
        let referer = referer.to_str().map_err(|_| CsrfRejection::UntrustedOrigin)?;
        let origin = origin_of(referer).ok_or(CsrfRejection::UntrustedOrigin)?;
        return if config.is_trusted(origin) {
            Ok(())
        } else {
            Err(CsrfRejection::UntrustedOrigin)
        };
    }

    Ok(())
}

/// `scheme://host[:port]` prefix of an absolute URL.
fn origin_of(url: &str) -> Option<&str> {
    let scheme_end = url.find("://")?;
    let rest = &url[scheme_end + 3..];
    let host_len = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    if host_len == 0 {
        return None;
    }
    Some(&url[..scheme_end + 3 + host_len])
}

pub fn cookie_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == COOKIE_NAME)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn header_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(HEADER_NAME)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn body_token(content_type: &str, body: &Bytes) -> Option<String> {
    if content_type.starts_with("application/x-www-form-urlencoded") {
        let raw = std::str::from_utf8(body).ok()?;
        return raw
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(name, _)| *name == FORM_FIELD)
            .map(|(_, value)| value.to_string())
            .filter(|value| !value.is_empty());
    }
    if content_type.starts_with("application/json") {
        let value: serde_json::Value = serde_json::from_slice(body).ok()?;
        return value
            .get(FORM_FIELD)
            .and_then(|v| v.as_str())
            .filter(|v| !v.is_empty())
            .map(str::to_string);
    }
    None
}

pub async fn csrf_layer(
    State(config): State<Arc<CsrfConfig>>,
    request: Request,
    next: Next,
) -> Response {
    // Nested routers see a stripped URI; exemptions are full paths.
    let path = match request.extensions().get::<OriginalUri>() {
        Some(OriginalUri(uri)) => uri.path().to_string(),
        None => request.uri().path().to_string(),
    };
    if is_safe_method(request.method()) || config.is_exempt(&path) {
        return next.run(request).await;
    }

    match verify(&config, request).await {
        Ok(request) => next.run(request).await,
        Err((rejection, uri)) => {
            tracing::warn!(reason = rejection.reason(), %uri, "csrf check failed");
            AppError::Forbidden.into_response()
        }
    }
}

async fn verify(
    config: &CsrfConfig,
    request: Request,
) -> Result<Request, (CsrfRejection, axum::http::Uri)> {
    let uri = request.uri().clone();
    check_origin(config, request.headers()).map_err(|r| (r, uri.clone()))?;

    let Some(expected) = cookie_token(request.headers()) else {
        return Err((CsrfRejection::MissingToken, uri));
    };

    if let Some(provided) = header_token(request.headers()) {
        return if tokens_match(&expected, &provided) {
            Ok(request)
        } else {
            Err((CsrfRejection::TokenMismatch, uri))
        };
    }

    // No header: fall back to the body field, restoring the body afterwards.
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();
    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, MAX_INSPECTED_BODY)
        .await
        .map_err(|_| (CsrfRejection::MissingToken, uri.clone()))?;

    match body_token(&content_type, &bytes) {
        Some(provided) if tokens_match(&expected, &provided) => {
            Ok(Request::from_parts(parts, Body::from(bytes)))
        }
        Some(_) => Err((CsrfRejection::TokenMismatch, uri)),
        None => Err((CsrfRejection::MissingToken, uri)),
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CsrfToken {
    pub token: String,
}

#[utoipa::path(
    get,
    path = "/api/csrf",
    responses(
        (status = 200, description = "Issue a CSRF token and set its cookie", body = ApiResponse<CsrfToken>)
    ),
    tag = "Security"
)]
pub async fn issue_token() -> Response {
    let token = generate_token();
    let cookie = token_cookie(&token);
    let body = ApiResponse::success("CSRF token", CsrfToken { token }, Some(Meta::empty()));
    let mut response = Json(body).into_response();
    match HeaderValue::from_str(&cookie) {
        Ok(value) => {
            response.headers_mut().insert(header::SET_COOKIE, value);
            response
        }
        Err(err) => {
            AppError::Internal(anyhow::anyhow!("invalid cookie header: {err}")).into_response()
        }
    }
}
