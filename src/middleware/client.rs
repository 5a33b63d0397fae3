//! Client identification for per-client middleware state.

use std::net::SocketAddr;

use axum::{
    extract::ConnectInfo,
    http::{HeaderMap, Request, header},
};

use crate::middleware::auth::verify_token;

pub const UNKNOWN_IP: &str = "unknown";

/// Best-effort client address: first `x-forwarded-for` hop, then `x-real-ip`,
/// then the socket peer when the server was started with connect info.
pub fn client_ip<B>(request: &Request<B>) -> String {
    forwarded_ip(request.headers())
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| UNKNOWN_IP.to_string())
}

fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    let from_forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    from_forwarded
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        })
        .map(str::to_string)
}

/// Stable, non-reversible identifier for the caller.
///
/// Callers with a bearer token that verifies against `secret` are keyed by
/// their user id. Everyone else, including callers sending an unverifiable
/// token, is keyed by address and user agent.
pub fn client_key<B>(request: &Request<B>, secret: Option<&str>) -> String {
    let user = secret.and_then(|secret| {
        request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .and_then(|token| verify_token(secret, token).ok())
    });

    if let Some(user) = user {
        return format!("user:{}", short_hash(user.user_id.as_bytes()));
    }

    let agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let material = format!("{}|{}", client_ip(request), agent);
    format!("ip:{}", short_hash(material.as_bytes()))
}

fn short_hash(bytes: &[u8]) -> String {
    let hex = blake3::hash(bytes).to_hex();
    hex.as_str()[..32].to_string()
}
