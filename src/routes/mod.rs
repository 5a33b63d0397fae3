use std::sync::Arc;

use axum::{Router, middleware::from_fn_with_state, routing::get};

use crate::{
    middleware::{
        cache::cache_layer,
        csrf::{self, CsrfConfig, csrf_layer},
        rate_limit::{RateLimiter, rate_limit_layer},
    },
    state::AppState,
};

pub mod admin;
pub mod auth;
pub mod categories;
pub mod doc;
pub mod health;
pub mod leads;
pub mod orders;
pub mod params;
pub mod products;
pub mod seller;

/// Request guards wrapped around the API router.
#[derive(Clone)]
pub struct ApiLayers {
    pub api_limiter: RateLimiter,
    pub auth_limiter: RateLimiter,
    pub csrf: Arc<CsrfConfig>,
}

// Build the API router without binding state; it will be provided at the top level.
// Layers run outermost first: rate limit, CSRF, then the catalog cache.
pub fn create_api_router(state: &AppState, layers: ApiLayers) -> Router<AppState> {
    let catalog = Router::new()
        .nest("/products", products::router())
        .nest("/categories", categories::router())
        .layer(from_fn_with_state(state.cache.clone(), cache_layer));

    let auth = auth::router().layer(from_fn_with_state(layers.auth_limiter, rate_limit_layer));

    Router::new()
        .route("/csrf", get(csrf::issue_token))
        .merge(catalog)
        .nest("/auth", auth)
        .nest("/orders", orders::router())
        .nest("/seller", seller::router())
        .nest("/admin", admin::router())
        .nest("/leads", leads::router())
        .layer(from_fn_with_state(layers.csrf, csrf_layer))
        .layer(from_fn_with_state(layers.api_limiter, rate_limit_layer))
}
