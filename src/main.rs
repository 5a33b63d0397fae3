use axum::{
    Json, Router,
    extract::FromRef,
    http::{HeaderName, HeaderValue, Method, Request, Response, StatusCode, Uri, header},
    middleware::from_fn_with_state,
    routing::get,
};
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use std::{net::SocketAddr, sync::Arc, time::Duration};

use marketplace_api::{
    config::AppConfig,
    db::{create_pool, orm_from_pool, run_migrations},
    leads::LeadStore,
    middleware::{
        cache::ResponseCache,
        csrf::{CsrfConfig, HEADER_NAME as CSRF_HEADER},
        rate_limit::{CounterStore, MemoryStore, RateLimitPolicy, RateLimiter, RedisStore},
        timing::{SlowRequestThreshold, timing_layer},
    },
    response::{ApiResponse, Meta},
    routes::{ApiLayers, create_api_router, doc::scalar_docs, health},
    state::{AppState, JwtSecret},
};

const CACHE_SWEEP_PERIOD: Duration = Duration::from_secs(30);
const COUNTER_PURGE_PERIOD: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,marketplace_api=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(AppConfig::from_env()?);
    let pool = create_pool(&config.database_url).await?;
    let orm = orm_from_pool(&pool);

    run_migrations(&orm).await?;

    let cache = Arc::new(ResponseCache::new(config.cache_ttl, config.cache_max_entries));
    ResponseCache::spawn_sweeper(&cache, CACHE_SWEEP_PERIOD);

    let state = AppState {
        pool,
        orm,
        config: config.clone(),
        cache,
        leads: Arc::new(LeadStore::new(config.leads_file.clone())),
    };

    let store = counter_store(&config).await;
    let layers = ApiLayers {
        api_limiter: RateLimiter::new(
            store.clone(),
            RateLimitPolicy::api(config.rate_limit_max, config.rate_limit_window),
        )
        .with_secret(JwtSecret::from_ref(&state)),
        // Login and registration are always keyed by address.
        auth_limiter: RateLimiter::new(store, RateLimitPolicy::auth()),
        csrf: Arc::new(CsrfConfig::new(config.trusted_origins.clone())),
    };

    let api_router = create_api_router(&state, layers);
    let concurrency_limit_layer = ConcurrencyLimitLayer::new(100);

    let request_id_header = HeaderName::from_static("x-request-id");
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            let request_id = request
                .headers()
                .get("x-request-id")
                .and_then(|value| value.to_str().ok())
                .unwrap_or("-");
            tracing::info_span!(
                "http_request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id
            )
        })
        .on_request(|request: &Request<_>, _span: &tracing::Span| {
            tracing::info!(
                method = %request.method(),
                uri = %request.uri(),
                "request started"
            );
        })
        .on_response(|response: &Response<_>, latency: Duration, _span: &tracing::Span| {
            tracing::info!(
                status = %response.status(),
                ms = %latency.as_millis(),
                "request finished"
            );
        });

    let app = Router::new()
        .route("/health", get(health::health_check))
        .nest("/api", api_router)
        .merge(scalar_docs())
        .fallback(not_found)
        .layer(from_fn_with_state(
            SlowRequestThreshold(config.slow_request),
            timing_layer,
        ))
        .layer(cors_layer(&config))
        .layer(trace_layer)
        .layer(PropagateRequestIdLayer::new(
            request_id_header.clone(),
        ))
        .layer(SetRequestIdLayer::new(
            request_id_header,
            MakeRequestUuid,
        ))
        .layer(RequestBodyLimitLayer::new(1024 * 1024))
        .layer(concurrency_limit_layer)
        .with_state(state);

    let addr = SocketAddr::from((config.host.parse::<std::net::IpAddr>()?, config.port));
    tracing::info!("listening on {}", addr);

    axum::serve(
        tokio::net::TcpListener::bind(addr).await?,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Redis when configured and reachable, otherwise per-process counters.
async fn counter_store(config: &AppConfig) -> Arc<dyn CounterStore> {
    if let Some(url) = &config.redis_url {
        match RedisStore::connect(url).await {
            Ok(store) => {
                tracing::info!("rate limiter using redis");
                return Arc::new(store);
            }
            Err(err) => {
                tracing::warn!(error = %err, "redis unavailable, rate limiter using memory");
            }
        }
    }
    let store = Arc::new(MemoryStore::new());
    MemoryStore::spawn_purger(&store, COUNTER_PURGE_PERIOD);
    store
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .trusted_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(CSRF_HEADER),
        ])
        .allow_credentials(true)
}

async fn not_found(uri: Uri) -> (StatusCode, Json<ApiResponse<serde_json::Value>>) {
    let body = ApiResponse::success(
        "Not Found",
        serde_json::json!({ "path": uri.path() }),
        Some(Meta::empty()),
    );
    (StatusCode::NOT_FOUND, Json(body))
}
