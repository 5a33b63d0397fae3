use std::sync::Arc;

use axum::extract::FromRef;

use crate::{
    config::AppConfig,
    db::{DbPool, OrmConn},
    leads::LeadStore,
    middleware::cache::ResponseCache,
};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub orm: OrmConn,
    pub config: Arc<AppConfig>,
    pub cache: Arc<ResponseCache>,
    pub leads: Arc<LeadStore>,
}

/// Signing secret for access tokens, extracted from the application state.
#[derive(Clone)]
pub struct JwtSecret(pub Arc<str>);

impl FromRef<AppState> for JwtSecret {
    fn from_ref(state: &AppState) -> Self {
        JwtSecret(Arc::from(state.config.jwt_secret.as_str()))
    }
}
