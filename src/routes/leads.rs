use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};
use serde_json::Value;

use crate::{
    dto::leads::{LeadInput, LeadList, LeadQuery, UpsertSummary},
    error::AppResult,
    middleware::auth::AuthUser,
    response::ApiResponse,
    services::lead_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list_leads).post(upsert_leads))
}

#[utoipa::path(
    get,
    path = "/api/leads",
    params(LeadQuery),
    responses(
        (status = 200, description = "Leads matching every given filter, case-insensitively", body = ApiResponse<LeadList>),
        (status = 403, description = "Forbidden")
    ),
    security(("bearer_auth" = [])),
    tag = "Leads"
)]
pub async fn list_leads(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<LeadQuery>,
) -> AppResult<Json<ApiResponse<LeadList>>> {
    let resp = lead_service::list_leads(&state.leads, &user, query).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/leads",
    request_body(content = Vec<LeadInput>, description = "Leads to create or update"),
    responses(
        (status = 200, description = "Created, updated and skipped counts", body = ApiResponse<UpsertSummary>),
        (status = 400, description = "Body is not an array or no lead has a name"),
        (status = 403, description = "Forbidden")
    ),
    security(("bearer_auth" = [])),
    tag = "Leads"
)]
pub async fn upsert_leads(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<Value>,
) -> AppResult<Json<ApiResponse<UpsertSummary>>> {
    let resp = lead_service::upsert_leads(&state.leads, &user, body).await?;
    Ok(Json(resp))
}
