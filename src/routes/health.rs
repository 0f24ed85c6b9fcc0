use axum::extract::State;
use axum::Json;
use serde::Serialize;
use sqlx::query_scalar;
use utoipa::ToSchema;

use crate::app::AppState;
use crate::errors::AppResult;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub db_ok: bool,
    /// Number of policies currently recognised from the permission catalog
    pub policies: usize,
}

#[utoipa::path(
    get,
    path = "/api/health",
    tag = "Health",
    responses((status = 200, description = "Health check", body = HealthResponse))
)]
pub async fn health(State(state): State<AppState>) -> AppResult<Json<HealthResponse>> {
    let db_check = query_scalar::<_, i64>("SELECT 1").fetch_one(&state.pool).await;
    if let Err(err) = &db_check {
        tracing::warn!(error = %err, "health check database probe failed");
    }

    let policies = state.authz.provider().catalog_policy_names().await.len();

    Ok(Json(HealthResponse {
        status: "ok",
        db_ok: db_check.is_ok(),
        policies,
    }))
}
