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
    /// Active identity provider, `session` or `dev-bypass`
    pub identity_provider: &'static str,
}

#[utoipa::path(
    get,
    path = "/api/health",
    tag = "Health",
    responses((status = 200, description = "Health check", body = HealthResponse))
)]
pub async fn health(State(state): State<AppState>) -> AppResult<Json<HealthResponse>> {
    let db_check = query_scalar::<_, i64>("SELECT 1").fetch_one(&state.pool).await;
    let identity_provider = state.identity.name();

    let response = match db_check {
        Ok(_) => HealthResponse { status: "ok", db_ok: true, identity_provider },
        Err(e) => {
            tracing::error!(error = %e, "health check database query failed");
            HealthResponse { status: "degraded", db_ok: false, identity_provider }
        }
    };

    Ok(Json(response))
}
