use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    response::{ApiResponse, Meta},
    state::AppState,
};

#[derive(Serialize, ToSchema)]
pub struct HealthData {
    pub status: String,
}

fn health(message: &str, status: &str) -> Json<ApiResponse<HealthData>> {
    Json(ApiResponse::success(
        message,
        HealthData {
            status: status.to_string(),
        },
        Some(Meta::empty()),
    ))
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Process is up", body = ApiResponse<HealthData>),
    ),
    tag = "Health"
)]
pub async fn health_check() -> Json<ApiResponse<HealthData>> {
    health("Health check", "ok")
}

#[utoipa::path(
    get,
    path = "/health/db",
    responses(
        (status = 200, description = "Database reachable", body = ApiResponse<HealthData>),
        (status = 503, description = "Database unreachable", body = ApiResponse<HealthData>),
    ),
    tag = "Health"
)]
pub async fn database_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<ApiResponse<HealthData>>) {
    match state.orm.ping().await {
        Ok(()) => (StatusCode::OK, health("Database check", "ok")),
        Err(err) => {
            tracing::warn!(error = %err, "database ping failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                health("Database check", "unavailable"),
            )
        }
    }
}
