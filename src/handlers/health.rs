use authgate_api::HealthResponse;
use axum::{Json, http::StatusCode};

/// GET /health
/// Simple healthcheck endpoint
pub async fn health() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
        }),
    )
}
