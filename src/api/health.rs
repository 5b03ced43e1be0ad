use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use super::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// GET /healthz. Unhealthy iff the key backend does not answer a ping.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.keys.ping().await {
        Ok(()) => (StatusCode::OK, Json(HealthResponse { status: "ok" })),
        Err(err) => {
            tracing::warn!(error = %err, "key backend ping failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(HealthResponse { status: "unhealthy" }),
            )
        }
    }
}
