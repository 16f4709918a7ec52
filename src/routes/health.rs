use axum::{extract::State, routing::get, Json, Router};

use crate::models::HealthResponse;

#[derive(Clone)]
pub struct HealthState {
    pub queue: String,
}

pub fn router(queue: String) -> Router {
    Router::new()
        .route("/api/v1/health", get(health_check))
        .with_state(HealthState { queue })
}

/// Health check dell'API
#[utoipa::path(
    get,
    path = "/api/v1/health",
    responses(
        (status = 200, description = "API funzionante", body = HealthResponse),
    ),
    tag = "Sistema"
)]
pub async fn health_check(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        queue: state.queue,
    })
}
