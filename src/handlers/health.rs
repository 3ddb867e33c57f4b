use axum::{extract::State, http::StatusCode, Json};
use crate::models::HealthResponse;
use crate::state::AppState;
use tracing::{debug, error};

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    debug!("Health check requested");
    Json(HealthResponse {
        status: "ok".to_string(),
        message: "Server is running".to_string(),
        rooms: None,
    })
}

/// Readiness check endpoint: the store must answer and the hub must be running
pub async fn ready_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    debug!("Readiness check requested");

    if let Err(e) = state.notes.ping().await {
        error!("Readiness check failed, store unavailable: {}", e);
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "unavailable".to_string(),
                message: "Store is unavailable".to_string(),
                rooms: None,
            }),
        );
    }

    let stats = state.hub.stats().await;
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
            message: "Service is ready".to_string(),
            rooms: Some(stats.rooms as u32),
        }),
    )
}
