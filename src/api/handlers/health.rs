//! Health and status endpoints

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::api::server::AppState;
use crate::error::HubError;

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "herald"
        })),
    )
}

/// Hub status: connected clients and fan-out counters
pub async fn status(State(state): State<AppState>) -> Result<impl IntoResponse, HubError> {
    let stats = state.hub.stats().await?;

    Ok(Json(json!({
        "status": "running",
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "clients": stats.subscribers,
        "hub": stats,
    })))
}
