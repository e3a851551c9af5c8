//! API route definitions

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

use super::handlers;
use super::server::AppState;
use super::websocket;

/// Create the API router with all routes
pub fn create_router(state: AppState) -> Router {
    let notify_body_limit =
        handlers::notify::body_limit(state.config.server.max_message_bytes);

    Router::new()
        // Health check
        .route("/health", get(handlers::health::health_check))
        .route("/api/status", get(handlers::health::status))
        // Publishers
        .route(
            "/notify",
            post(handlers::notify::notify).layer(DefaultBodyLimit::max(notify_body_limit)),
        )
        // Subscribers
        .route("/ws", get(websocket::notifications::notifications_ws))
        .with_state(state)
}
