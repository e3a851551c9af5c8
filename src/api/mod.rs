//! Notification API
//!
//! HTTP and WebSocket endpoints in front of the broadcast hub.

pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod websocket;

pub use server::{ApiServer, AppState};
