//! Publish endpoint
//!
//! Other services post `{"message": "..."}` here; the text is broadcast
//! verbatim to every connected WebSocket client.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::api::server::AppState;
use crate::error::HubError;

/// Room for the `{"message": ...}` envelope and surrounding whitespace
const ENVELOPE_BYTES: usize = 1024;

/// Largest `\uXXXX` expansion of one payload byte
const MAX_ESCAPE_RATIO: usize = 6;

/// Body of a publish request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyRequest {
    pub message: String,
}

/// Largest request body that can still carry a message of
/// `max_message_bytes` once JSON escaping is accounted for.
pub fn body_limit(max_message_bytes: usize) -> usize {
    max_message_bytes
        .saturating_mul(MAX_ESCAPE_RATIO)
        .saturating_add(ENVELOPE_BYTES)
}

/// Accept a message for broadcast.
///
/// Answers as soon as the hub has the message; it says nothing about how
/// many clients received it.
pub async fn notify(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<NotifyRequest>, JsonRejection>,
) -> Result<impl IntoResponse, HubError> {
    let limit = state.config.server.max_message_bytes;

    let Json(request) = payload.map_err(|e| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            let size = content_length(&headers).unwrap_or_else(|| body_limit(limit) + 1);
            HubError::PayloadTooLarge { size, limit }
        } else {
            HubError::InvalidRequest(format!("Invalid JSON: {}", e.body_text()))
        }
    })?;

    if request.message.len() > limit {
        return Err(HubError::PayloadTooLarge {
            size: request.message.len(),
            limit,
        });
    }

    debug!("Publishing {} byte message", request.message.len());
    state.hub.publish(request.message).await?;

    Ok(Json(json!({ "status": "broadcasted" })))
}

fn content_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}
