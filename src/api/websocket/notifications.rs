//! Notification WebSocket handler
//!
//! Every broadcast message is written to the socket as one text frame.
//! Anything the client sends is read only to notice when it goes away.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tracing::{debug, info};

use crate::api::server::AppState;
use crate::error::{HubError, Result};
use crate::hub::session::{serve_connection, FrameSink, FrameSource, Inbound};
use crate::hub::BroadcastMessage;

/// WebSocket handler for notifications
pub async fn notifications_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_notifications_ws(socket, state))
}

/// Handle WebSocket connection for notifications
async fn handle_notifications_ws(socket: WebSocket, state: AppState) {
    let (sender, receiver) = socket.split();

    info!("Notification WebSocket connected");

    let summary = serve_connection(state.hub.clone(), sender, receiver).await;

    info!(
        client = %summary.client,
        sent = summary.sent,
        "Notification WebSocket disconnected"
    );
}

/// The raw payload as a single text frame
fn text_frame(message: &BroadcastMessage) -> Message {
    Message::Text(message.payload().to_string())
}

/// Reduce whatever the socket yielded to what the session needs
fn classify<E>(frame: Option<std::result::Result<Message, E>>) -> Result<Inbound>
where
    E: std::fmt::Display,
{
    match frame {
        Some(Ok(Message::Close(_))) | None => {
            debug!("Notification WebSocket received close");
            Ok(Inbound::Closed)
        }
        // Pong is handled automatically by axum
        Some(Ok(_)) => Ok(Inbound::Frame),
        Some(Err(e)) => Err(HubError::Transport(e.to_string())),
    }
}

#[async_trait]
impl FrameSink for SplitSink<WebSocket, Message> {
    async fn send_frame(&mut self, message: &BroadcastMessage) -> Result<()> {
        self.send(text_frame(message))
            .await
            .map_err(|e| HubError::Transport(e.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        SinkExt::close(self)
            .await
            .map_err(|e| HubError::Transport(e.to_string()))
    }
}

#[async_trait]
impl FrameSource for SplitStream<WebSocket> {
    async fn next_frame(&mut self) -> Result<Inbound> {
        classify(self.next().await)
    }
}
