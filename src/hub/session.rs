//! Subscriber sessions
//!
//! A session ties one transport connection to the hub. It subscribes a fresh
//! client, runs the client's delivery worker (the only place a transport
//! write happens) next to a reader that watches the connection for close,
//! and unsubscribes as soon as either side finishes.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::client::{ClientId, ClientState, Mailbox};
use super::message::BroadcastMessage;
use super::{Hub, HubConfig};
use crate::error::{HubError, Result};

/// Outbound half of a subscriber connection
#[async_trait]
pub trait FrameSink: Send + 'static {
    /// Write one message to the peer.
    async fn send_frame(&mut self, message: &BroadcastMessage) -> Result<()>;

    /// Close the connection.
    async fn close(&mut self) -> Result<()>;
}

/// Inbound frame, reduced to what the hub cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    /// Any data frame; its content is ignored
    Frame,
    /// The peer closed the connection
    Closed,
}

/// Inbound half of a subscriber connection
#[async_trait]
pub trait FrameSource: Send + 'static {
    async fn next_frame(&mut self) -> Result<Inbound>;
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The peer closed the connection
    PeerClosed,
    ReadFailed(String),
    /// A write failed or exceeded the write timeout
    WriteFailed(String),
    /// The hub dropped the client because its queue was full; the backlog
    /// was abandoned
    Evicted,
    /// The hub released the client on close
    Released,
    /// The hub was already closed when the session started
    HubClosed,
}

#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub client: ClientId,
    /// Messages written to the transport
    pub sent: u64,
    pub end: SessionEnd,
}

/// What a delivery worker did before it stopped
#[derive(Debug)]
pub struct Delivery {
    pub sent: u64,
    /// Set when the worker stopped because a write failed
    pub failure: Option<HubError>,
    /// Set when the worker stopped because its mailbox was evicted
    pub evicted: bool,
}

/// Drain `mailbox` into `sink` until the hub drops the client or a write
/// fails, then close the sink.
///
/// On a failed write or an eviction the rest of the queue is discarded; the
/// caller is expected to unsubscribe the client. A plain unsubscribe still
/// flushes what was queued.
pub async fn deliver<S: FrameSink>(
    mut mailbox: Mailbox,
    mut sink: S,
    write_timeout: Duration,
) -> Delivery {
    let id = mailbox.id();
    let mut sent = 0;
    let mut failure = None;

    while let Some(message) = mailbox.recv().await {
        let result = match timeout(write_timeout, sink.send_frame(&message)).await {
            Ok(result) => result,
            Err(_) => Err(HubError::Timeout),
        };

        match result {
            Ok(()) => sent += 1,
            Err(e) => {
                warn!(client = %id, seq = message.seq(), "Delivery failed: {}", e);
                let discarded = mailbox.discard();
                if discarded > 0 {
                    debug!(client = %id, "Discarded {} queued messages", discarded);
                }
                failure = Some(e);
                break;
            }
        }
    }

    let evicted = failure.is_none() && mailbox.is_evicted();
    if evicted {
        warn!(client = %id, sent, "Client evicted, queued messages abandoned");
    }

    match timeout(write_timeout, sink.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(client = %id, "Close failed: {}", e),
        Err(_) => debug!(client = %id, "Close timed out"),
    }

    Delivery {
        sent,
        failure,
        evicted,
    }
}

async fn read_until_closed<R: FrameSource>(mut source: R) -> SessionEnd {
    loop {
        match source.next_frame().await {
            Ok(Inbound::Frame) => {}
            Ok(Inbound::Closed) => return SessionEnd::PeerClosed,
            Err(e) => return SessionEnd::ReadFailed(e.to_string()),
        }
    }
}

/// Run one subscriber connection to completion.
pub async fn serve_connection<S, R>(hub: Hub, mut sink: S, source: R) -> SessionSummary
where
    S: FrameSink,
    R: FrameSource,
{
    let (client, mailbox) = hub.new_client();
    let id = client.id();
    let mut state = ClientState::Connecting;

    if hub.subscribe(client).await.is_err() {
        let _ = sink.close().await;
        return SessionSummary {
            client: id,
            sent: 0,
            end: SessionEnd::HubClosed,
        };
    }
    advance(id, &mut state, ClientState::Subscribed);

    let HubConfig {
        write_timeout,
        close_grace,
        ..
    } = *hub.config();
    let eviction = mailbox.eviction();
    let mut delivery = tokio::spawn(deliver(mailbox, sink, write_timeout));
    let mut reader = tokio::spawn(read_until_closed(source));

    let (sent, end) = tokio::select! {
        finished = &mut delivery => {
            reader.abort();
            match finished {
                Ok(Delivery { sent, failure: Some(e), .. }) => (sent, SessionEnd::WriteFailed(e.to_string())),
                Ok(Delivery { evicted: true, sent, .. }) => (sent, SessionEnd::Evicted),
                Ok(Delivery { sent, .. }) => (sent, SessionEnd::Released),
                Err(e) => (0, SessionEnd::WriteFailed(e.to_string())),
            }
        }
        finished = &mut reader => {
            let end = finished.unwrap_or_else(|e| SessionEnd::ReadFailed(e.to_string()));

            // Dropping the client from the hub ends the worker once it has
            // flushed what was already queued.
            advance(id, &mut state, ClientState::Unsubscribing);
            hub.unsubscribe(id).await;

            let flushed = timeout(close_grace, &mut delivery).await;
            let finished = match flushed {
                Ok(finished) => finished,
                Err(_) => {
                    // Only the write in flight and the close remain, each
                    // bounded by the write timeout.
                    warn!(
                        client = %id,
                        "Backlog not flushed within {:?}, abandoning it",
                        close_grace
                    );
                    eviction.evict();
                    delivery.await
                }
            };
            let sent = match finished {
                Ok(delivery) => delivery.sent,
                Err(e) => {
                    warn!(client = %id, "Delivery worker failed: {}", e);
                    0
                }
            };
            (sent, end)
        }
    };

    if state == ClientState::Subscribed {
        advance(id, &mut state, ClientState::Unsubscribing);
        hub.unsubscribe(id).await;
    }
    advance(id, &mut state, ClientState::Removed);

    info!(client = %id, sent, "Session ended: {:?}", end);

    SessionSummary {
        client: id,
        sent,
        end,
    }
}

fn advance(id: ClientId, state: &mut ClientState, next: ClientState) {
    debug_assert!(
        state.can_advance_to(next),
        "illegal transition {} -> {}",
        state.as_str(),
        next.as_str()
    );
    debug!(client = %id, "{} -> {}", state.as_str(), next.as_str());
    *state = next;
}
