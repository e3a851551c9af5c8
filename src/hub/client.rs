//! Subscriber handles
//!
//! A [`Client`] is the hub's side of one subscriber: the producer end of a
//! bounded FIFO queue. The matching [`Mailbox`] is the consumer end, owned
//! by the client's delivery worker.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use super::message::BroadcastMessage;

/// Unique identity of a subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Lifecycle of a subscriber connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Connecting,
    Subscribed,
    Unsubscribing,
    Removed,
}

impl ClientState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientState::Connecting => "connecting",
            ClientState::Subscribed => "subscribed",
            ClientState::Unsubscribing => "unsubscribing",
            ClientState::Removed => "removed",
        }
    }

    /// Whether `next` is a legal successor of this state
    pub fn can_advance_to(&self, next: ClientState) -> bool {
        matches!(
            (self, next),
            (ClientState::Connecting, ClientState::Subscribed)
                | (ClientState::Connecting, ClientState::Removed)
                | (ClientState::Subscribed, ClientState::Unsubscribing)
                | (ClientState::Subscribed, ClientState::Removed)
                | (ClientState::Unsubscribing, ClientState::Removed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ClientState::Removed)
    }
}

/// Outcome of offering a message to a client's queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    Queued,
    /// Queue at capacity; the consumer is too slow
    Full,
    /// The mailbox was dropped; the delivery worker is gone
    Closed,
}

/// Flag shared by a client and its mailbox. Once set, the mailbox refuses
/// to hand out anything still queued.
#[derive(Debug, Clone, Default)]
pub struct Eviction(Arc<AtomicBool>);

impl Eviction {
    pub fn evict(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_evicted(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Hub-side handle of a subscriber
#[derive(Debug)]
pub struct Client {
    id: ClientId,
    queue: mpsc::Sender<BroadcastMessage>,
    eviction: Eviction,
}

impl Client {
    /// Create a client with a queue holding at most `capacity` messages.
    pub fn new(capacity: usize) -> (Client, Mailbox) {
        Self::with_id(ClientId::new(), capacity)
    }

    pub fn with_id(id: ClientId, capacity: usize) -> (Client, Mailbox) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let eviction = Eviction::default();
        (
            Client {
                id,
                queue: tx,
                eviction: eviction.clone(),
            },
            Mailbox { id, rx, eviction },
        )
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Liveness flag: false once the delivery worker dropped its mailbox
    pub fn is_alive(&self) -> bool {
        !self.queue.is_closed()
    }

    /// Mark the client dead: its backlog is abandoned instead of flushed.
    pub(crate) fn evict(&self) {
        self.eviction.evict();
    }

    /// Non-blocking enqueue
    pub(crate) fn offer(&self, message: BroadcastMessage) -> Offer {
        match self.queue.try_send(message) {
            Ok(()) => Offer::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => Offer::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => Offer::Closed,
        }
    }
}

/// Consumer end of a client's queue
#[derive(Debug)]
pub struct Mailbox {
    id: ClientId,
    rx: mpsc::Receiver<BroadcastMessage>,
    eviction: Eviction,
}

impl Mailbox {
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Handle that can evict this mailbox from another task
    pub fn eviction(&self) -> Eviction {
        self.eviction.clone()
    }

    pub fn is_evicted(&self) -> bool {
        self.eviction.is_evicted()
    }

    /// Next queued message, or `None` once the hub dropped the client and
    /// the queue is empty. An evicted mailbox discards its backlog and
    /// returns `None` straight away.
    pub async fn recv(&mut self) -> Option<BroadcastMessage> {
        if self.is_evicted() {
            self.discard();
            return None;
        }
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<BroadcastMessage> {
        if self.is_evicted() {
            self.discard();
            return None;
        }
        self.rx.try_recv().ok()
    }

    /// Refuse further messages and drop whatever is still queued.
    /// Returns the number of messages discarded.
    pub fn discard(&mut self) -> usize {
        self.rx.close();
        let mut dropped = 0;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }
}
