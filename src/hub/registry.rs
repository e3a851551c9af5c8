//! Subscriber registry
//!
//! Only the hub's coordination loop holds a `Registry`, so none of these
//! methods need synchronization.

use std::collections::HashMap;

use tracing::{debug, warn};

use super::client::{Client, ClientId, Offer};
use super::message::BroadcastMessage;

/// Result of a single fan-out pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FanOut {
    /// Clients that accepted the message into their queue
    pub delivered: usize,
    /// Clients removed during this pass
    pub dropped: Vec<ClientId>,
}

#[derive(Debug, Default)]
pub struct Registry {
    clients: HashMap<ClientId, Client>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client. A client already present under the same id is replaced
    /// and returned.
    pub fn insert(&mut self, client: Client) -> Option<Client> {
        self.clients.insert(client.id(), client)
    }

    /// Remove a client; `None` if it was not registered.
    pub fn remove(&mut self, id: &ClientId) -> Option<Client> {
        self.clients.remove(id)
    }

    pub fn contains(&self, id: &ClientId) -> bool {
        self.clients.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn ids(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self.clients.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Offer `message` to every registered client without blocking.
    ///
    /// Clients whose queue is full or whose mailbox is gone are removed
    /// before this returns, so the next pass never sees them. A full client
    /// is also evicted, so its worker abandons the backlog.
    pub fn broadcast(&mut self, message: &BroadcastMessage) -> FanOut {
        let mut result = FanOut::default();

        for (id, client) in &self.clients {
            match client.offer(message.clone()) {
                Offer::Queued => result.delivered += 1,
                Offer::Full => {
                    warn!(client = %id, seq = message.seq(), "Client queue full, dropping client");
                    client.evict();
                    result.dropped.push(*id);
                }
                Offer::Closed => {
                    debug!(client = %id, seq = message.seq(), "Client mailbox closed, dropping client");
                    result.dropped.push(*id);
                }
            }
        }

        for id in &result.dropped {
            self.clients.remove(id);
        }

        result
    }

    /// Drop every client, closing their queues.
    pub fn clear(&mut self) -> usize {
        let count = self.clients.len();
        self.clients.clear();
        count
    }
}
