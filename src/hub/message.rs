//! Broadcast message model

use std::sync::Arc;

use chrono::{DateTime, Utc};

/// A message accepted by the hub for fan-out.
///
/// The payload is shared between every recipient's queue, so cloning a
/// message never copies the text.
#[derive(Debug, Clone)]
pub struct BroadcastMessage {
    seq: u64,
    payload: Arc<str>,
    accepted_at: DateTime<Utc>,
}

impl BroadcastMessage {
    pub fn new(seq: u64, payload: Arc<str>) -> Self {
        Self {
            seq,
            payload,
            accepted_at: Utc::now(),
        }
    }

    /// Position of this message in the hub's processing order (starts at 1)
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn accepted_at(&self) -> DateTime<Utc> {
        self.accepted_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_shares_payload() {
        let msg = BroadcastMessage::new(7, Arc::from("hello"));
        let copy = msg.clone();

        assert_eq!(copy.seq(), 7);
        assert_eq!(copy.payload(), "hello");
        assert!(std::ptr::eq(msg.payload(), copy.payload()));
    }
}
