//! Herald - real-time notification broadcast hub
//!
//! Fans messages published over HTTP out to every connected WebSocket
//! client.
//!
//! ## Features
//!
//! - Single-owner subscriber registry driven by one coordination task
//! - Bounded per-client queues with dedicated delivery workers
//! - Slow or broken clients are dropped without affecting anyone else
//! - `POST /notify` publish endpoint and `GET /ws` subscriber endpoint
//! - Outbound [`Notifier`] client for services that publish to a hub

pub mod api;
pub mod config;
pub mod error;
pub mod hub;
pub mod notifier;

pub use config::Config;
pub use error::{HubError, Result};
pub use hub::{Hub, HubConfig};
pub use notifier::Notifier;
