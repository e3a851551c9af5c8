//! WebSocket handlers
//!
//! Each connection becomes one hub session; the per-client queue bound and
//! write timeout come from the hub configuration.

pub mod notifications;
