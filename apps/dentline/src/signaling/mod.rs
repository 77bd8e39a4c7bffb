//! Relay signaling: the persistent channel used to negotiate peer
//! connections out of band.

use thiserror::Error;

pub mod client;
pub mod local;
pub mod messages;

pub use client::SignalingClient;
pub use local::LocalRelay;
pub use messages::{ClientMessage, PeerId, RelayMessage, RoomId};

#[derive(Debug, Error)]
pub enum SignalingError {
    /// Transport-level connect failure. Not retried here; retry policy
    /// belongs to the caller.
    #[error("relay connect failed: {0}")]
    Connect(String),

    #[error("invalid relay address {url}: {reason}")]
    Address { url: String, reason: String },

    #[error("signaling channel closed")]
    ChannelClosed,

    #[error("no room joined")]
    NotJoined,

    #[error("signaling protocol violation: {0}")]
    Protocol(String),
}
