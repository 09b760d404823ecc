//! Peer wire protocol: the fixed handshake, length-prefixed message framing,
//! and the per-connection bitfield and connection state machine.
use thiserror::Error;

pub mod bitfield;
pub mod connection;
pub mod handshake;
pub mod message;

pub use bitfield::Bitfield;
pub use connection::Connection;
pub use message::Message;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation timed out")]
    Timeout,

    #[error("handshake info_hash mismatch")]
    HandshakeMismatch,

    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl From<tokio::time::error::Elapsed> for PeerError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        PeerError::Timeout
    }
}
