//! # Error Types
//!
//! Error handling for the protocol core.
//!
//! Nearly every variant describes a per-datagram fault. UDP guarantees neither
//! integrity nor origin, so these are expected in normal operation: the session
//! layer logs them, counts them, and drops the offending packet. Only
//! [`ProtocolError::SocketError`] is reported back out of a `poll` call.
//!
//! ## Error Categories
//! - **Framing**: buffer overflow, malformed layouts, oversized payloads
//! - **Integrity**: checksum or HMAC mismatch, foreign protocol identifier
//! - **Session**: exhausted slot pools, unknown peers, stale sequences, invalid state, mode gating
//! - **Handshake**: key-derivation failures
//! - **Environment**: socket and configuration failures
//!
//! ## Example Usage
//! ```rust
//! use gamelink_protocol::core::buffer::WireBuffer;
//! use gamelink_protocol::error::ProtocolError;
//!
//! let mut buffer = WireBuffer::new(2);
//! match buffer.write_u32(7) {
//!     Err(ProtocolError::BufferOverflow { requested, remaining }) => {
//!         assert_eq!((requested, remaining), (4, 2));
//!     }
//!     other => panic!("unexpected: {other:?}"),
//! }
//! ```

use std::io;
use std::net::SocketAddrV4;
use thiserror::Error;

/// Static diagnostic strings, borrowed on the error path instead of formatted.
pub mod constants {
    /// Handshake errors
    pub const ERR_NON_CONTRIBUTORY: &str = "Peer public key produced a non-contributory shared secret";
    pub const ERR_DERIVATION_PANICKED: &str = "Key derivation task panicked";
    pub const ERR_DERIVATION_SPAWN: &str = "Failed to spawn key derivation task";
    pub const ERR_NO_KEYPAIR: &str = "No ephemeral keypair for this handshake";

    /// Packet layout errors
    pub const ERR_UNKNOWN_TYPE: &str = "Unknown packet type tag";
    pub const ERR_TRAILING_BYTES: &str = "Trailing bytes after packet body";
    pub const ERR_WRONG_TIER: &str = "Packet type not valid for this integrity tier";
    pub const ERR_TOO_SHORT: &str = "Datagram shorter than the smallest packet";
    pub const ERR_MISSING_KEY: &str = "Authenticated packet requires a session key";

    /// Transport errors
    pub const ERR_TRANSPORT_CLOSED: &str = "Transport endpoint is closed";
}

/// Primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Buffer overflow: requested {requested} bytes, {remaining} remaining")]
    BufferOverflow { requested: usize, remaining: usize },

    #[error("Invalid protocol identifier: {0:#010x}")]
    InvalidProtocolId(u32),

    #[error("Integrity check failed")]
    IntegrityCheckFailed,

    #[error("Malformed packet: {0}")]
    MalformedPacket(&'static str),

    #[error("No free slot available")]
    SlotsExhausted,

    #[error("Unknown peer: {0}")]
    UnknownPeer(SocketAddrV4),

    #[error("Stale sequence {received} (last accepted {last})")]
    StaleSequence { received: u16, last: u16 },

    #[error("Operation not permitted in the current state")]
    InvalidState,

    #[error("Packet type not accepted in the current server mode")]
    ModeGated,

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Socket error: {0}")]
    SocketError(#[from] io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ProtocolError {
    /// Whether this fault concerns a single datagram and is handled by dropping it.
    pub fn is_packet_fault(&self) -> bool {
        !matches!(
            self,
            ProtocolError::SocketError(_) | ProtocolError::ConfigError(_)
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
