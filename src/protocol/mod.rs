//! # Protocol Layer
//!
//! Session state machines built on the packet codec.
//!
//! ## Components
//! - **Handshake**: X25519 key exchange and SHA-256 session-key derivation
//! - **Slots**: fixed-capacity arena backing the server pools
//! - **Client**: connect, challenge response, data, disconnect for one peer
//! - **Server**: challenge and connection pools, mode gating, fan-out, timeouts
//!
//! Both roles are driven by calling `poll()` from a single thread. Each call
//! handles at most one datagram and never blocks on the socket.

pub mod client;
pub mod handshake;
pub mod server;
pub mod slots;

#[cfg(test)]
mod tests;

use std::net::SocketAddrV4;

use tracing::{debug, warn};

use crate::error::{ProtocolError, Result};
use crate::transport::Transport;
use crate::utils::metrics::{DropReason, Metrics};

pub use client::{Client, ClientEvent, ClientState, DisconnectReason};
pub use server::{Server, ServerEvent, ServerMode, LOCAL_SLOT};

/// Send one datagram and count it
pub(crate) fn transmit<T: Transport>(
    transport: &T,
    metrics: &Metrics,
    destination: SocketAddrV4,
    datagram: &[u8],
) -> Result<()> {
    transport.send(destination, datagram)?;
    metrics.datagram_sent(datagram.len());
    Ok(())
}

/// Log and count a datagram rejected by `handle_datagram`
pub(crate) fn record_fault(metrics: &Metrics, peer: SocketAddrV4, error: &ProtocolError) {
    match DropReason::classify(error) {
        Some(reason) => {
            metrics.dropped(reason);
            debug!(%peer, ?reason, error = %error, "Datagram dropped");
        }
        None if matches!(error, ProtocolError::SlotsExhausted) => {
            metrics.slot_exhausted();
            warn!(%peer, "No free slot, connection denied");
        }
        None => warn!(%peer, error = %error, "Datagram rejected"),
    }
}
