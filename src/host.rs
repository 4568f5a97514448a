//! # Host Adaptors
//!
//! Integer and boolean return conventions for engines that embed the protocol
//! through a thin binding layer.
//!
//! `*_listen` polls once and copies at most one game-data payload into `out`:
//! - `> 0`: bytes written
//! - `0`: nothing new this call
//! - `-1`: `out` too small; the payload is dropped
//!
//! The server output is prefixed with the sending client's slot index as a
//! big-endian `u32`.

use tracing::{error, warn};

use crate::protocol::client::{Client, ClientEvent};
use crate::protocol::server::{Server, ServerEvent};
use crate::transport::Transport;

pub const LISTEN_NOTHING: i32 = 0;
pub const LISTEN_BUFFER_TOO_SMALL: i32 = -1;

const CLIENT_ID_PREFIX: usize = 4;

pub fn client_listen<T: Transport>(client: &mut Client<T>, out: &mut [u8]) -> i32 {
    let events = match client.poll() {
        Ok(events) => events,
        Err(e) => {
            error!(error = %e, "Client listen failed");
            return LISTEN_NOTHING;
        }
    };

    for event in events {
        if let ClientEvent::GameData { payload, .. } = event {
            if out.len() < payload.len() {
                warn!(needed = payload.len(), capacity = out.len(), "Buffer too small for game data");
                return LISTEN_BUFFER_TOO_SMALL;
            }
            out[..payload.len()].copy_from_slice(&payload);
            return payload.len() as i32;
        }
    }
    LISTEN_NOTHING
}

pub fn server_listen<T: Transport, const N: usize>(server: &mut Server<T, N>, out: &mut [u8]) -> i32 {
    let events = match server.poll() {
        Ok(events) => events,
        Err(e) => {
            error!(error = %e, "Server listen failed");
            return LISTEN_NOTHING;
        }
    };

    for event in events {
        if let ServerEvent::GameData {
            client_id, payload, ..
        } = event
        {
            let written = CLIENT_ID_PREFIX + payload.len();
            if out.len() < written {
                warn!(needed = written, capacity = out.len(), "Buffer too small for game data");
                return LISTEN_BUFFER_TOO_SMALL;
            }
            out[..CLIENT_ID_PREFIX].copy_from_slice(&(client_id as u32).to_be_bytes());
            out[CLIENT_ID_PREFIX..written].copy_from_slice(&payload);
            return written as i32;
        }
    }
    LISTEN_NOTHING
}

/// `false` when not connected or the send failed
pub fn client_send_game_data<T: Transport>(client: &mut Client<T>, payload: &[u8]) -> bool {
    client.send_game_data(payload).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to send game data");
        false
    })
}

/// `false` when the payload was rejected; per-peer send failures are only logged
pub fn server_propagate_game_data<T: Transport, const N: usize>(
    server: &mut Server<T, N>,
    payload: &[u8],
) -> bool {
    match server.broadcast_game_data(payload) {
        Ok(_) => true,
        Err(e) => {
            warn!(error = %e, "Failed to propagate game data");
            false
        }
    }
}
