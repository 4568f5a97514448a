//! # Client Session
//!
//! State machine for one peer talking to one server.
//!
//! ```text
//! Disconnected --connect()--> SendingRequest --Challenge--> SendingChallengeResponse
//!       ^                                                            |
//!       |                                                   ConnectionAccepted
//!       |                                                            v
//!       +-------- Disconnect / disconnect() / timeout ---------- Connected
//! ```
//!
//! The request is broadcast because the server address is not known in advance.
//! The sender of the first valid Challenge becomes the server; datagrams from
//! any other address are ignored for the rest of the session.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, info, warn};

use super::{record_fault, transmit};
use crate::config::ClientConfig;
use crate::core::packet::{Packet, PublicKeyBytes, MAX_DATAGRAM_SIZE, MAX_GAME_DATA_SIZE};
use crate::core::sequence::sequence_greater_than;
use crate::core::session_key::SessionKey;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::handshake::{derive_session_key, generate_keypair, Keypair};
use crate::transport::udp::UdpTransport;
use crate::transport::Transport;
use crate::utils::metrics::Metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClientState {
    Disconnected = 0,
    SendingRequest = 1,
    SendingChallengeResponse = 2,
    Connected = 3,
}

impl ClientState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ClientState::SendingRequest,
            2 => ClientState::SendingChallengeResponse,
            3 => ClientState::Connected,
            _ => ClientState::Disconnected,
        }
    }

    /// Whether a handshake is underway
    pub fn is_handshaking(self) -> bool {
        matches!(
            self,
            ClientState::SendingRequest | ClientState::SendingChallengeResponse
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The server sent a Disconnect
    ServerClosed,
    /// Nothing heard from the server within the idle timeout
    IdleTimeout,
    /// The handshake did not complete in time
    HandshakeTimeout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Connected { client_id: u32 },
    Disconnected { reason: DisconnectReason },
    GameData { sequence: u16, payload: Bytes },
}

pub struct Client<T: Transport> {
    transport: T,
    config: ClientConfig,
    state: AtomicU8,
    keypair: Option<Keypair>,
    session_key: Option<SessionKey>,
    server_address: Option<SocketAddrV4>,
    client_id: Option<u32>,
    outbound_sequence: u16,
    inbound_sequence: u16,
    last_activity: Instant,
    metrics: Metrics,
}

impl Client<UdpTransport> {
    /// Bind the configured client port on all interfaces
    pub fn open(config: ClientConfig) -> Result<Self> {
        let transport = UdpTransport::open(config.client_port, Ipv4Addr::UNSPECIFIED)?;
        Self::new(transport, config)
    }
}

impl<T: Transport> Client<T> {
    /// Wrap `transport`, enabling broadcast on it for discovery
    pub fn new(transport: T, config: ClientConfig) -> Result<Self> {
        transport.enable_broadcast()?;
        Ok(Self {
            transport,
            config,
            state: AtomicU8::new(ClientState::Disconnected as u8),
            keypair: None,
            session_key: None,
            server_address: None,
            client_id: None,
            outbound_sequence: 0,
            inbound_sequence: 0,
            last_activity: Instant::now(),
            metrics: Metrics::new(),
        })
    }

    pub fn state(&self) -> ClientState {
        ClientState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ClientState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ClientState::Connected
    }

    /// Identifier assigned by the server, once connected
    pub fn client_id(&self) -> Option<u32> {
        self.client_id
    }

    pub fn server_address(&self) -> Option<SocketAddrV4> {
        self.server_address
    }

    pub fn session_key(&self) -> Option<&SessionKey> {
        self.session_key.as_ref()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Start a handshake with a fresh keypair.
    ///
    /// Returns `Ok(false)` without sending anything unless the client is
    /// `Disconnected`.
    pub fn connect(&mut self) -> Result<bool> {
        if self.state() != ClientState::Disconnected {
            debug!(state = ?self.state(), "Connect ignored");
            return Ok(false);
        }

        let keypair = generate_keypair();
        let request = Packet::ConnectionRequest {
            public_key: keypair.public_bytes(),
        }
        .encode_checksummed()?;
        let destination = SocketAddrV4::new(self.config.server_address, self.config.server_port);

        if let Err(e) = self.send(destination, &request) {
            warn!(%destination, error = %e, "Failed to send ConnectionRequest");
            return Err(e);
        }

        self.keypair = Some(keypair);
        self.last_activity = Instant::now();
        self.set_state(ClientState::SendingRequest);
        self.metrics.handshake_started();
        info!(%destination, "Sent ConnectionRequest");
        Ok(true)
    }

    /// Leave the session, notifying the server if a key exists.
    ///
    /// Returns false if the client was already disconnected.
    pub fn disconnect(&mut self) -> bool {
        if self.state() == ClientState::Disconnected {
            return false;
        }

        if let (Some(key), Some(server)) = (self.session_key.as_ref(), self.server_address) {
            match Packet::Disconnect.encode_authenticated(key) {
                Ok(datagram) => {
                    for _ in 0..self.config.disconnect_redundancy {
                        if let Err(e) = transmit(&self.transport, &self.metrics, server, &datagram) {
                            warn!(%server, error = %e, "Failed to send Disconnect");
                        }
                    }
                    info!(%server, copies = self.config.disconnect_redundancy, "Sent Disconnect");
                }
                Err(e) => warn!(error = %e, "Failed to encode Disconnect"),
            }
        }

        self.reset();
        true
    }

    /// Zero the key and forget the server
    fn reset(&mut self) {
        self.session_key = None;
        self.keypair = None;
        self.server_address = None;
        self.client_id = None;
        self.outbound_sequence = 0;
        self.inbound_sequence = 0;
        self.set_state(ClientState::Disconnected);
    }

    /// Send one game-state payload to the server.
    ///
    /// Returns `Ok(false)` unless connected.
    pub fn send_game_data(&mut self, payload: &[u8]) -> Result<bool> {
        if self.state() != ClientState::Connected {
            return Ok(false);
        }
        if payload.len() > MAX_GAME_DATA_SIZE {
            return Err(ProtocolError::PayloadTooLarge(payload.len()));
        }
        let (Some(key), Some(server)) = (self.session_key.as_ref(), self.server_address) else {
            return Ok(false);
        };

        self.outbound_sequence = self.outbound_sequence.wrapping_add(1);
        let datagram = Packet::ConnectionData {
            sequence: self.outbound_sequence,
            payload: Bytes::copy_from_slice(payload),
        }
        .encode_authenticated(key)?;
        transmit(&self.transport, &self.metrics, server, &datagram)?;
        Ok(true)
    }

    /// Receive and process at most one datagram, then check timeouts.
    ///
    /// # Errors
    /// Only `ProtocolError::SocketError`.
    pub fn poll(&mut self) -> Result<Vec<ClientEvent>> {
        let mut events = Vec::new();
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];

        if let Some((sender, len)) = self.transport.receive(&mut buf)? {
            match self.handle_datagram(sender, &buf[..len]) {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(ProtocolError::SocketError(e)) => return Err(ProtocolError::SocketError(e)),
                Err(e) => record_fault(&self.metrics, sender, &e),
            }
        }

        events.extend(self.check_timeouts(Instant::now()));
        Ok(events)
    }

    /// Process one datagram from `sender`
    pub fn handle_datagram(
        &mut self,
        sender: SocketAddrV4,
        datagram: &[u8],
    ) -> Result<Option<ClientEvent>> {
        self.metrics.datagram_received(datagram.len());

        if let Some(server) = self.server_address {
            if sender != server {
                return Err(ProtocolError::UnknownPeer(sender));
            }
        }

        let state = self.state();
        match state {
            ClientState::Disconnected => Err(ProtocolError::InvalidState),
            ClientState::SendingRequest => match Packet::decode_checksummed(datagram)? {
                Packet::Challenge { public_key } => self.handle_challenge(sender, public_key),
                _ => Err(ProtocolError::InvalidState),
            },
            ClientState::SendingChallengeResponse | ClientState::Connected => {
                let key = self.session_key.as_ref().ok_or(ProtocolError::InvalidState)?;
                let packet = Packet::decode_authenticated(datagram, key)?;
                self.last_activity = Instant::now();
                self.handle_authenticated(state, packet)
            }
        }
    }

    fn handle_challenge(
        &mut self,
        sender: SocketAddrV4,
        server_public: PublicKeyBytes,
    ) -> Result<Option<ClientEvent>> {
        let keypair = self
            .keypair
            .as_ref()
            .ok_or_else(|| ProtocolError::HandshakeFailed(constants::ERR_NO_KEYPAIR.into()))?;

        // A rejected key leaves the request open for the genuine Challenge
        let key = derive_session_key(keypair, &server_public).inspect_err(|_| {
            self.metrics.handshake_failed();
        })?;
        self.keypair = None;

        let response = Packet::ChallengeResponse.encode_authenticated(&key)?;
        self.session_key = Some(key);
        self.server_address = Some(sender);
        self.last_activity = Instant::now();
        self.set_state(ClientState::SendingChallengeResponse);

        self.send(sender, &response)?;
        info!(server = %sender, "Sent ChallengeResponse");
        Ok(None)
    }

    fn handle_authenticated(
        &mut self,
        state: ClientState,
        packet: Packet,
    ) -> Result<Option<ClientEvent>> {
        match (state, packet) {
            (ClientState::SendingChallengeResponse, Packet::ConnectionAccepted { client_id }) => {
                self.client_id = Some(client_id);
                self.set_state(ClientState::Connected);
                self.metrics.handshake_completed();
                info!(client_id, "Client is connected");
                Ok(Some(ClientEvent::Connected { client_id }))
            }
            (ClientState::Connected, Packet::ConnectionData { sequence, payload }) => {
                if !sequence_greater_than(sequence, self.inbound_sequence) {
                    return Err(ProtocolError::StaleSequence {
                        received: sequence,
                        last: self.inbound_sequence,
                    });
                }
                self.inbound_sequence = sequence;
                Ok(Some(ClientEvent::GameData { sequence, payload }))
            }
            (_, Packet::Disconnect) => {
                info!(server = ?self.server_address, "Server closed the session");
                self.reset();
                Ok(Some(ClientEvent::Disconnected {
                    reason: DisconnectReason::ServerClosed,
                }))
            }
            _ => Err(ProtocolError::InvalidState),
        }
    }

    /// Abandon a stalled handshake, or an idle session when `active_timeout` is set
    pub fn check_timeouts(&mut self, now: Instant) -> Option<ClientEvent> {
        let state = self.state();
        let idle = now.saturating_duration_since(self.last_activity);

        let reason = if state.is_handshaking() && idle > self.config.handshake_timeout {
            DisconnectReason::HandshakeTimeout
        } else if state == ClientState::Connected
            && self.config.active_timeout
            && idle > self.config.idle_timeout
        {
            DisconnectReason::IdleTimeout
        } else {
            return None;
        };

        warn!(?state, idle_ms = idle.as_millis() as u64, ?reason, "Client timed out");
        self.metrics.timeout();
        self.disconnect();
        Some(ClientEvent::Disconnected { reason })
    }

    fn send(&self, destination: SocketAddrV4, datagram: &[u8]) -> Result<()> {
        transmit(&self.transport, &self.metrics, destination, datagram)
    }
}

impl<T: Transport> fmt::Debug for Client<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state())
            .field("server_address", &self.server_address)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Drop for Client<T> {
    fn drop(&mut self) {
        self.disconnect();
    }
}
