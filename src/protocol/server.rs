//! # Server Session Table
//!
//! Fixed-capacity pools of pending challenges and live connections keyed by
//! peer address.
//!
//! ## Lifecycle per peer
//! ```text
//! Free --ConnectionRequest--> Challenged --ChallengeResponse--> Connected
//!                                  |                                |
//!                                  +----------Disconnect------------+--> Free
//! ```
//!
//! A peer is in at most one pool at a time. Promotion claims the connection slot
//! and vacates the challenge slot inside the same call.
//!
//! Connection slot 0 is reserved for the local player. It is populated at
//! construction, never matched by address, and never receives game data.
//!
//! ## Mode gating
//! | Packet            | Lobby | Game |
//! |-------------------|-------|------|
//! | ConnectionRequest | yes   | no   |
//! | ChallengeResponse | yes   | no   |
//! | ConnectionData    | no    | yes  |
//! | Disconnect        | yes   | yes  |

use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, info, warn};

use super::{record_fault, transmit};
use crate::config::{ServerConfig, MAX_CLIENTS};
use crate::core::packet::{
    peek_type, Packet, PacketType, PublicKeyBytes, MAX_DATAGRAM_SIZE, MAX_GAME_DATA_SIZE,
};
use crate::core::sequence::sequence_greater_than;
use crate::core::session_key::SessionKey;
use crate::error::{ProtocolError, Result};
use crate::protocol::handshake::{generate_keypair, KeyDerivation};
use crate::protocol::slots::SlotPool;
use crate::transport::udp::UdpTransport;
use crate::transport::Transport;
use crate::utils::metrics::Metrics;

/// Connection slot reserved for the local player
pub const LOCAL_SLOT: usize = 0;

/// Which packet types the server accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerMode {
    Lobby,
    Game,
}

/// Something the application should know about after a `poll`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    Connected {
        client_id: usize,
        address: SocketAddrV4,
    },
    /// The peer sent a Disconnect
    Disconnected {
        client_id: usize,
        address: SocketAddrV4,
    },
    /// Expired by the timeout sweep; `client_id` is `None` for a pending challenge
    TimedOut {
        client_id: Option<usize>,
        address: SocketAddrV4,
    },
    GameData {
        client_id: usize,
        sequence: u16,
        payload: Bytes,
    },
}

/// Invoked with the slot index of every newly connected client
pub type ConnectCallback = Box<dyn FnMut(usize) + Send>;

#[derive(Debug)]
struct Challenge {
    address: SocketAddrV4,
    client_public: PublicKeyBytes,
    server_public: PublicKeyBytes,
    derivation: KeyDerivation,
    last_activity: Instant,
}

/// One established session
#[derive(Debug)]
pub struct Connection {
    address: SocketAddrV4,
    key: SessionKey,
    outbound_sequence: u16,
    inbound_sequence: u16,
    last_activity: Instant,
}

impl Connection {
    fn new(address: SocketAddrV4, key: SessionKey, now: Instant) -> Self {
        Self {
            address,
            key,
            outbound_sequence: 0,
            inbound_sequence: 0,
            last_activity: now,
        }
    }

    pub fn address(&self) -> SocketAddrV4 {
        self.address
    }

    /// Key authenticating this session's traffic
    pub fn session_key(&self) -> &SessionKey {
        &self.key
    }

    /// Sequence of the last ConnectionData sent to this peer
    pub fn outbound_sequence(&self) -> u16 {
        self.outbound_sequence
    }

    /// Highest sequence accepted from this peer
    pub fn last_inbound_sequence(&self) -> u16 {
        self.inbound_sequence
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    fn next_sequence(&mut self) -> u16 {
        self.outbound_sequence = self.outbound_sequence.wrapping_add(1);
        self.outbound_sequence
    }
}

/// Session table for up to `N` connections, slot 0 included
pub struct Server<T: Transport, const N: usize = MAX_CLIENTS> {
    transport: T,
    config: ServerConfig,
    mode: ServerMode,
    challenges: SlotPool<Challenge, N>,
    connections: SlotPool<Connection, N>,
    on_connect: Option<ConnectCallback>,
    metrics: Metrics,
}

impl Server<UdpTransport> {
    /// Bind the configured UDP port and build a server on it
    pub fn open(config: ServerConfig) -> Result<Self> {
        let transport = UdpTransport::open(config.port, config.bind_address)?;
        Ok(Self::new(transport, config))
    }
}

impl<T: Transport> Server<T> {
    pub fn new(transport: T, config: ServerConfig) -> Self {
        Self::with_slots(transport, config)
    }
}

impl<T: Transport, const N: usize> Server<T, N> {
    /// Build a server with `N` slots per pool
    pub fn with_slots(transport: T, config: ServerConfig) -> Self {
        let mut connections = SlotPool::new();
        let local = SocketAddrV4::new(Ipv4Addr::LOCALHOST, config.port);
        connections.insert_at(
            LOCAL_SLOT,
            Connection::new(local, SessionKey::zeroed(), Instant::now()),
        );
        info!(port = config.port, slots = N, "Server session table ready");

        Self {
            transport,
            config,
            mode: ServerMode::Lobby,
            challenges: SlotPool::new(),
            connections,
            on_connect: None,
            metrics: Metrics::new(),
        }
    }

    pub fn mode(&self) -> ServerMode {
        self.mode
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Occupied connection slots, the local slot included
    pub fn connected_client_count(&self) -> usize {
        self.connections.occupied()
    }

    pub fn pending_challenge_count(&self) -> usize {
        self.challenges.occupied()
    }

    pub fn is_client_connected(&self, client_id: usize) -> bool {
        self.connections.get(client_id).is_some()
    }

    pub fn connection(&self, client_id: usize) -> Option<&Connection> {
        self.connections.get(client_id)
    }

    /// Slot of the remote peer at `address`; never the local slot
    pub fn connection_index(&self, address: SocketAddrV4) -> Option<usize> {
        self.connections
            .iter()
            .find(|(index, connection)| *index != LOCAL_SLOT && connection.address == address)
            .map(|(index, _)| index)
    }

    pub fn has_challenge(&self, address: SocketAddrV4) -> bool {
        self.challenge_index(address).is_some()
    }

    fn challenge_index(&self, address: SocketAddrV4) -> Option<usize> {
        self.challenges.find(|challenge| challenge.address == address)
    }

    /// Register the connect notification, replacing any earlier one
    pub fn on_client_connected<F>(&mut self, callback: F)
    where
        F: FnMut(usize) + Send + 'static,
    {
        self.on_connect = Some(Box::new(callback));
    }

    pub fn switch_to_lobby(&mut self) {
        self.mode = ServerMode::Lobby;
        info!("Server switched to lobby mode");
    }

    /// Enter Game mode and restart every connection's idle clock
    pub fn switch_to_game(&mut self) {
        self.mode = ServerMode::Game;
        let now = Instant::now();
        for (_, connection) in self.connections.iter_mut() {
            connection.last_activity = now;
        }
        info!("Server switched to game mode");
    }

    /// Receive and process at most one datagram, then sweep timeouts.
    ///
    /// Per-datagram faults are logged, counted, and swallowed.
    ///
    /// # Errors
    /// Only `ProtocolError::SocketError`.
    pub fn poll(&mut self) -> Result<Vec<ServerEvent>> {
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

        if self.config.timeout_sweep {
            events.extend(self.expire_stale(Instant::now()));
        }
        Ok(events)
    }

    /// Process one datagram from `sender`.
    ///
    /// Every rejection is reported as an error; `poll` treats them as drops.
    pub fn handle_datagram(
        &mut self,
        sender: SocketAddrV4,
        datagram: &[u8],
    ) -> Result<Option<ServerEvent>> {
        self.metrics.datagram_received(datagram.len());

        if let Some(index) = self.connection_index(sender) {
            return self.handle_connected(index, datagram);
        }
        if let Some(index) = self.challenge_index(sender) {
            return self.handle_challenged(index, sender, datagram);
        }

        match peek_type(datagram) {
            Some(packet_type) if packet_type.is_authenticated() => {
                Err(ProtocolError::UnknownPeer(sender))
            }
            _ => match Packet::decode_checksummed(datagram)? {
                Packet::ConnectionRequest { public_key } => self.handle_request(sender, public_key),
                _ => Err(ProtocolError::InvalidState),
            },
        }
    }

    fn handle_request(
        &mut self,
        sender: SocketAddrV4,
        client_public: PublicKeyBytes,
    ) -> Result<Option<ServerEvent>> {
        if self.mode != ServerMode::Lobby {
            return Err(ProtocolError::ModeGated);
        }

        let now = Instant::now();
        let server_public = match self.challenge_index(sender) {
            Some(index) => self.restart_challenge(index, client_public, now)?,
            None => {
                if !self.connections.has_free() || !self.challenges.has_free() {
                    return Err(ProtocolError::SlotsExhausted);
                }
                let keypair = generate_keypair();
                let server_public = keypair.public_bytes();
                let derivation = KeyDerivation::spawn(keypair, client_public)?;
                let index = self.challenges.claim(Challenge {
                    address: sender,
                    client_public,
                    server_public,
                    derivation,
                    last_activity: now,
                })?;
                self.metrics.handshake_started();
                debug!(peer = %sender, slot = index, "Challenge slot allocated");
                server_public
            }
        };

        let challenge = Packet::Challenge {
            public_key: server_public,
        }
        .encode_checksummed()?;
        self.send(sender, &challenge)?;
        debug!(peer = %sender, "Sent Challenge");
        Ok(None)
    }

    /// A repeated request with the same client key re-sends the same challenge;
    /// a new client key starts a fresh exchange in the same slot.
    fn restart_challenge(
        &mut self,
        index: usize,
        client_public: PublicKeyBytes,
        now: Instant,
    ) -> Result<PublicKeyBytes> {
        let challenge = self
            .challenges
            .get_mut(index)
            .ok_or(ProtocolError::InvalidState)?;
        challenge.last_activity = now;
        if challenge.client_public == client_public {
            return Ok(challenge.server_public);
        }

        let keypair = generate_keypair();
        let server_public = keypair.public_bytes();
        challenge.derivation = KeyDerivation::spawn(keypair, client_public)?;
        challenge.client_public = client_public;
        challenge.server_public = server_public;
        self.metrics.handshake_started();
        debug!(peer = %challenge.address, slot = index, "Challenge restarted");
        Ok(server_public)
    }

    fn handle_challenged(
        &mut self,
        index: usize,
        sender: SocketAddrV4,
        datagram: &[u8],
    ) -> Result<Option<ServerEvent>> {
        if peek_type(datagram) == Some(PacketType::ConnectionRequest) {
            return match Packet::decode_checksummed(datagram)? {
                Packet::ConnectionRequest { public_key } => self.handle_request(sender, public_key),
                _ => Err(ProtocolError::InvalidState),
            };
        }

        let key = self.resolve_challenge_key(index)?;
        match Packet::decode_authenticated(datagram, &key)? {
            Packet::ChallengeResponse => self.promote(index, key),
            Packet::Disconnect => {
                self.challenges.release(index);
                debug!(peer = %sender, slot = index, "Challenge abandoned by peer");
                Ok(None)
            }
            _ => Err(ProtocolError::InvalidState),
        }
    }

    /// Join the slot's derivation; a failed derivation frees the slot
    fn resolve_challenge_key(&mut self, index: usize) -> Result<SessionKey> {
        let challenge = self
            .challenges
            .get_mut(index)
            .ok_or(ProtocolError::InvalidState)?;
        let address = challenge.address;
        let outcome = challenge.derivation.resolve().cloned();

        outcome.map_err(|e| {
            self.challenges.release(index);
            self.metrics.handshake_failed();
            warn!(peer = %address, error = %e, "Key derivation failed, challenge dropped");
            e
        })
    }

    fn promote(&mut self, challenge_index: usize, key: SessionKey) -> Result<Option<ServerEvent>> {
        if self.mode != ServerMode::Lobby {
            return Err(ProtocolError::ModeGated);
        }

        let address = self
            .challenges
            .get(challenge_index)
            .map(|challenge| challenge.address)
            .ok_or(ProtocolError::InvalidState)?;
        let accepted = key.clone();
        let client_id = self
            .connections
            .claim(Connection::new(address, key, Instant::now()))?;
        self.challenges.release(challenge_index);
        self.metrics.handshake_completed();

        if let Some(callback) = self.on_connect.as_mut() {
            callback(client_id);
        }

        let datagram = Packet::ConnectionAccepted {
            client_id: client_id as u32,
        }
        .encode_authenticated(&accepted)?;
        if let Err(e) = self.send(address, &datagram) {
            warn!(peer = %address, client_id, error = %e, "Failed to send ConnectionAccepted");
        }

        info!(peer = %address, client_id, "Client connected");
        Ok(Some(ServerEvent::Connected { client_id, address }))
    }

    fn handle_connected(&mut self, index: usize, datagram: &[u8]) -> Result<Option<ServerEvent>> {
        let mode = self.mode;
        let connection = self
            .connections
            .get_mut(index)
            .ok_or(ProtocolError::InvalidState)?;
        let packet = Packet::decode_authenticated(datagram, &connection.key)?;
        connection.last_activity = Instant::now();

        match packet {
            Packet::ConnectionData { sequence, payload } => {
                if mode != ServerMode::Game {
                    return Err(ProtocolError::ModeGated);
                }
                if !sequence_greater_than(sequence, connection.inbound_sequence) {
                    return Err(ProtocolError::StaleSequence {
                        received: sequence,
                        last: connection.inbound_sequence,
                    });
                }
                connection.inbound_sequence = sequence;
                Ok(Some(ServerEvent::GameData {
                    client_id: index,
                    sequence,
                    payload,
                }))
            }
            Packet::Disconnect => {
                let address = connection.address;
                self.connections.release(index);
                info!(peer = %address, client_id = index, "Client disconnected");
                Ok(Some(ServerEvent::Disconnected {
                    client_id: index,
                    address,
                }))
            }
            _ => Err(ProtocolError::InvalidState),
        }
    }

    /// Send `payload` to every remote connection under its own key and sequence.
    ///
    /// Returns how many peers it went to. Send failures are logged per peer.
    pub fn broadcast_game_data(&mut self, payload: &[u8]) -> Result<usize> {
        if payload.len() > MAX_GAME_DATA_SIZE {
            return Err(ProtocolError::PayloadTooLarge(payload.len()));
        }

        let payload = Bytes::copy_from_slice(payload);
        let mut recipients = 0;
        for (index, connection) in self.connections.iter_mut() {
            if index == LOCAL_SLOT {
                continue;
            }
            let sequence = connection.next_sequence();
            let datagram = Packet::ConnectionData {
                sequence,
                payload: payload.clone(),
            }
            .encode_authenticated(&connection.key)?;

            match transmit(&self.transport, &self.metrics, connection.address, &datagram) {
                Ok(()) => recipients += 1,
                Err(e) => {
                    warn!(peer = %connection.address, client_id = index, error = %e, "Failed to send game data");
                }
            }
        }
        Ok(recipients)
    }

    /// Kick whichever peer holds `address`. Returns false if none does.
    pub fn kick(&mut self, address: SocketAddrV4) -> bool {
        if let Some(index) = self.connection_index(address) {
            self.kick_connection(index);
            true
        } else if let Some(index) = self.challenge_index(address) {
            self.kick_challenge(index);
            true
        } else {
            false
        }
    }

    /// Kick a remote client by slot. The local slot cannot be kicked.
    pub fn kick_client(&mut self, client_id: usize) -> bool {
        if client_id == LOCAL_SLOT || !self.is_client_connected(client_id) {
            return false;
        }
        self.kick_connection(client_id);
        true
    }

    /// Kick every remote connection and pending challenge
    pub fn kick_all(&mut self) {
        let connected: Vec<usize> = self
            .connections
            .iter()
            .map(|(index, _)| index)
            .filter(|index| *index != LOCAL_SLOT)
            .collect();
        for index in connected {
            self.kick_connection(index);
        }

        let challenged: Vec<usize> = self.challenges.iter().map(|(index, _)| index).collect();
        for index in challenged {
            self.kick_challenge(index);
        }
    }

    fn kick_connection(&mut self, index: usize) {
        if let Some(connection) = self.connections.release(index) {
            self.send_disconnect(connection.address, &connection.key);
            info!(peer = %connection.address, client_id = index, "Client kicked");
        }
    }

    fn kick_challenge(&mut self, index: usize) {
        if let Some(mut challenge) = self.challenges.release(index) {
            // Without a key the Disconnect cannot verify; send it anyway.
            let key = challenge
                .derivation
                .resolve()
                .cloned()
                .unwrap_or_else(|_| SessionKey::zeroed());
            self.send_disconnect(challenge.address, &key);
            debug!(peer = %challenge.address, slot = index, "Challenge kicked");
        }
    }

    fn send_disconnect(&self, address: SocketAddrV4, key: &SessionKey) {
        let datagram = match Packet::Disconnect.encode_authenticated(key) {
            Ok(datagram) => datagram,
            Err(e) => {
                warn!(peer = %address, error = %e, "Failed to encode Disconnect");
                return;
            }
        };
        for _ in 0..self.config.disconnect_redundancy {
            if let Err(e) = self.send(address, &datagram) {
                warn!(peer = %address, error = %e, "Failed to send Disconnect");
            }
        }
        debug!(peer = %address, copies = self.config.disconnect_redundancy, "Sent Disconnect");
    }

    /// Kick challenges idle past `challenge_timeout` and, in Game mode,
    /// connections idle past `connection_timeout`.
    pub fn expire_stale(&mut self, now: Instant) -> Vec<ServerEvent> {
        let mut events = Vec::new();

        let challenge_timeout = self.config.challenge_timeout;
        let stale: Vec<(usize, SocketAddrV4)> = self
            .challenges
            .iter()
            .filter(|(_, c)| now.saturating_duration_since(c.last_activity) > challenge_timeout)
            .map(|(index, c)| (index, c.address))
            .collect();
        for (index, address) in stale {
            self.kick_challenge(index);
            self.metrics.timeout();
            warn!(peer = %address, "Challenge timed out");
            events.push(ServerEvent::TimedOut {
                client_id: None,
                address,
            });
        }

        if self.mode == ServerMode::Game {
            let connection_timeout = self.config.connection_timeout;
            let stale: Vec<(usize, SocketAddrV4)> = self
                .connections
                .iter()
                .filter(|(index, c)| {
                    *index != LOCAL_SLOT
                        && now.saturating_duration_since(c.last_activity) > connection_timeout
                })
                .map(|(index, c)| (index, c.address))
                .collect();
            for (index, address) in stale {
                self.kick_connection(index);
                self.metrics.timeout();
                warn!(peer = %address, client_id = index, "Connection timed out");
                events.push(ServerEvent::TimedOut {
                    client_id: Some(index),
                    address,
                });
            }
        }

        events
    }

    fn send(&self, destination: SocketAddrV4, datagram: &[u8]) -> Result<()> {
        transmit(&self.transport, &self.metrics, destination, datagram)
    }
}

impl<T: Transport, const N: usize> fmt::Debug for Server<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("mode", &self.mode)
            .field("connections", &self.connections.occupied())
            .field("challenges", &self.challenges.occupied())
            .finish_non_exhaustive()
    }
}

impl<T: Transport, const N: usize> Drop for Server<T, N> {
    fn drop(&mut self) {
        self.kick_all();
    }
}
