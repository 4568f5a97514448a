//! End-to-end session scenarios over the in-memory network

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use gamelink_protocol::config::{ClientConfig, ServerConfig, DISCONNECT_REDUNDANCY};
use gamelink_protocol::core::packet::{peek_type, Packet, PacketType};
use gamelink_protocol::protocol::handshake::{derive_session_key, generate_keypair};
use gamelink_protocol::protocol::{Client, ClientEvent, Server, ServerEvent, ServerMode};
use gamelink_protocol::transport::mock::{MemoryNetwork, MemoryTransport};

const SERVER: &str = "10.0.0.1:8755";

fn addr(s: &str) -> SocketAddrV4 {
    s.parse().expect("valid address")
}

fn client_addr(n: u8) -> SocketAddrV4 {
    SocketAddrV4::new([10, 0, 0, 10 + n].into(), 40_000)
}

fn new_client(network: &MemoryNetwork, address: SocketAddrV4) -> Client<MemoryTransport> {
    Client::new(network.endpoint(address), ClientConfig::default()).expect("Client should open")
}

/// Drive both sides until the handshake settles
fn connect<const N: usize>(server: &mut Server<MemoryTransport, N>, client: &mut Client<MemoryTransport>) {
    client.connect().expect("Request should send");
    for _ in 0..4 {
        server.poll().unwrap();
        client.poll().unwrap();
    }
}

// ============================================================================
// HANDSHAKE
// ============================================================================

#[test]
fn test_independent_derivations_agree() {
    let client_pair = generate_keypair();
    let server_pair = generate_keypair();
    let client_public = client_pair.public_bytes();
    let server_public = server_pair.public_bytes();

    let client_key = derive_session_key(&client_pair, &server_public).unwrap();
    let server_key = derive_session_key(&server_pair, &client_public).unwrap();
    assert_eq!(client_key.as_bytes(), server_key.as_bytes());

    let response = Packet::ChallengeResponse.encode_authenticated(&client_key).unwrap();
    assert_eq!(
        Packet::decode_authenticated(&response, &server_key).unwrap(),
        Packet::ChallengeResponse
    );
}

#[test]
fn test_session_keys_match_after_handshake() {
    let network = MemoryNetwork::new();
    let mut server: Server<MemoryTransport> =
        Server::new(network.endpoint(addr(SERVER)), ServerConfig::default());
    let mut client = new_client(&network, client_addr(1));

    connect(&mut server, &mut client);

    assert!(client.is_connected());
    assert_eq!(client.client_id(), Some(1));
    let server_key = server.connection(1).expect("slot 1").session_key();
    assert_eq!(client.session_key(), Some(server_key));
    assert_eq!(server.metrics().snapshot().handshakes_completed, 1);
}

// ============================================================================
// CAPACITY
// ============================================================================

#[test]
fn test_fifth_request_rejected_when_slots_full() {
    let network = MemoryNetwork::new();
    // Local slot plus four remote slots
    let mut server: Server<MemoryTransport, 5> =
        Server::with_slots(network.endpoint(addr(SERVER)), ServerConfig::default());
    let connected = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&connected);
    server.on_client_connected(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let mut clients: Vec<_> = (1..=4).map(|n| new_client(&network, client_addr(n))).collect();
    for client in &mut clients {
        connect(&mut server, client);
        assert!(client.is_connected());
    }
    assert_eq!(server.connected_client_count(), 5);
    assert_eq!(connected.load(Ordering::SeqCst), 4);

    let mut fifth = new_client(&network, client_addr(5));
    fifth.connect().unwrap();
    assert!(server.poll().unwrap().is_empty());

    assert!(!server.has_challenge(client_addr(5)));
    assert_eq!(network.pending(client_addr(5)), 0);
    assert_eq!(server.metrics().snapshot().slots_exhausted, 1);
    for (n, client) in clients.iter_mut().enumerate() {
        assert!(client.poll().unwrap().is_empty());
        assert!(client.is_connected());
        assert!(server.is_client_connected(n + 1));
    }
}

// ============================================================================
// FRESHNESS
// ============================================================================

#[test]
fn test_only_newer_sequences_delivered() {
    let network = MemoryNetwork::new();
    let mut server: Server<MemoryTransport> =
        Server::new(network.endpoint(addr(SERVER)), ServerConfig::default());
    let mut client = new_client(&network, client_addr(1));
    connect(&mut server, &mut client);
    server.switch_to_game();

    for _ in 0..10 {
        assert!(client.send_game_data(b"tick").unwrap());
        assert_eq!(server.poll().unwrap().len(), 1);
    }
    assert_eq!(server.connection(1).unwrap().last_inbound_sequence(), 10);

    let key = client.session_key().unwrap().clone();
    let data = |sequence: u16| {
        Packet::ConnectionData {
            sequence,
            payload: Bytes::from_static(b"replay"),
        }
        .encode_authenticated(&key)
        .unwrap()
    };

    for stale in [9, 10] {
        network.inject(client_addr(1), addr(SERVER), &data(stale));
        assert!(server.poll().unwrap().is_empty(), "sequence {stale} should be dropped");
    }
    assert_eq!(server.metrics().snapshot().dropped_stale, 2);

    network.inject(client_addr(1), addr(SERVER), &data(11));
    assert_eq!(
        server.poll().unwrap(),
        vec![ServerEvent::GameData {
            client_id: 1,
            sequence: 11,
            payload: Bytes::from_static(b"replay"),
        }]
    );
    assert_eq!(server.connection(1).unwrap().last_inbound_sequence(), 11);
}

#[test]
fn test_client_drops_stale_server_data() {
    let network = MemoryNetwork::new();
    let mut server: Server<MemoryTransport> =
        Server::new(network.endpoint(addr(SERVER)), ServerConfig::default());
    let mut client = new_client(&network, client_addr(1));
    connect(&mut server, &mut client);
    server.switch_to_game();

    server.broadcast_game_data(b"one").unwrap();
    server.broadcast_game_data(b"two").unwrap();
    let captured = network.captured_from(addr(SERVER));
    let first = captured
        .iter()
        .find(|d| peek_type(&d.bytes) == Some(PacketType::ConnectionData))
        .unwrap()
        .bytes
        .clone();

    assert_eq!(client.poll().unwrap().len(), 1);
    assert_eq!(client.poll().unwrap().len(), 1);
    network.inject(addr(SERVER), client_addr(1), &first);
    assert!(client.poll().unwrap().is_empty());
    assert_eq!(client.metrics().snapshot().dropped_stale, 1);
}

// ============================================================================
// DISCONNECT
// ============================================================================

#[test]
fn test_single_surviving_disconnect_frees_slot_once() {
    let network = MemoryNetwork::new();
    let mut server: Server<MemoryTransport> =
        Server::new(network.endpoint(addr(SERVER)), ServerConfig::default());
    let mut client = new_client(&network, client_addr(1));
    connect(&mut server, &mut client);

    let mut seen = 0;
    network.set_drop_rule(move |datagram| {
        if peek_type(&datagram.bytes) != Some(PacketType::Disconnect) {
            return false;
        }
        seen += 1;
        seen < DISCONNECT_REDUNDANCY
    });
    assert!(client.disconnect());
    assert_eq!(network.pending(addr(SERVER)), 1);

    let events = server.poll().unwrap();
    assert_eq!(
        events,
        vec![ServerEvent::Disconnected {
            client_id: 1,
            address: client_addr(1),
        }]
    );
    assert!(!server.is_client_connected(1));
    assert_eq!(server.connected_client_count(), 1);

    // A late copy finds no slot
    let late = network
        .captured_from(client_addr(1))
        .into_iter()
        .find(|d| d.dropped)
        .unwrap();
    network.inject(client_addr(1), addr(SERVER), &late.bytes);
    assert!(server.poll().unwrap().is_empty());
    assert_eq!(server.connected_client_count(), 1);
    assert_eq!(server.metrics().snapshot().dropped_unknown_peer, 1);
}

#[test]
fn test_server_kick_reaches_client() {
    let network = MemoryNetwork::new();
    let mut server: Server<MemoryTransport> =
        Server::new(network.endpoint(addr(SERVER)), ServerConfig::default());
    let mut client = new_client(&network, client_addr(1));
    connect(&mut server, &mut client);

    assert!(server.kick_client(1));
    assert!(!server.kick_client(1));
    assert_eq!(
        client.poll().unwrap(),
        vec![ClientEvent::Disconnected {
            reason: gamelink_protocol::protocol::DisconnectReason::ServerClosed,
        }]
    );
    assert!(!client.is_connected());
}

// ============================================================================
// MODE GATING
// ============================================================================

#[test]
fn test_mode_gating() {
    let network = MemoryNetwork::new();
    let mut server: Server<MemoryTransport> =
        Server::new(network.endpoint(addr(SERVER)), ServerConfig::default());
    let mut client = new_client(&network, client_addr(1));
    connect(&mut server, &mut client);
    assert_eq!(server.mode(), ServerMode::Lobby);

    // Game data in Lobby
    assert!(client.send_game_data(b"early").unwrap());
    assert!(server.poll().unwrap().is_empty());
    assert_eq!(server.metrics().snapshot().dropped_gated, 1);

    // Connection request in Game
    server.switch_to_game();
    let mut late = new_client(&network, client_addr(2));
    late.connect().unwrap();
    assert!(server.poll().unwrap().is_empty());
    assert!(!server.has_challenge(client_addr(2)));
    assert_eq!(server.pending_challenge_count(), 0);
    assert_eq!(server.metrics().snapshot().dropped_gated, 2);

    // The same data is accepted once in Game
    assert!(client.send_game_data(b"now").unwrap());
    assert!(matches!(
        server.poll().unwrap().as_slice(),
        [ServerEvent::GameData { client_id: 1, .. }]
    ));
}
