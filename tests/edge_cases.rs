#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Edge-case tests: malformed input, boundary sizes, hostile peers

use std::net::SocketAddrV4;
use std::time::{Duration, Instant};

use bytes::Bytes;
use gamelink_protocol::config::{ClientConfig, ServerConfig, DISCONNECT_REDUNDANCY};
use gamelink_protocol::core::checksum::PROTOCOL_ID;
use gamelink_protocol::core::packet::{
    compute_hmac, Packet, CONNECTION_DATA_OVERHEAD, HMAC_SIZE, MAX_DATAGRAM_SIZE,
    MAX_GAME_DATA_SIZE,
};
use gamelink_protocol::core::session_key::SessionKey;
use gamelink_protocol::error::ProtocolError;
use gamelink_protocol::protocol::handshake::{derive_session_key, generate_keypair};
use gamelink_protocol::protocol::{Client, ClientState, Server, ServerEvent};
use gamelink_protocol::transport::mock::{MemoryNetwork, MemoryTransport};
use gamelink_protocol::transport::Transport;

const SERVER: &str = "10.0.0.1:8755";
const PEER: &str = "10.0.0.9:40000";

fn addr(s: &str) -> SocketAddrV4 {
    s.parse().unwrap()
}

fn server(network: &MemoryNetwork) -> Server<MemoryTransport> {
    let config = ServerConfig {
        timeout_sweep: false,
        ..ServerConfig::default()
    };
    Server::new(network.endpoint(addr(SERVER)), config)
}

// ============================================================================
// PACKET CODEC EDGE CASES
// ============================================================================

#[test]
fn test_empty_and_truncated_datagrams() {
    assert!(matches!(
        Packet::decode_checksummed(&[]),
        Err(ProtocolError::MalformedPacket(_))
    ));
    assert!(matches!(
        Packet::decode_authenticated(&[0u8; HMAC_SIZE], &SessionKey::zeroed()),
        Err(ProtocolError::MalformedPacket(_))
    ));

    let request = Packet::ConnectionRequest {
        public_key: [7u8; 32],
    }
    .encode_checksummed()
    .unwrap();
    assert!(Packet::decode_checksummed(&request[..request.len() - 1]).is_err());
}

#[test]
fn test_empty_game_payload() {
    let key = SessionKey::from_bytes([3u8; 32]);
    let packet = Packet::ConnectionData {
        sequence: 1,
        payload: Bytes::new(),
    };
    let datagram = packet.encode_authenticated(&key).unwrap();
    assert_eq!(datagram.len(), CONNECTION_DATA_OVERHEAD);
    assert_eq!(Packet::decode_authenticated(&datagram, &key).unwrap(), packet);
}

#[test]
fn test_largest_game_payload_fills_datagram() {
    let key = SessionKey::from_bytes([3u8; 32]);
    let packet = Packet::ConnectionData {
        sequence: u16::MAX,
        payload: Bytes::from(vec![0xAB; MAX_GAME_DATA_SIZE]),
    };
    let datagram = packet.encode_authenticated(&key).unwrap();
    assert_eq!(datagram.len(), MAX_DATAGRAM_SIZE);
}

#[test]
fn test_length_field_beyond_datagram_rejected() {
    let key = SessionKey::from_bytes([9u8; 32]);
    // Valid HMAC over a body that claims more payload than it carries
    let mut message = Vec::new();
    message.extend_from_slice(&PROTOCOL_ID.to_be_bytes());
    message.push(5);
    message.extend_from_slice(&1u16.to_be_bytes());
    message.extend_from_slice(&500u32.to_be_bytes());
    message.extend_from_slice(b"short");
    let tag = compute_hmac(&key, &message).unwrap();
    message.extend_from_slice(&tag);

    assert!(matches!(
        Packet::decode_authenticated(&message, &key),
        Err(ProtocolError::BufferOverflow { .. })
    ));
}

#[test]
fn test_foreign_protocol_id_under_valid_hmac() {
    let key = SessionKey::from_bytes([1u8; 32]);
    let mut message = Vec::new();
    message.extend_from_slice(&0xDEAD_BEEFu32.to_be_bytes());
    message.push(6);
    let tag = compute_hmac(&key, &message).unwrap();
    message.extend_from_slice(&tag);

    assert!(matches!(
        Packet::decode_authenticated(&message, &key),
        Err(ProtocolError::InvalidProtocolId(0xDEAD_BEEF))
    ));
}

#[test]
fn test_unknown_type_tag_rejected() {
    let key = SessionKey::from_bytes([1u8; 32]);
    let mut message = Vec::new();
    message.extend_from_slice(&PROTOCOL_ID.to_be_bytes());
    message.push(42);
    let tag = compute_hmac(&key, &message).unwrap();
    message.extend_from_slice(&tag);

    assert!(matches!(
        Packet::decode_authenticated(&message, &key),
        Err(ProtocolError::MalformedPacket(_))
    ));
}

#[test]
fn test_tier_mismatch_rejected() {
    let key = SessionKey::from_bytes([1u8; 32]);
    assert!(Packet::Disconnect.encode_checksummed().is_err());
    assert!(Packet::Challenge { public_key: [0; 32] }
        .encode_authenticated(&key)
        .is_err());
}

// ============================================================================
// HANDSHAKE EDGE CASES
// ============================================================================

#[test]
fn test_low_order_public_key_rejected() {
    let result = derive_session_key(&generate_keypair(), &[0u8; 32]);
    assert!(matches!(result, Err(ProtocolError::HandshakeFailed(_))));
}

#[test]
fn test_bogus_challenge_does_not_abort_handshake() {
    let network = MemoryNetwork::new();
    let mut server = server(&network);
    let client_address = addr("10.0.0.20:40000");
    let mut client = Client::new(network.endpoint(client_address), ClientConfig::default()).unwrap();
    client.connect().unwrap();

    // Another LAN host answers the broadcast first with a low-order key
    let bogus = Packet::Challenge { public_key: [0u8; 32] }
        .encode_checksummed()
        .unwrap();
    network.inject(addr("10.0.0.66:8755"), client_address, &bogus);
    assert!(client.poll().unwrap().is_empty());
    assert_eq!(client.state(), ClientState::SendingRequest);

    for _ in 0..3 {
        server.poll().unwrap();
        client.poll().unwrap();
    }
    assert!(client.is_connected());
    assert_eq!(client.server_address(), Some(addr(SERVER)));
    assert!(server.is_client_connected(1));
}

#[test]
fn test_server_frees_slot_after_failed_derivation() {
    let network = MemoryNetwork::new();
    let mut server = server(&network);
    let peer = network.endpoint(addr(PEER));

    let request = Packet::ConnectionRequest { public_key: [0u8; 32] }
        .encode_checksummed()
        .unwrap();
    peer.send(addr(SERVER), &request).unwrap();
    server.poll().unwrap();
    assert!(server.has_challenge(addr(PEER)));

    // Any authenticated follow-up forces the derivation to resolve
    let response = Packet::ChallengeResponse
        .encode_authenticated(&SessionKey::zeroed())
        .unwrap();
    peer.send(addr(SERVER), &response).unwrap();
    assert!(server.poll().unwrap().is_empty());
    assert!(!server.has_challenge(addr(PEER)));
    assert_eq!(server.metrics().snapshot().handshakes_failed, 1);
}

#[test]
fn test_forged_challenge_response_rejected() {
    let network = MemoryNetwork::new();
    let mut server = server(&network);
    let peer = network.endpoint(addr(PEER));

    let request = Packet::ConnectionRequest {
        public_key: generate_keypair().public_bytes(),
    }
    .encode_checksummed()
    .unwrap();
    peer.send(addr(SERVER), &request).unwrap();
    server.poll().unwrap();

    let forged = Packet::ChallengeResponse
        .encode_authenticated(&SessionKey::from_bytes([0x11; 32]))
        .unwrap();
    peer.send(addr(SERVER), &forged).unwrap();
    assert!(server.poll().unwrap().is_empty());
    assert!(server.has_challenge(addr(PEER)));
    assert_eq!(server.connected_client_count(), 1);
    assert_eq!(server.metrics().snapshot().dropped_integrity, 1);
}

#[test]
fn test_stale_challenge_expires_with_disconnects() {
    let network = MemoryNetwork::new();
    let mut server = server(&network);
    let peer = network.endpoint(addr(PEER));

    let request = Packet::ConnectionRequest {
        public_key: generate_keypair().public_bytes(),
    }
    .encode_checksummed()
    .unwrap();
    peer.send(addr(SERVER), &request).unwrap();
    server.poll().unwrap();
    let mut buf = [0u8; MAX_DATAGRAM_SIZE];
    assert!(peer.receive(&mut buf).unwrap().is_some());

    let events = server.expire_stale(Instant::now() + Duration::from_secs(5));
    assert_eq!(
        events,
        vec![ServerEvent::TimedOut {
            client_id: None,
            address: addr(PEER),
        }]
    );
    assert_eq!(network.pending(addr(PEER)), DISCONNECT_REDUNDANCY);
    assert_eq!(server.pending_challenge_count(), 0);
}

// ============================================================================
// TRANSPORT EDGE CASES
// ============================================================================

#[test]
fn test_garbage_from_unknown_peer_is_dropped() {
    let network = MemoryNetwork::new();
    let mut server = server(&network);

    for garbage in [vec![], vec![0xFF; 3], vec![0x00; 37], vec![0x42; MAX_DATAGRAM_SIZE]] {
        network.inject(addr(PEER), addr(SERVER), &garbage);
        assert!(server.poll().unwrap().is_empty());
    }
    assert_eq!(server.metrics().snapshot().dropped_total(), 4);
    assert_eq!(server.pending_challenge_count(), 0);
}

#[test]
fn test_oversized_datagram_truncated_by_transport() {
    let network = MemoryNetwork::new();
    let receiver = network.endpoint(addr(SERVER));
    network.inject(addr(PEER), addr(SERVER), &[1u8; 64]);

    let mut buf = [0u8; 16];
    let (from, len) = receiver.receive(&mut buf).unwrap().unwrap();
    assert_eq!(from, addr(PEER));
    assert_eq!(len, 16);
}
