// test-only module included via protocol/mod.rs
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::net::SocketAddrV4;

use crate::config::{ClientConfig, ServerConfig};
use crate::protocol::client::{Client, ClientEvent, ClientState};
use crate::protocol::server::{Server, ServerEvent};
use crate::transport::mock::{MemoryNetwork, MemoryTransport};

fn addr(s: &str) -> SocketAddrV4 {
    s.parse().expect("valid address")
}

#[test]
fn test_udp_handshake_flow() {
    let network = MemoryNetwork::new();
    let mut server: Server<MemoryTransport> =
        Server::new(network.endpoint(addr("10.0.0.1:8755")), ServerConfig::default());
    let mut client = Client::new(
        network.endpoint(addr("10.0.0.2:40000")),
        ClientConfig::default(),
    )
    .expect("Client should open");

    // =================== Step 1: Broadcast request ===================
    assert!(client.connect().expect("Request should send"));
    assert_eq!(client.state(), ClientState::SendingRequest);

    // =================== Step 2: Server challenges ===================
    assert!(server.poll().unwrap().is_empty());
    assert!(server.has_challenge(addr("10.0.0.2:40000")));

    // =================== Step 3: Client responds ===================
    assert!(client.poll().unwrap().is_empty());
    assert_eq!(client.state(), ClientState::SendingChallengeResponse);
    assert_eq!(client.server_address(), Some(addr("10.0.0.1:8755")));

    // =================== Step 4: Server accepts ===================
    let events = server.poll().unwrap();
    assert_eq!(
        events,
        vec![ServerEvent::Connected {
            client_id: 1,
            address: addr("10.0.0.2:40000"),
        }]
    );

    let events = client.poll().unwrap();
    assert_eq!(events, vec![ClientEvent::Connected { client_id: 1 }]);

    // Both sides derived the same key independently
    let server_key = server.connection(1).expect("slot 1").session_key();
    assert_eq!(Some(server_key), client.session_key());
    assert!(!server_key.is_zeroed());

    // =================== Step 5: Game data both ways ===================
    server.switch_to_game();
    assert_eq!(server.broadcast_game_data(b"toto\0").unwrap(), 1);
    match client.poll().unwrap().as_slice() {
        [ClientEvent::GameData { sequence, payload }] => {
            assert_eq!(*sequence, 1);
            assert_eq!(payload.as_ref(), b"toto\0");
        }
        other => panic!("Expected game data, got {other:?}"),
    }

    assert!(client.send_game_data(b"input").unwrap());
    match server.poll().unwrap().as_slice() {
        [ServerEvent::GameData {
            client_id, payload, ..
        }] => {
            assert_eq!(*client_id, 1);
            assert_eq!(payload.as_ref(), b"input");
        }
        other => panic!("Expected game data, got {other:?}"),
    }

    // =================== Step 6: Client leaves ===================
    assert!(client.disconnect());
    let events = server.poll().unwrap();
    assert!(matches!(
        events.as_slice(),
        [ServerEvent::Disconnected { client_id: 1, .. }]
    ));
    assert_eq!(server.connected_client_count(), 1);

    // Remaining redundant copies find no slot and change nothing
    for _ in 1..crate::config::DISCONNECT_REDUNDANCY {
        assert!(server.poll().unwrap().is_empty());
    }
    assert_eq!(server.metrics().snapshot().dropped_unknown_peer, 9);
}
