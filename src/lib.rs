//! # GameLink Protocol
//!
//! Connection-oriented, authenticated session protocol over UDP for small
//! real-time multiplayer games. One host runs a [`Server`]; up to
//! [`MAX_CLIENTS`](config::MAX_CLIENTS) peers discover it by broadcast,
//! complete an X25519 handshake, and then exchange sequenced, HMAC-SHA256
//! protected game-state datagrams.
//!
//! ## Components
//! - **core**: wire buffer, checksums, packet codec, sequence comparison, session keys
//! - **protocol**: handshake, slot pools, client and server state machines
//! - **transport**: non-blocking UDP socket and an in-memory test network
//! - **service**: tokio drivers with command, event and shutdown channels
//! - **host**: integer return conventions for embedding engines
//! - **config**: TOML and environment configuration with validation
//! - **utils**: logging initialisation and protocol counters
//!
//! ## Example
//! ```rust
//! use gamelink_protocol::config::{ClientConfig, ServerConfig};
//! use gamelink_protocol::protocol::{Client, ClientEvent, Server};
//! use gamelink_protocol::transport::mock::{MemoryNetwork, MemoryTransport};
//!
//! let network = MemoryNetwork::new();
//! let mut server: Server<MemoryTransport> =
//!     Server::new(network.endpoint("10.0.0.1:8755".parse().unwrap()), ServerConfig::default());
//! let mut client = Client::new(
//!     network.endpoint("10.0.0.2:40000".parse().unwrap()),
//!     ClientConfig::default(),
//! )
//! .unwrap();
//!
//! client.connect().unwrap();
//! server.poll().unwrap(); // Challenge
//! client.poll().unwrap(); // ChallengeResponse
//! server.poll().unwrap(); // ConnectionAccepted
//! assert_eq!(client.poll().unwrap(), vec![ClientEvent::Connected { client_id: 1 }]);
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod host;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use error::{ProtocolError, Result};
pub use protocol::{Client, ClientEvent, ClientState, Server, ServerEvent, ServerMode};
