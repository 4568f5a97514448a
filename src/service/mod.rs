//! # Async Service Drivers
//!
//! Tokio tasks that own a [`Server`](crate::protocol::Server) or
//! [`Client`](crate::protocol::Client) and poll it on a fixed cadence.
//!
//! The protocol core stays synchronous and single-threaded. A driver is the
//! only owner of its endpoint; the application talks to it through command and
//! event channels and stops it through a shutdown channel.
//!
//! ```text
//! app --commands--> driver --poll()--> Server/Client
//! app <--events---- driver
//! app --shutdown--> driver --kick_all()/disconnect()--> peers
//! ```

pub mod driver;

pub use driver::{
    run_client, run_server, shutdown_on_ctrl_c, ClientCommand, ServerCommand, POLL_BUDGET,
    POLL_INTERVAL,
};
