//! # Transport Layer
//!
//! Datagram transport consumed by the session layer.
//!
//! The protocol core only needs four operations: send a datagram to an address,
//! receive one without blocking, enable broadcast, and close. [`Transport`]
//! captures exactly that. A "would block" receive is reported as `Ok(None)` and
//! is never an error.
//!
//! ## Implementations
//! - [`udp::UdpTransport`]: non-blocking `std::net::UdpSocket`
//! - [`mock::MemoryNetwork`]: in-process network for tests, with loss injection

pub mod mock;
pub mod udp;

use std::net::{Ipv4Addr, SocketAddrV4};

use crate::error::Result;

/// Limited-broadcast destination used for LAN discovery
pub const BROADCAST_ADDRESS: Ipv4Addr = Ipv4Addr::BROADCAST;

/// Non-blocking datagram endpoint
pub trait Transport {
    /// Send one datagram.
    ///
    /// # Errors
    /// `ProtocolError::SocketError` on any transport failure.
    fn send(&self, destination: SocketAddrV4, bytes: &[u8]) -> Result<()>;

    /// Receive one datagram into `buf`.
    ///
    /// Returns `Ok(None)` when nothing is pending. Datagrams longer than `buf` are
    /// truncated by the transport.
    fn receive(&self, buf: &mut [u8]) -> Result<Option<(SocketAddrV4, usize)>>;

    /// Allow sending to broadcast addresses
    fn enable_broadcast(&self) -> Result<()>;

    /// Address this endpoint is bound to
    fn local_address(&self) -> Result<SocketAddrV4>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&self, destination: SocketAddrV4, bytes: &[u8]) -> Result<()> {
        (**self).send(destination, bytes)
    }

    fn receive(&self, buf: &mut [u8]) -> Result<Option<(SocketAddrV4, usize)>> {
        (**self).receive(buf)
    }

    fn enable_broadcast(&self) -> Result<()> {
        (**self).enable_broadcast()
    }

    fn local_address(&self) -> Result<SocketAddrV4> {
        (**self).local_address()
    }
}
