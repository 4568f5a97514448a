//! Non-blocking UDP socket transport.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};

use tracing::{debug, instrument, warn};

use super::Transport;
use crate::error::{ProtocolError, Result};

/// IPv4 UDP socket in non-blocking mode; closed on drop
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Bind `bind_address:port` (port 0 picks an ephemeral port)
    #[instrument]
    pub fn open(port: u16, bind_address: Ipv4Addr) -> Result<Self> {
        let socket = UdpSocket::bind(SocketAddrV4::new(bind_address, port))?;
        socket.set_nonblocking(true)?;
        debug!(local = ?socket.local_addr().ok(), "UDP socket opened");
        Ok(Self { socket })
    }
}

impl Transport for UdpTransport {
    fn send(&self, destination: SocketAddrV4, bytes: &[u8]) -> Result<()> {
        match self.socket.send_to(bytes, destination) {
            Ok(sent) if sent == bytes.len() => Ok(()),
            Ok(sent) => Err(ProtocolError::SocketError(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short send: {sent} of {} bytes", bytes.len()),
            ))),
            Err(e) => {
                warn!(%destination, error = %e, "UDP send failed");
                Err(e.into())
            }
        }
    }

    fn receive(&self, buf: &mut [u8]) -> Result<Option<(SocketAddrV4, usize)>> {
        loop {
            match self.socket.recv_from(buf) {
                Ok((len, SocketAddr::V4(sender))) => return Ok(Some((sender, len))),
                // IPv6 peers are outside the address model; skip them.
                Ok((_, SocketAddr::V6(sender))) => {
                    debug!(%sender, "Ignoring IPv6 datagram");
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                // Windows reports ICMP port-unreachable from an earlier send here.
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                    debug!(error = %e, "Ignoring connection reset on UDP socket");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn enable_broadcast(&self) -> Result<()> {
        self.socket.set_broadcast(true)?;
        Ok(())
    }

    fn local_address(&self) -> Result<SocketAddrV4> {
        match self.socket.local_addr()? {
            SocketAddr::V4(addr) => Ok(addr),
            SocketAddr::V6(addr) => Err(ProtocolError::SocketError(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("socket bound to IPv6 address {addr}"),
            ))),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_exchange() {
        let a = UdpTransport::open(0, Ipv4Addr::LOCALHOST).unwrap();
        let b = UdpTransport::open(0, Ipv4Addr::LOCALHOST).unwrap();
        let mut buf = [0u8; 64];

        assert!(a.receive(&mut buf).unwrap().is_none());

        let b_addr = b.local_address().unwrap();
        a.send(b_addr, b"ping").unwrap();

        let mut received = None;
        for _ in 0..200 {
            if let Some(hit) = b.receive(&mut buf).unwrap() {
                received = Some(hit);
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        let (sender, len) = received.unwrap();
        assert_eq!(&buf[..len], b"ping");
        assert_eq!(sender, a.local_address().unwrap());
    }

    #[test]
    fn test_enable_broadcast() {
        let socket = UdpTransport::open(0, Ipv4Addr::UNSPECIFIED).unwrap();
        socket.enable_broadcast().unwrap();
    }
}
