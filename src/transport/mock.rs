//! In-memory datagram network for testing
//!
//! [`MemoryNetwork`] connects any number of [`MemoryTransport`] endpoints inside
//! one process. It behaves like a lossy LAN segment:
//!
//! - unicast to an unbound address is silently lost
//! - sends to `255.255.255.255:port` reach every other endpoint on that port,
//!   provided broadcast was enabled on the sender
//! - drop rules simulate packet loss for selected datagrams
//! - every send is captured for inspection, including dropped ones
//!
//! # Example
//!
//! ```
//! use gamelink_protocol::transport::mock::MemoryNetwork;
//! use gamelink_protocol::transport::Transport;
//! use std::net::SocketAddrV4;
//!
//! let network = MemoryNetwork::new();
//! let a = network.endpoint("10.0.0.1:5000".parse().unwrap());
//! let b = network.endpoint("10.0.0.2:5000".parse().unwrap());
//!
//! a.send(b.address(), b"hello").unwrap();
//! let mut buf = [0u8; 16];
//! let (from, len) = b.receive(&mut buf).unwrap().unwrap();
//! assert_eq!(from, a.address());
//! assert_eq!(&buf[..len], b"hello");
//! ```

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{Transport, BROADCAST_ADDRESS};
use crate::error::{constants, ProtocolError, Result};

/// A datagram observed on the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedDatagram {
    pub from: SocketAddrV4,
    pub to: SocketAddrV4,
    pub bytes: Vec<u8>,
    /// Whether a drop rule discarded it
    pub dropped: bool,
}

type DropRule = Box<dyn FnMut(&CapturedDatagram) -> bool + Send>;

#[derive(Default)]
struct NetworkState {
    queues: HashMap<SocketAddrV4, VecDeque<(SocketAddrV4, Vec<u8>)>>,
    drop_rule: Option<DropRule>,
    captured: Vec<CapturedDatagram>,
}

impl NetworkState {
    fn deliver(&mut self, from: SocketAddrV4, to: SocketAddrV4, bytes: &[u8]) {
        let mut datagram = CapturedDatagram {
            from,
            to,
            bytes: bytes.to_vec(),
            dropped: false,
        };
        if let Some(rule) = self.drop_rule.as_mut() {
            datagram.dropped = rule(&datagram);
        }
        if !datagram.dropped {
            if let Some(queue) = self.queues.get_mut(&to) {
                queue.push_back((from, datagram.bytes.clone()));
            }
        }
        self.captured.push(datagram);
    }
}

/// Shared in-process network; clones refer to the same segment
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl std::fmt::Debug for MemoryNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryNetwork").finish_non_exhaustive()
    }
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        // A poisoned lock only means a test thread panicked; the state is plain data.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Bind an endpoint at `address`
    pub fn endpoint(&self, address: SocketAddrV4) -> MemoryTransport {
        self.lock().queues.entry(address).or_default();
        MemoryTransport {
            address,
            network: self.clone(),
            broadcast: AtomicBool::new(false),
        }
    }

    /// Drop every datagram for which `rule` returns true
    pub fn set_drop_rule<F>(&self, rule: F)
    where
        F: FnMut(&CapturedDatagram) -> bool + Send + 'static,
    {
        self.lock().drop_rule = Some(Box::new(rule));
    }

    pub fn clear_drop_rule(&self) {
        self.lock().drop_rule = None;
    }

    /// Place a raw datagram in `to`'s queue as if `from` had sent it
    pub fn inject(&self, from: SocketAddrV4, to: SocketAddrV4, bytes: &[u8]) {
        if let Some(queue) = self.lock().queues.get_mut(&to) {
            queue.push_back((from, bytes.to_vec()));
        }
    }

    /// Every datagram sent so far, in order
    pub fn captured(&self) -> Vec<CapturedDatagram> {
        self.lock().captured.clone()
    }

    /// Datagrams sent by `from`
    pub fn captured_from(&self, from: SocketAddrV4) -> Vec<CapturedDatagram> {
        self.lock()
            .captured
            .iter()
            .filter(|d| d.from == from)
            .cloned()
            .collect()
    }

    pub fn clear_captured(&self) {
        self.lock().captured.clear();
    }

    /// Datagrams waiting in `address`'s queue
    pub fn pending(&self, address: SocketAddrV4) -> usize {
        self.lock().queues.get(&address).map_or(0, VecDeque::len)
    }
}

/// One bound endpoint on a [`MemoryNetwork`]; unbinds when dropped
#[derive(Debug)]
pub struct MemoryTransport {
    address: SocketAddrV4,
    network: MemoryNetwork,
    broadcast: AtomicBool,
}

impl MemoryTransport {
    pub fn address(&self) -> SocketAddrV4 {
        self.address
    }

    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }
}

impl Transport for MemoryTransport {
    fn send(&self, destination: SocketAddrV4, bytes: &[u8]) -> Result<()> {
        let mut state = self.network.lock();
        if !state.queues.contains_key(&self.address) {
            return Err(ProtocolError::SocketError(io::Error::new(
                io::ErrorKind::NotConnected,
                constants::ERR_TRANSPORT_CLOSED,
            )));
        }

        if *destination.ip() == BROADCAST_ADDRESS {
            if !self.broadcast.load(Ordering::Relaxed) {
                return Err(ProtocolError::SocketError(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "broadcast not enabled",
                )));
            }
            let mut targets: Vec<SocketAddrV4> = state
                .queues
                .keys()
                .filter(|addr| addr.port() == destination.port() && **addr != self.address)
                .copied()
                .collect();
            targets.sort();
            for target in targets {
                state.deliver(self.address, target, bytes);
            }
            return Ok(());
        }

        state.deliver(self.address, destination, bytes);
        Ok(())
    }

    fn receive(&self, buf: &mut [u8]) -> Result<Option<(SocketAddrV4, usize)>> {
        let mut state = self.network.lock();
        let Some(queue) = state.queues.get_mut(&self.address) else {
            return Err(ProtocolError::SocketError(io::Error::new(
                io::ErrorKind::NotConnected,
                constants::ERR_TRANSPORT_CLOSED,
            )));
        };
        Ok(queue.pop_front().map(|(from, bytes)| {
            let len = bytes.len().min(buf.len());
            buf[..len].copy_from_slice(&bytes[..len]);
            (from, len)
        }))
    }

    fn enable_broadcast(&self) -> Result<()> {
        self.broadcast.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn local_address(&self) -> Result<SocketAddrV4> {
        Ok(self.address)
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.network.lock().queues.remove(&self.address);
    }
}
