//! Observability and Metrics
//!
//! Per-instance counters for a Client or Server. Every counter is a relaxed
//! atomic, so recording never blocks the polling thread and a snapshot may be
//! taken from any other thread.

use crate::error::ProtocolError;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Why a datagram was discarded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// CRC, HMAC, or protocol identifier mismatch
    Integrity,
    /// Not strictly newer than the last accepted sequence
    Stale,
    /// Packet type not accepted in the current server mode
    Gated,
    /// Packet type not expected from this peer's handshake state
    Unexpected,
    /// No slot or session matches the sender
    UnknownPeer,
    /// Anything else: truncation, unknown tag, bad layout
    Malformed,
}

impl DropReason {
    /// Drop category of a per-datagram fault.
    ///
    /// `None` for faults counted elsewhere (slot exhaustion, handshake failure)
    /// and for environment errors that are not drops at all.
    pub fn classify(error: &ProtocolError) -> Option<Self> {
        match error {
            ProtocolError::IntegrityCheckFailed | ProtocolError::InvalidProtocolId(_) => {
                Some(DropReason::Integrity)
            }
            ProtocolError::StaleSequence { .. } => Some(DropReason::Stale),
            ProtocolError::ModeGated => Some(DropReason::Gated),
            ProtocolError::InvalidState => Some(DropReason::Unexpected),
            ProtocolError::UnknownPeer(_) => Some(DropReason::UnknownPeer),
            ProtocolError::BufferOverflow { .. }
            | ProtocolError::MalformedPacket(_)
            | ProtocolError::PayloadTooLarge(_) => Some(DropReason::Malformed),
            ProtocolError::SlotsExhausted
            | ProtocolError::HandshakeFailed(_)
            | ProtocolError::SocketError(_)
            | ProtocolError::ConfigError(_) => None,
        }
    }
}

/// Counter set for protocol operations
#[derive(Debug)]
pub struct Metrics {
    pub datagrams_sent: AtomicU64,
    pub datagrams_received: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
    pub handshakes_started: AtomicU64,
    pub handshakes_completed: AtomicU64,
    pub handshakes_failed: AtomicU64,
    pub dropped_integrity: AtomicU64,
    pub dropped_stale: AtomicU64,
    pub dropped_gated: AtomicU64,
    pub dropped_unexpected: AtomicU64,
    pub dropped_unknown_peer: AtomicU64,
    pub dropped_malformed: AtomicU64,
    pub slots_exhausted: AtomicU64,
    pub timeouts: AtomicU64,
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            datagrams_sent: AtomicU64::new(0),
            datagrams_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            handshakes_started: AtomicU64::new(0),
            handshakes_completed: AtomicU64::new(0),
            handshakes_failed: AtomicU64::new(0),
            dropped_integrity: AtomicU64::new(0),
            dropped_stale: AtomicU64::new(0),
            dropped_gated: AtomicU64::new(0),
            dropped_unexpected: AtomicU64::new(0),
            dropped_unknown_peer: AtomicU64::new(0),
            dropped_malformed: AtomicU64::new(0),
            slots_exhausted: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn datagram_sent(&self, byte_count: usize) {
        self.datagrams_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count as u64, Ordering::Relaxed);
    }

    pub fn datagram_received(&self, byte_count: usize) {
        self.datagrams_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count as u64, Ordering::Relaxed);
    }

    pub fn handshake_started(&self) {
        self.handshakes_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_completed(&self) {
        self.handshakes_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_failed(&self) {
        self.handshakes_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn slot_exhausted(&self) {
        self.slots_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a discarded datagram
    pub fn dropped(&self, reason: DropReason) {
        let counter = match reason {
            DropReason::Integrity => &self.dropped_integrity,
            DropReason::Stale => &self.dropped_stale,
            DropReason::Gated => &self.dropped_gated,
            DropReason::Unexpected => &self.dropped_unexpected,
            DropReason::UnknownPeer => &self.dropped_unknown_peer,
            DropReason::Malformed => &self.dropped_malformed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            datagrams_sent: self.datagrams_sent.load(Ordering::Relaxed),
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            handshakes_started: self.handshakes_started.load(Ordering::Relaxed),
            handshakes_completed: self.handshakes_completed.load(Ordering::Relaxed),
            handshakes_failed: self.handshakes_failed.load(Ordering::Relaxed),
            dropped_integrity: self.dropped_integrity.load(Ordering::Relaxed),
            dropped_stale: self.dropped_stale.load(Ordering::Relaxed),
            dropped_gated: self.dropped_gated.load(Ordering::Relaxed),
            dropped_unexpected: self.dropped_unexpected.load(Ordering::Relaxed),
            dropped_unknown_peer: self.dropped_unknown_peer.load(Ordering::Relaxed),
            dropped_malformed: self.dropped_malformed.load(Ordering::Relaxed),
            slots_exhausted: self.slots_exhausted.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self, role: &'static str) {
        let snapshot = self.snapshot();
        info!(
            role,
            datagrams_sent = snapshot.datagrams_sent,
            datagrams_received = snapshot.datagrams_received,
            bytes_sent = snapshot.bytes_sent,
            bytes_received = snapshot.bytes_received,
            handshakes_started = snapshot.handshakes_started,
            handshakes_completed = snapshot.handshakes_completed,
            handshakes_failed = snapshot.handshakes_failed,
            dropped_integrity = snapshot.dropped_integrity,
            dropped_stale = snapshot.dropped_stale,
            dropped_gated = snapshot.dropped_gated,
            dropped_unexpected = snapshot.dropped_unexpected,
            dropped_unknown_peer = snapshot.dropped_unknown_peer,
            dropped_malformed = snapshot.dropped_malformed,
            slots_exhausted = snapshot.slots_exhausted,
            timeouts = snapshot.timeouts,
            uptime_seconds = snapshot.uptime_seconds,
            "Protocol metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub datagrams_sent: u64,
    pub datagrams_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub handshakes_started: u64,
    pub handshakes_completed: u64,
    pub handshakes_failed: u64,
    pub dropped_integrity: u64,
    pub dropped_stale: u64,
    pub dropped_gated: u64,
    pub dropped_unexpected: u64,
    pub dropped_unknown_peer: u64,
    pub dropped_malformed: u64,
    pub slots_exhausted: u64,
    pub timeouts: u64,
    pub uptime_seconds: u64,
}

impl MetricsSnapshot {
    pub fn dropped_total(&self) -> u64 {
        self.dropped_integrity
            + self.dropped_stale
            + self.dropped_gated
            + self.dropped_unexpected
            + self.dropped_unknown_peer
            + self.dropped_malformed
    }
}
