//! # Core Protocol Components
//!
//! Byte-level building blocks shared by both roles.
//!
//! ## Components
//! - **Buffer**: bounds-checked big-endian cursor over a fixed allocation
//! - **Checksum**: protocol identifier (Fletcher-32) and CRC-32
//! - **Packet**: the six packet variants and both integrity tiers
//! - **Sequence**: wrap-tolerant freshness comparison
//! - **Session key**: zeroizing HMAC key
//!
//! ## Wire Format
//! ```text
//! [ProtocolId or CRC32(4)] [Type(1)] [Payload(N)] [HMAC(32), authenticated tier only]
//! ```
//!
//! No datagram exceeds 1024 bytes; every read and write is bounds-checked.

pub mod buffer;
pub mod checksum;
pub mod packet;
pub mod sequence;
pub mod session_key;
