//! Checksums used by the packet header.
//!
//! The protocol identifier is a Fletcher-32 digest of the protocol name, computed
//! at compile time. Handshake packets exchanged before a session key exists are
//! protected by CRC-32 (IEEE).

/// Name and version string the protocol identifier is derived from
pub const PROTOCOL_NAME: &str = "NetworkPluginV1.0.0";

/// 32-bit identifier stamped into every packet header
pub const PROTOCOL_ID: u32 = protocol_id(PROTOCOL_NAME);

/// Fletcher-32 over `name` plus its NUL terminator, read as little-endian
/// 16-bit words. An odd trailing byte is zero-padded.
pub const fn protocol_id(name: &str) -> u32 {
    let bytes = name.as_bytes();
    // The terminator is part of the digested region.
    let len = bytes.len() + 1;
    let mut sum_a: u32 = 0;
    let mut sum_b: u32 = 0;
    let mut i = 0;
    while i < len {
        let lo = byte_at(bytes, i) as u32;
        let hi = byte_at(bytes, i + 1) as u32;
        sum_a = (sum_a + (lo | (hi << 8))) % 65_535;
        sum_b = (sum_b + sum_a) % 65_535;
        i += 2;
    }
    (sum_b << 16) | sum_a
}

const fn byte_at(bytes: &[u8], index: usize) -> u8 {
    if index < bytes.len() {
        bytes[index]
    } else {
        0
    }
}

/// CRC-32 (IEEE 802.3) of `data`
#[inline]
pub fn crc32(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}
