//! # Wire Buffer
//!
//! Fixed-capacity byte cursor with big-endian (network order) primitives.
//!
//! The buffer is allocated once and never grows or shrinks. A single cursor is
//! shared by reads and writes; [`WireBuffer::rewind`] resets it to the start so a
//! fully written packet can have its header patched or be re-read for
//! verification.
//!
//! ```rust
//! use gamelink_protocol::core::buffer::WireBuffer;
//!
//! let mut buffer = WireBuffer::new(6);
//! buffer.write_u16(0xBEEF).unwrap();
//! buffer.write_u32(42).unwrap();
//! buffer.rewind();
//! assert_eq!(buffer.read_u16().unwrap(), 0xBEEF);
//! assert_eq!(buffer.read_u32().unwrap(), 42);
//! ```

use crate::error::{ProtocolError, Result};

/// Owned, bounds-checked byte cursor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireBuffer {
    data: Box<[u8]>,
    position: usize,
}

impl WireBuffer {
    /// Allocate a zero-filled buffer of exactly `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            position: 0,
        }
    }

    /// Wrap a received datagram; the cursor starts at 0
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            data: bytes.into(),
            position: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// Reset the cursor to the start of the buffer
    pub fn rewind(&mut self) {
        self.position = 0;
    }

    /// Whole storage, independent of the cursor
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data.into_vec()
    }

    /// Claim `len` bytes at the cursor and advance past them
    #[inline]
    fn advance(&mut self, len: usize) -> Result<std::ops::Range<usize>> {
        if len > self.remaining() {
            return Err(ProtocolError::BufferOverflow {
                requested: len,
                remaining: self.remaining(),
            });
        }
        let start = self.position;
        self.position += len;
        Ok(start..self.position)
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_span(&[value])
    }

    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        self.write_span(&value.to_be_bytes())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_span(&value.to_be_bytes())
    }

    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.write_span(&value.to_be_bytes())
    }

    /// IEEE-754 bit pattern in network order
    pub fn write_f32(&mut self, value: f32) -> Result<()> {
        self.write_u32(value.to_bits())
    }

    pub fn write_span(&mut self, bytes: &[u8]) -> Result<()> {
        let range = self.advance(bytes.len())?;
        self.data[range].copy_from_slice(bytes);
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let range = self.advance(1)?;
        Ok(self.data[range.start])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.read_array()?))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    /// Borrow the next `len` bytes
    pub fn read_span(&mut self, len: usize) -> Result<&[u8]> {
        let range = self.advance(len)?;
        Ok(&self.data[range])
    }

    /// Copy the next `N` bytes into a fixed array
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let range = self.advance(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[range]);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_byte_order() {
        let mut buffer = WireBuffer::new(15);
        buffer.write_u8(0x01).unwrap();
        buffer.write_u16(0x0203).unwrap();
        buffer.write_u32(0x0405_0607).unwrap();
        buffer.write_u64(0x0809_0A0B_0C0D_0E0F).unwrap();
        assert_eq!(buffer.as_bytes(), &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15]);
        assert_eq!(buffer.remaining(), 0);
    }

    #[test]
    fn test_mixed_read_back() {
        let mut buffer = WireBuffer::new(1 + 2 + 4 + 8 + 4 + 3);
        buffer.write_u8(7).unwrap();
        buffer.write_u16(65_530).unwrap();
        buffer.write_u32(u32::MAX - 1).unwrap();
        buffer.write_u64(1 << 40).unwrap();
        buffer.write_f32(-1.5).unwrap();
        buffer.write_span(b"abc").unwrap();

        buffer.rewind();
        assert_eq!(buffer.read_u8().unwrap(), 7);
        assert_eq!(buffer.read_u16().unwrap(), 65_530);
        assert_eq!(buffer.read_u32().unwrap(), u32::MAX - 1);
        assert_eq!(buffer.read_u64().unwrap(), 1 << 40);
        assert_eq!(buffer.read_f32().unwrap(), -1.5);
        assert_eq!(buffer.read_span(3).unwrap(), b"abc");
    }

    #[test]
    fn test_write_overflow_leaves_cursor() {
        let mut buffer = WireBuffer::new(3);
        buffer.write_u16(1).unwrap();
        let err = buffer.write_u16(2).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::BufferOverflow {
                requested: 2,
                remaining: 1
            }
        ));
        assert_eq!(buffer.position(), 2);
        buffer.write_u8(3).unwrap();
    }

    #[test]
    fn test_read_overflow() {
        let mut buffer = WireBuffer::from_bytes(&[0xAA, 0xBB]);
        assert!(buffer.read_u32().is_err());
        assert_eq!(buffer.read_u16().unwrap(), 0xAABB);
        assert!(buffer.read_u8().is_err());
        assert!(buffer.read_span(1).is_err());
        assert!(buffer.read_span(0).unwrap().is_empty());
    }

    #[test]
    fn test_rewind_allows_header_patch() {
        let mut buffer = WireBuffer::new(8);
        buffer.write_u32(0).unwrap();
        buffer.write_u32(0x1122_3344).unwrap();
        buffer.rewind();
        buffer.write_u32(0xCAFE_BABE).unwrap();
        assert_eq!(buffer.as_bytes(), &[0xCA, 0xFE, 0xBA, 0xBE, 0x11, 0x22, 0x33, 0x44]);
    }
}
