//! # Packet Codec
//!
//! Six packet variants over two integrity tiers.
//!
//! ## Wire Format
//! ```text
//! checksum tier:      [CRC32(4)] [Type(1)] [Payload]
//! authenticated tier: [ProtocolId(4)] [Type(1)] [Payload] [HMAC-SHA256(32)]
//! ```
//!
//! In the checksum tier the CRC is computed with the protocol identifier in the
//! first four bytes and then written over it, so the identifier is implied: a
//! packet from a foreign protocol fails the CRC. The authenticated tier keeps the
//! identifier and checks it after the HMAC.
//!
//! ## Payloads
//! | Type               | Tier          | Payload                              |
//! |--------------------|---------------|--------------------------------------|
//! | ConnectionRequest  | checksum      | client public key (32)               |
//! | Challenge          | checksum      | server public key (32)               |
//! | ChallengeResponse  | authenticated | none                                 |
//! | ConnectionAccepted | authenticated | client id (u32)                      |
//! | ConnectionData     | authenticated | sequence (u16), length (u32), bytes  |
//! | Disconnect         | authenticated | none                                 |

use bytes::Bytes;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::core::buffer::WireBuffer;
use crate::core::checksum::{crc32, PROTOCOL_ID};
use crate::core::session_key::SessionKey;
use crate::error::{constants, ProtocolError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Protocol identifier plus the type tag
pub const HEADER_SIZE: usize = 4 + 1;

/// Wire width of an X25519 public key
pub const PUBLIC_KEY_SIZE: usize = 32;

/// HMAC-SHA256 tag width
pub const HMAC_SIZE: usize = 32;

/// Largest datagram either role will send or accept
pub const MAX_DATAGRAM_SIZE: usize = 1024;

pub const CONNECTION_REQUEST_SIZE: usize = HEADER_SIZE + PUBLIC_KEY_SIZE;
pub const CHALLENGE_SIZE: usize = HEADER_SIZE + PUBLIC_KEY_SIZE;
pub const CHALLENGE_RESPONSE_SIZE: usize = HEADER_SIZE + HMAC_SIZE;
pub const CONNECTION_ACCEPTED_SIZE: usize = HEADER_SIZE + 4 + HMAC_SIZE;
pub const DISCONNECT_SIZE: usize = HEADER_SIZE + HMAC_SIZE;

/// Bytes a ConnectionData packet adds around its payload
pub const CONNECTION_DATA_OVERHEAD: usize = HEADER_SIZE + 2 + 4 + HMAC_SIZE;

/// Largest game payload that fits in one datagram
pub const MAX_GAME_DATA_SIZE: usize = MAX_DATAGRAM_SIZE - CONNECTION_DATA_OVERHEAD;

pub type PublicKeyBytes = [u8; PUBLIC_KEY_SIZE];

/// One-byte type tag carried after the protocol identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Invalid = 0,
    ConnectionRequest = 1,
    Challenge = 2,
    ChallengeResponse = 3,
    ConnectionAccepted = 4,
    ConnectionData = 5,
    Disconnect = 6,
}

impl PacketType {
    /// Whether packets of this type carry an HMAC instead of a CRC
    pub fn is_authenticated(self) -> bool {
        matches!(
            self,
            PacketType::ChallengeResponse
                | PacketType::ConnectionAccepted
                | PacketType::ConnectionData
                | PacketType::Disconnect
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            PacketType::Invalid => "INVALID",
            PacketType::ConnectionRequest => "CONNECTION_REQUEST",
            PacketType::Challenge => "CHALLENGE",
            PacketType::ChallengeResponse => "CHALLENGE_RESPONSE",
            PacketType::ConnectionAccepted => "CONNECTION_ACCEPTED",
            PacketType::ConnectionData => "CONNECTION_DATA",
            PacketType::Disconnect => "DISCONNECT",
        }
    }
}

impl TryFrom<u8> for PacketType {
    type Error = ProtocolError;

    fn try_from(tag: u8) -> Result<Self> {
        match tag {
            1 => Ok(PacketType::ConnectionRequest),
            2 => Ok(PacketType::Challenge),
            3 => Ok(PacketType::ChallengeResponse),
            4 => Ok(PacketType::ConnectionAccepted),
            5 => Ok(PacketType::ConnectionData),
            6 => Ok(PacketType::Disconnect),
            _ => Err(ProtocolError::MalformedPacket(constants::ERR_UNKNOWN_TYPE)),
        }
    }
}

/// Decoded packet with its payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    ConnectionRequest { public_key: PublicKeyBytes },
    Challenge { public_key: PublicKeyBytes },
    ChallengeResponse,
    ConnectionAccepted { client_id: u32 },
    ConnectionData { sequence: u16, payload: Bytes },
    Disconnect,
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::ConnectionRequest { .. } => PacketType::ConnectionRequest,
            Packet::Challenge { .. } => PacketType::Challenge,
            Packet::ChallengeResponse => PacketType::ChallengeResponse,
            Packet::ConnectionAccepted { .. } => PacketType::ConnectionAccepted,
            Packet::ConnectionData { .. } => PacketType::ConnectionData,
            Packet::Disconnect => PacketType::Disconnect,
        }
    }

    fn body_len(&self) -> usize {
        match self {
            Packet::ConnectionRequest { .. } | Packet::Challenge { .. } => PUBLIC_KEY_SIZE,
            Packet::ChallengeResponse | Packet::Disconnect => 0,
            Packet::ConnectionAccepted { .. } => 4,
            Packet::ConnectionData { payload, .. } => 2 + 4 + payload.len(),
        }
    }

    fn write_body(&self, buffer: &mut WireBuffer) -> Result<()> {
        match self {
            Packet::ConnectionRequest { public_key } | Packet::Challenge { public_key } => {
                buffer.write_span(public_key)
            }
            Packet::ChallengeResponse | Packet::Disconnect => Ok(()),
            Packet::ConnectionAccepted { client_id } => buffer.write_u32(*client_id),
            Packet::ConnectionData { sequence, payload } => {
                let len = u32::try_from(payload.len())
                    .map_err(|_| ProtocolError::PayloadTooLarge(payload.len()))?;
                buffer.write_u16(*sequence)?;
                buffer.write_u32(len)?;
                buffer.write_span(payload)
            }
        }
    }

    fn read_body(packet_type: PacketType, buffer: &mut WireBuffer) -> Result<Self> {
        let packet = match packet_type {
            PacketType::ConnectionRequest => Packet::ConnectionRequest {
                public_key: buffer.read_array()?,
            },
            PacketType::Challenge => Packet::Challenge {
                public_key: buffer.read_array()?,
            },
            PacketType::ChallengeResponse => Packet::ChallengeResponse,
            PacketType::ConnectionAccepted => Packet::ConnectionAccepted {
                client_id: buffer.read_u32()?,
            },
            PacketType::ConnectionData => {
                let sequence = buffer.read_u16()?;
                let len = buffer.read_u32()? as usize;
                let payload = Bytes::copy_from_slice(buffer.read_span(len)?);
                Packet::ConnectionData { sequence, payload }
            }
            PacketType::Disconnect => Packet::Disconnect,
            PacketType::Invalid => {
                return Err(ProtocolError::MalformedPacket(constants::ERR_UNKNOWN_TYPE))
            }
        };

        if buffer.remaining() != 0 {
            return Err(ProtocolError::MalformedPacket(constants::ERR_TRAILING_BYTES));
        }
        Ok(packet)
    }

    /// Serialize under the tier this packet type belongs to.
    ///
    /// Authenticated-tier packets require `key`; it is ignored for the checksum tier.
    pub fn encode(&self, key: Option<&SessionKey>) -> Result<Vec<u8>> {
        if self.packet_type().is_authenticated() {
            let key = key.ok_or(ProtocolError::MalformedPacket(constants::ERR_MISSING_KEY))?;
            self.encode_authenticated(key)
        } else {
            self.encode_checksummed()
        }
    }

    /// `[CRC32][Type][Payload]` with the CRC taken over `[PROTOCOL_ID][Type][Payload]`
    pub fn encode_checksummed(&self) -> Result<Vec<u8>> {
        if self.packet_type().is_authenticated() {
            return Err(ProtocolError::MalformedPacket(constants::ERR_WRONG_TIER));
        }

        let mut buffer = WireBuffer::new(HEADER_SIZE + self.body_len());
        buffer.write_u32(PROTOCOL_ID)?;
        buffer.write_u8(self.packet_type() as u8)?;
        self.write_body(&mut buffer)?;

        let crc = crc32(buffer.as_bytes());
        buffer.rewind();
        buffer.write_u32(crc)?;
        Ok(buffer.into_vec())
    }

    /// `[PROTOCOL_ID][Type][Payload][HMAC]`
    pub fn encode_authenticated(&self, key: &SessionKey) -> Result<Vec<u8>> {
        if !self.packet_type().is_authenticated() {
            return Err(ProtocolError::MalformedPacket(constants::ERR_WRONG_TIER));
        }

        let message_len = HEADER_SIZE + self.body_len();
        let mut buffer = WireBuffer::new(message_len + HMAC_SIZE);
        buffer.write_u32(PROTOCOL_ID)?;
        buffer.write_u8(self.packet_type() as u8)?;
        self.write_body(&mut buffer)?;

        let tag = compute_hmac(key, &buffer.as_bytes()[..message_len])?;
        buffer.write_span(&tag)?;
        Ok(buffer.into_vec())
    }

    /// Verify and decode a checksum-tier datagram
    pub fn decode_checksummed(datagram: &[u8]) -> Result<Self> {
        let mut buffer = WireBuffer::from_bytes(datagram);
        let packet_type = verify_checksum(&mut buffer)?;
        if packet_type.is_authenticated() {
            return Err(ProtocolError::MalformedPacket(constants::ERR_WRONG_TIER));
        }
        Self::read_body(packet_type, &mut buffer)
    }

    /// Verify and decode an authenticated-tier datagram under `key`
    pub fn decode_authenticated(datagram: &[u8], key: &SessionKey) -> Result<Self> {
        let mut buffer = verify_hmac(key, datagram)?;
        let packet_type = PacketType::try_from(buffer.read_u8()?)?;
        if !packet_type.is_authenticated() {
            return Err(ProtocolError::MalformedPacket(constants::ERR_WRONG_TIER));
        }
        Self::read_body(packet_type, &mut buffer)
    }
}

/// Unverified type tag of a datagram, used to pick the tier to verify under
pub fn peek_type(datagram: &[u8]) -> Option<PacketType> {
    datagram
        .get(HEADER_SIZE - 1)
        .and_then(|tag| PacketType::try_from(*tag).ok())
}

/// Check the CRC of a checksum-tier packet and return its type tag.
///
/// The buffer's first four bytes are overwritten with [`PROTOCOL_ID`] to
/// reconstruct the checksummed image; on success the cursor sits at the payload.
pub fn verify_checksum(buffer: &mut WireBuffer) -> Result<PacketType> {
    if buffer.capacity() < HEADER_SIZE {
        return Err(ProtocolError::MalformedPacket(constants::ERR_TOO_SHORT));
    }

    buffer.rewind();
    let received = buffer.read_u32()?;
    buffer.rewind();
    buffer.write_u32(PROTOCOL_ID)?;

    if crc32(buffer.as_bytes()) != received {
        return Err(ProtocolError::IntegrityCheckFailed);
    }
    PacketType::try_from(buffer.read_u8()?)
}

/// Check the trailing HMAC and the protocol identifier.
///
/// Returns a buffer over the authenticated message (without the tag) with the
/// cursor positioned at the type tag.
pub fn verify_hmac(key: &SessionKey, datagram: &[u8]) -> Result<WireBuffer> {
    if datagram.len() < HEADER_SIZE + HMAC_SIZE {
        return Err(ProtocolError::MalformedPacket(constants::ERR_TOO_SHORT));
    }

    let (message, tag) = datagram.split_at(datagram.len() - HMAC_SIZE);
    let mut mac = keyed_mac(key)?;
    mac.update(message);
    mac.verify_slice(tag)
        .map_err(|_| ProtocolError::IntegrityCheckFailed)?;

    let mut buffer = WireBuffer::from_bytes(message);
    let protocol_id = buffer.read_u32()?;
    if protocol_id != PROTOCOL_ID {
        return Err(ProtocolError::InvalidProtocolId(protocol_id));
    }
    Ok(buffer)
}

fn keyed_mac(key: &SessionKey) -> Result<HmacSha256> {
    <HmacSha256 as Mac>::new_from_slice(key.as_bytes())
        .map_err(|e| ProtocolError::HandshakeFailed(e.to_string()))
}

/// HMAC-SHA256 of `message` under `key`
pub fn compute_hmac(key: &SessionKey, message: &[u8]) -> Result<[u8; HMAC_SIZE]> {
    let mut mac = keyed_mac(key)?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().into())
}
