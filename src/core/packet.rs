//! # Packet
//!
//! Wire layout of a framed message and the two independent header encoders.
//!
//! ```text
//! inner: [len u32 LE][actor id u64 LE][opcode u16 LE][body]   len = 10 + body
//! outer: [len u16 LE][opcode u16 LE][body]                    len = 2 + body
//! ```
//!
//! The length prefix never counts itself.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// Smallest legal value of a length prefix (an opcode and nothing else).
pub const MIN_PACKET_SIZE: usize = 2;
pub const OPCODE_LENGTH: usize = 2;
pub const ACTOR_ID_LENGTH: usize = 8;
/// Offset of the message body inside an inner frame (after actor id and opcode).
pub const INNER_HEADER_LENGTH: usize = ACTOR_ID_LENGTH + OPCODE_LENGTH;

pub const INNER_SIZE_PREFIX_LENGTH: usize = 4;
pub const OUTER_SIZE_PREFIX_LENGTH: usize = 2;

pub const MAX_INNER_PACKET_SIZE: usize = 16 * u16::MAX as usize;
pub const MAX_OUTER_PACKET_SIZE: usize = u16::MAX as usize;

/// Which wire variant a service speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    /// Process-to-process: 4-byte length, carries an actor address.
    #[default]
    Inner,
    /// Client-facing: 2-byte length, no actor address.
    Outer,
}

impl ServiceKind {
    #[inline]
    pub fn size_prefix_len(self) -> usize {
        match self {
            ServiceKind::Inner => INNER_SIZE_PREFIX_LENGTH,
            ServiceKind::Outer => OUTER_SIZE_PREFIX_LENGTH,
        }
    }

    #[inline]
    pub fn max_packet_size(self) -> usize {
        match self {
            ServiceKind::Inner => MAX_INNER_PACKET_SIZE,
            ServiceKind::Outer => MAX_OUTER_PACKET_SIZE,
        }
    }

    /// Bytes between the length prefix and the message body.
    #[inline]
    pub fn header_len(self) -> usize {
        match self {
            ServiceKind::Inner => INNER_HEADER_LENGTH,
            ServiceKind::Outer => OPCODE_LENGTH,
        }
    }

    /// Check a decoded length prefix against the variant's bounds.
    pub fn validate_size(self, size: usize) -> Result<()> {
        let max = self.max_packet_size();
        if !(MIN_PACKET_SIZE..=max).contains(&size) {
            return Err(ProtocolError::InvalidPacketSize {
                size,
                min: MIN_PACKET_SIZE,
                max,
            });
        }
        Ok(())
    }

    /// Decode a little-endian length prefix. `prefix` must hold at least
    /// [`Self::size_prefix_len`] bytes.
    pub(crate) fn decode_size(self, prefix: &[u8]) -> usize {
        match self {
            ServiceKind::Inner => {
                u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize
            }
            ServiceKind::Outer => u16::from_le_bytes([prefix[0], prefix[1]]) as usize,
        }
    }
}

/// One decoded message: header fields split out, body left as serialized bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Target actor address. Always 0 on outer links.
    pub actor_id: u64,
    pub opcode: u16,
    pub body: Bytes,
}

impl Packet {
    pub fn new(actor_id: u64, opcode: u16, body: impl Into<Bytes>) -> Self {
        Self {
            actor_id,
            opcode,
            body: body.into(),
        }
    }

    /// Split a complete frame (length prefix already removed) into a packet.
    pub fn from_frame(kind: ServiceKind, mut frame: Bytes) -> Result<Self> {
        if frame.len() < kind.header_len() {
            return Err(ProtocolError::TruncatedHeader(frame.len()));
        }
        let header = frame.split_to(kind.header_len());
        let packet = match kind {
            ServiceKind::Inner => {
                let mut actor = [0u8; ACTOR_ID_LENGTH];
                actor.copy_from_slice(&header[..ACTOR_ID_LENGTH]);
                Packet {
                    actor_id: u64::from_le_bytes(actor),
                    opcode: u16::from_le_bytes([header[8], header[9]]),
                    body: frame,
                }
            }
            ServiceKind::Outer => Packet {
                actor_id: 0,
                opcode: u16::from_le_bytes([header[0], header[1]]),
                body: frame,
            },
        };
        Ok(packet)
    }

    /// Encode with the header variant for `kind`.
    pub fn encode(&self, kind: ServiceKind, dst: &mut BytesMut) -> Result<()> {
        match kind {
            ServiceKind::Inner => encode_inner(self.actor_id, self.opcode, &self.body, dst),
            ServiceKind::Outer => encode_outer(self.opcode, &self.body, dst),
        }
    }

    pub fn to_bytes(&self, kind: ServiceKind) -> Result<Bytes> {
        let mut dst = BytesMut::with_capacity(
            kind.size_prefix_len() + kind.header_len() + self.body.len(),
        );
        self.encode(kind, &mut dst)?;
        Ok(dst.freeze())
    }
}

/// Header of an inner frame: length prefix, actor id and opcode.
pub fn inner_header(
    actor_id: u64,
    opcode: u16,
    body_len: usize,
) -> Result<[u8; INNER_SIZE_PREFIX_LENGTH + INNER_HEADER_LENGTH]> {
    let size = INNER_HEADER_LENGTH + body_len;
    if size > MAX_INNER_PACKET_SIZE {
        return Err(ProtocolError::OversizedPacket(size));
    }
    let mut header = [0u8; INNER_SIZE_PREFIX_LENGTH + INNER_HEADER_LENGTH];
    header[..4].copy_from_slice(&(size as u32).to_le_bytes());
    header[4..12].copy_from_slice(&actor_id.to_le_bytes());
    header[12..14].copy_from_slice(&opcode.to_le_bytes());
    Ok(header)
}

/// Header of an outer frame: length prefix and opcode.
pub fn outer_header(
    opcode: u16,
    body_len: usize,
) -> Result<[u8; OUTER_SIZE_PREFIX_LENGTH + OPCODE_LENGTH]> {
    let size = OPCODE_LENGTH + body_len;
    if size > MAX_OUTER_PACKET_SIZE {
        return Err(ProtocolError::OversizedPacket(size));
    }
    let mut header = [0u8; OUTER_SIZE_PREFIX_LENGTH + OPCODE_LENGTH];
    header[..2].copy_from_slice(&(size as u16).to_le_bytes());
    header[2..4].copy_from_slice(&opcode.to_le_bytes());
    Ok(header)
}

pub fn encode_inner(actor_id: u64, opcode: u16, body: &[u8], dst: &mut impl BufMut) -> Result<()> {
    let header = inner_header(actor_id, opcode, body.len())?;
    dst.put_slice(&header);
    dst.put_slice(body);
    Ok(())
}

pub fn encode_outer(opcode: u16, body: &[u8], dst: &mut impl BufMut) -> Result<()> {
    let header = outer_header(opcode, body.len())?;
    dst.put_slice(&header);
    dst.put_slice(body);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inner_layout() {
        let packet = Packet::new(0x0102_0304_0506_0708, 100, vec![0xAA, 0xBB]);
        let bytes = packet.to_bytes(ServiceKind::Inner).unwrap();

        assert_eq!(&bytes[..4], &12u32.to_le_bytes());
        assert_eq!(&bytes[4..12], &0x0102_0304_0506_0708u64.to_le_bytes());
        assert_eq!(&bytes[12..14], &100u16.to_le_bytes());
        assert_eq!(&bytes[14..], &[0xAA, 0xBB]);
    }

    #[test]
    fn test_outer_layout_drops_actor_id() {
        let packet = Packet::new(99, 7, vec![1, 2, 3]);
        let bytes = packet.to_bytes(ServiceKind::Outer).unwrap();

        assert_eq!(bytes.len(), 2 + 2 + 3);
        assert_eq!(&bytes[..2], &5u16.to_le_bytes());
        assert_eq!(&bytes[2..4], &7u16.to_le_bytes());
    }

    #[test]
    fn test_size_bounds() {
        assert!(ServiceKind::Inner.validate_size(1).is_err());
        assert!(ServiceKind::Inner.validate_size(2).is_ok());
        assert!(ServiceKind::Inner.validate_size(MAX_INNER_PACKET_SIZE).is_ok());
        assert!(ServiceKind::Inner
            .validate_size(MAX_INNER_PACKET_SIZE + 1)
            .is_err());
        assert!(ServiceKind::Outer.validate_size(MAX_OUTER_PACKET_SIZE).is_ok());
        assert!(ServiceKind::Outer
            .validate_size(MAX_OUTER_PACKET_SIZE + 1)
            .is_err());
    }

    #[test]
    fn test_oversized_send_rejected() {
        let body = vec![0u8; MAX_OUTER_PACKET_SIZE];
        let mut dst = BytesMut::new();
        assert!(matches!(
            encode_outer(1, &body, &mut dst),
            Err(ProtocolError::OversizedPacket(_))
        ));
        assert!(dst.is_empty());
        assert!(encode_inner(0, 1, &body, &mut dst).is_ok());
    }

    #[test]
    fn test_truncated_inner_frame() {
        let frame = Bytes::from_static(&[1, 2, 3, 4]);
        assert!(matches!(
            Packet::from_frame(ServiceKind::Inner, frame),
            Err(ProtocolError::TruncatedHeader(4))
        ));
    }
}
