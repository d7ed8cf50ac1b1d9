//! # Packet Codec
//!
//! `tokio_util` framing over the same wire rules as [`PacketParser`], for peers
//! that want a `Framed` stream instead of a full service (tools, probes, tests).
//!
//! [`PacketParser`]: crate::core::parser::PacketParser

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::core::packet::{Packet, ServiceKind};
use crate::error::{ProtocolError, Result};

#[derive(Debug, Clone, Copy, Default)]
pub struct PacketCodec {
    kind: ServiceKind,
}

impl PacketCodec {
    pub fn new(kind: ServiceKind) -> Self {
        Self { kind }
    }

    pub fn inner() -> Self {
        Self::new(ServiceKind::Inner)
    }

    pub fn outer() -> Self {
        Self::new(ServiceKind::Outer)
    }

    pub fn kind(&self) -> ServiceKind {
        self.kind
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>> {
        let prefix_len = self.kind.size_prefix_len();
        if src.len() < prefix_len {
            return Ok(None);
        }

        let size = self.kind.decode_size(&src[..prefix_len]);
        self.kind.validate_size(size)?;

        if src.len() < prefix_len + size {
            src.reserve(prefix_len + size - src.len());
            return Ok(None);
        }

        src.advance(prefix_len);
        // split_to hands out the frame without copying
        let frame = src.split_to(size).freeze();
        Packet::from_frame(self.kind, frame).map(Some)
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = ProtocolError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<()> {
        dst.reserve(self.kind.size_prefix_len() + self.kind.header_len() + packet.body.len());
        packet.encode(self.kind, dst)
    }
}
