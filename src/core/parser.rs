//! # Packet Parser
//!
//! Two-state decoder over a [`RingBuffer`]:
//!
//! ```text
//! AwaitingSize --(prefix complete, size valid)--> AwaitingBody
//!      ^                                               |
//!      +----------(size bytes consumed, packet out)----+
//! ```
//!
//! A single receive may carry several frames and a frame may span several
//! receives, so callers drain with [`PacketParser::parse`] until it returns
//! `Ok(None)`. Any error is a framing error: byte alignment is lost and the
//! connection has to be dropped.

use crate::core::packet::{Packet, ServiceKind, INNER_SIZE_PREFIX_LENGTH};
use crate::core::ring_buffer::RingBuffer;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    AwaitingSize,
    AwaitingBody { size: usize },
}

#[derive(Debug)]
pub struct PacketParser {
    kind: ServiceKind,
    state: ParserState,
}

impl PacketParser {
    pub fn new(kind: ServiceKind) -> Self {
        Self {
            kind,
            state: ParserState::AwaitingSize,
        }
    }

    #[inline]
    pub fn state(&self) -> ParserState {
        self.state
    }

    #[inline]
    pub fn kind(&self) -> ServiceKind {
        self.kind
    }

    /// Try to pull the next complete packet out of `buffer`.
    pub fn parse(&mut self, buffer: &mut RingBuffer) -> Result<Option<Packet>> {
        loop {
            match self.state {
                ParserState::AwaitingSize => {
                    let prefix_len = self.kind.size_prefix_len();
                    if buffer.len() < prefix_len {
                        return Ok(None);
                    }
                    let mut prefix = [0u8; INNER_SIZE_PREFIX_LENGTH];
                    buffer.read(&mut prefix[..prefix_len])?;
                    let size = self.kind.decode_size(&prefix);
                    self.kind.validate_size(size)?;
                    self.state = ParserState::AwaitingBody { size };
                }
                ParserState::AwaitingBody { size } => {
                    if buffer.len() < size {
                        return Ok(None);
                    }
                    let frame = buffer.read_bytes(size)?;
                    self.state = ParserState::AwaitingSize;
                    return Packet::from_frame(self.kind, frame).map(Some);
                }
            }
        }
    }
}
