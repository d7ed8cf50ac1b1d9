//! # Core Protocol Components
//!
//! Byte-level machinery shared by every channel: buffering, framing and payload
//! serialization.
//!
//! ## Components
//! - **RingBuffer**: chunked byte queue with zero-copy read/write regions
//! - **PacketParser**: two-state length-prefix decoder over a ring buffer
//! - **Packet**: wire layout plus the inner/outer header encoders
//! - **Codec**: `tokio_util` framing over the same rules
//! - **Serialization**: payload body formats
//!
//! ## Wire Format
//! ```text
//! inner: [Length(4)] [ActorId(8)] [Opcode(2)] [Body(N)]
//! outer: [Length(2)] [Opcode(2)] [Body(N)]
//! ```
//!
//! ## Bounds
//! - inner length: 2 ..= 16 * 65535
//! - outer length: 2 ..= 65535
//! - anything else is a fatal framing error for the connection

pub mod codec;
pub mod packet;
pub mod parser;
pub mod ring_buffer;
pub mod serialization;
