//! # Ring Buffer
//!
//! Growable byte queue made of fixed-size chunks, backing both the receive and
//! the send path of a channel.
//!
//! ## Layout
//! ```text
//!   first_index                                   last_index
//!       v                                              v
//! [ ....xxxxxxxx ][ xxxxxxxxxxxx ][ xxxxxxxxxxxx ][ xxxx........ ]
//!     head chunk                                     tail chunk
//! ```
//!
//! Writes append at `last_index` in the tail chunk, reads consume from
//! `first_index` in the head chunk. Both cursors stay strictly below the chunk
//! size: a full tail chunk immediately gets a successor, a drained head chunk is
//! immediately popped. Popped chunks go to a spare list and are reused by the
//! next growth instead of being freed.
//!
//! The write and read regions are exposed directly so a socket can receive
//! into, and send from, chunk memory without an intermediate copy.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};

use crate::error::{ProtocolError, Result};

/// Default chunk size in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

#[derive(Debug)]
pub struct RingBuffer {
    chunk_size: usize,
    chunks: VecDeque<Box<[u8]>>,
    spare: Vec<Box<[u8]>>,
    first_index: usize,
    last_index: usize,
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl RingBuffer {
    /// Create a buffer. `chunk_size` is rounded up to a power of two.
    pub fn new(chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1).next_power_of_two();
        let mut chunks = VecDeque::with_capacity(4);
        chunks.push_back(vec![0u8; chunk_size].into_boxed_slice());
        Self {
            chunk_size,
            chunks,
            spare: Vec::new(),
            first_index: 0,
            last_index: 0,
        }
    }

    #[inline]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of chunks currently holding (or ready to hold) data.
    #[inline]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Number of drained chunks kept for reuse.
    #[inline]
    pub fn spare_count(&self) -> usize {
        self.spare.len()
    }

    /// Unread bytes.
    #[inline]
    pub fn len(&self) -> usize {
        (self.chunks.len() - 1) * self.chunk_size + self.last_index - self.first_index
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn add_last(&mut self) {
        let chunk = self
            .spare
            .pop()
            .unwrap_or_else(|| vec![0u8; self.chunk_size].into_boxed_slice());
        self.chunks.push_back(chunk);
        self.last_index = 0;
    }

    fn remove_first(&mut self) {
        if let Some(chunk) = self.chunks.pop_front() {
            self.spare.push(chunk);
        }
        self.first_index = 0;
    }

    /// Append `data`, growing the chunk list as needed.
    pub fn write(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let region = self.peek_write_region();
            let n = region.len().min(data.len());
            region[..n].copy_from_slice(&data[..n]);
            data = &data[n..];
            self.advance_write(n);
        }
    }

    /// Free space in the tail chunk. Never empty.
    pub fn peek_write_region(&mut self) -> &mut [u8] {
        let start = self.last_index;
        match self.chunks.back_mut() {
            Some(tail) => &mut tail[start..],
            None => &mut [],
        }
    }

    /// Commit `n` bytes written into [`Self::peek_write_region`].
    pub fn advance_write(&mut self, n: usize) {
        debug_assert!(self.last_index + n <= self.chunk_size);
        self.last_index += n;
        if self.last_index == self.chunk_size {
            self.add_last();
        }
    }

    /// Readable bytes in the head chunk. Empty only when the buffer is empty.
    pub fn peek_read_region(&self) -> &[u8] {
        let end = if self.chunks.len() == 1 {
            self.last_index
        } else {
            self.chunk_size
        };
        match self.chunks.front() {
            Some(head) => &head[self.first_index..end],
            None => &[],
        }
    }

    /// Consume `n` bytes of [`Self::peek_read_region`].
    pub fn advance_read(&mut self, n: usize) -> Result<()> {
        let available = self.peek_read_region().len();
        if n > available {
            return Err(ProtocolError::BufferUnderflow {
                requested: n,
                available,
            });
        }
        self.first_index += n;
        if self.first_index == self.chunk_size {
            self.remove_first();
        } else if self.chunks.len() == 1 && self.first_index == self.last_index {
            // empty: rewind so the single chunk is reused from the start
            self.first_index = 0;
            self.last_index = 0;
        }
        Ok(())
    }

    /// Copy exactly `dst.len()` bytes out of the buffer.
    pub fn read(&mut self, dst: &mut [u8]) -> Result<()> {
        let available = self.len();
        if dst.len() > available {
            return Err(ProtocolError::BufferUnderflow {
                requested: dst.len(),
                available,
            });
        }
        let mut copied = 0;
        while copied < dst.len() {
            let region = self.peek_read_region();
            let n = region.len().min(dst.len() - copied);
            dst[copied..copied + n].copy_from_slice(&region[..n]);
            copied += n;
            self.advance_read(n)?;
        }
        Ok(())
    }

    /// Consume `count` bytes into a freshly allocated buffer.
    pub fn read_bytes(&mut self, count: usize) -> Result<Bytes> {
        let mut out = BytesMut::zeroed(count);
        self.read(&mut out)?;
        Ok(out.freeze())
    }
}
