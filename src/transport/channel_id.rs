//! Channel id generation.
//!
//! ```text
//! id = (generation << 32) | local_conn
//! ```
//!
//! Connect-side generations count down from `i32::MAX`, accept-side
//! generations count up from 1. The two ranges only meet after two billion
//! channels, so ids created by either side never collide within one process.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(u64);

impl ChannelId {
    /// Id of a disposed channel.
    pub const NONE: ChannelId = ChannelId(0);

    pub const fn new(generation: u32, local_conn: u32) -> Self {
        ChannelId(((generation as u64) << 32) | local_conn as u64)
    }

    pub const fn from_raw(raw: u64) -> Self {
        ChannelId(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub const fn local_conn(self) -> u32 {
        self.0 as u32
    }

    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<ChannelId> for u64 {
    fn from(id: ChannelId) -> u64 {
        id.0
    }
}

/// Shared by every service of a process.
#[derive(Debug)]
pub struct ChannelIdGenerator {
    connect_generation: AtomicU32,
    accept_generation: AtomicU32,
}

impl Default for ChannelIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelIdGenerator {
    pub const fn new() -> Self {
        Self {
            connect_generation: AtomicU32::new(i32::MAX as u32),
            accept_generation: AtomicU32::new(0),
        }
    }

    /// Id for a channel this process dials out on.
    pub fn next_connect(&self) -> ChannelId {
        let generation = self.connect_generation.fetch_sub(1, Ordering::Relaxed);
        let local_conn = (1u32 << 30) | rand::random::<u32>();
        ChannelId::new(generation, local_conn)
    }

    /// Id for a channel handed out by the listener.
    pub fn next_accept(&self) -> ChannelId {
        let generation = self.accept_generation.fetch_add(1, Ordering::Relaxed) + 1;
        ChannelId::new(generation, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_layout() {
        let id = ChannelId::new(7, 0xABCD);
        assert_eq!(id.generation(), 7);
        assert_eq!(id.local_conn(), 0xABCD);
        assert_eq!(id.raw(), (7u64 << 32) | 0xABCD);
    }

    #[test]
    fn test_first_ids() {
        let generator = ChannelIdGenerator::new();
        assert_eq!(generator.next_accept().generation(), 1);
        assert_eq!(generator.next_accept().generation(), 2);

        let connect = generator.next_connect();
        assert_eq!(connect.generation(), i32::MAX as u32);
        assert!(connect.local_conn() & (1 << 30) != 0);
    }

    #[test]
    fn test_interleaved_ids_are_distinct() {
        let generator = ChannelIdGenerator::new();
        let mut seen = HashSet::new();
        for i in 0..2_000 {
            let id = if i % 3 == 0 {
                generator.next_connect()
            } else {
                generator.next_accept()
            };
            assert!(!id.is_none());
            assert!(seen.insert(id), "duplicate id {id}");
        }
    }
}
