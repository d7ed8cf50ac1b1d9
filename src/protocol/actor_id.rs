//! Actor addresses.
//!
//! ```text
//!  63          46 45                     18 17          0
//! [ process (18) ][       time (28)        ][ value (18) ]
//! ```
//!
//! The process field names the process that owns the actor. Sending to a
//! remote actor means splitting that field off (to pick a connection) and
//! rewriting it to the receiver's own process, which is a pure bit operation.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

const VALUE_BITS: u32 = 18;
const TIME_BITS: u32 = 28;
const PROCESS_BITS: u32 = 18;

const VALUE_MASK: u64 = (1 << VALUE_BITS) - 1;
const TIME_MASK: u64 = (1 << TIME_BITS) - 1;
const PROCESS_MASK: u64 = (1 << PROCESS_BITS) - 1;

const TIME_SHIFT: u32 = VALUE_BITS;
const PROCESS_SHIFT: u32 = VALUE_BITS + TIME_BITS;

/// Seconds between the Unix epoch and 2020-01-01, the origin of the time field.
const EPOCH_2020: u64 = 1_577_836_800;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct ActorId(u64);

impl ActorId {
    /// "No actor": the message is for the session itself.
    pub const NONE: ActorId = ActorId(0);

    pub const fn new(process: u32, time: u32, value: u32) -> Self {
        ActorId(
            ((process as u64 & PROCESS_MASK) << PROCESS_SHIFT)
                | ((time as u64 & TIME_MASK) << TIME_SHIFT)
                | (value as u64 & VALUE_MASK),
        )
    }

    pub const fn from_raw(raw: u64) -> Self {
        ActorId(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn process(self) -> u32 {
        ((self.0 >> PROCESS_SHIFT) & PROCESS_MASK) as u32
    }

    pub const fn time(self) -> u32 {
        ((self.0 >> TIME_SHIFT) & TIME_MASK) as u32
    }

    pub const fn value(self) -> u32 {
        (self.0 & VALUE_MASK) as u32
    }

    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Same actor, owned by `process`.
    pub const fn with_process(self, process: u32) -> Self {
        ActorId(
            (self.0 & !(PROCESS_MASK << PROCESS_SHIFT))
                | ((process as u64 & PROCESS_MASK) << PROCESS_SHIFT),
        )
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.process(), self.time(), self.value())
    }
}

impl From<u64> for ActorId {
    fn from(raw: u64) -> Self {
        ActorId(raw)
    }
}

impl From<ActorId> for u64 {
    fn from(id: ActorId) -> u64 {
        id.0
    }
}

/// A target actor id split into its destination process and the id as the
/// destination will see it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessActorId {
    pub process: u32,
    pub actor_id: ActorId,
}

impl ProcessActorId {
    pub fn new(actor_id: ActorId, local_process: u32) -> Self {
        Self {
            process: actor_id.process(),
            actor_id: actor_id.with_process(local_process),
        }
    }
}

/// Hands out actor ids for one process.
///
/// Ids are unique while fewer than 2^18 are created per second.
#[derive(Debug)]
pub struct ActorIdGenerator {
    process: u32,
    state: Mutex<(u32, u32)>,
}

impl ActorIdGenerator {
    pub fn new(process: u32) -> Self {
        Self {
            process,
            state: Mutex::new((0, 0)),
        }
    }

    pub fn process(&self) -> u32 {
        self.process
    }

    pub fn next(&self) -> ActorId {
        let now = seconds_since_2020();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let (time, value) = &mut *state;
        if now > *time {
            *time = now;
            *value = 0;
        } else {
            *value += 1;
            if *value as u64 > VALUE_MASK {
                // value space of this second is used up, borrow the next one
                *time += 1;
                *value = 0;
            }
        }
        ActorId::new(self.process, *time, *value)
    }
}

fn seconds_since_2020() -> u32 {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(EPOCH_2020);
    (now.saturating_sub(EPOCH_2020) & TIME_MASK) as u32
}
