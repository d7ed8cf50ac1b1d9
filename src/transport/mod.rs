//! # Transport Layer
//!
//! TCP channels and the services that own them.
//!
//! ## Components
//! - **ChannelId**: 64-bit channel ids from two non-colliding generators
//! - **Channel**: one socket, its buffers and its reader/writer tasks
//! - **Service**: id → channel map, accept loop and the flush tick, all
//!   driven by one task per service

pub mod channel;
pub mod channel_id;
pub mod service;

pub use channel::ChannelType;
pub use channel_id::{ChannelId, ChannelIdGenerator};
pub use service::{Service, ServiceEvent, ServiceEvents, ServiceHandle};
