//! # Session Layer
//!
//! Message-level view of the transport.
//!
//! ## Components
//! - **Session**: one channel with serialization, RPC correlation and activity timestamps
//! - **Network**: a service plus its session table, routing decoded messages
//! - **ActorMessageSender**: cross-process calls addressed by actor id

pub mod actor_sender;
pub mod network;
pub mod session;

pub use actor_sender::{ActorMessageSender, AddressRouter, ProcessRouter};
pub use network::Network;
pub use session::Session;
