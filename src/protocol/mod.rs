//! # Message Layer
//!
//! Typed payloads on top of the transport.
//!
//! ## Components
//! - **Message traits**: opcode-tagged serde types and their RPC roles
//! - **OpcodeRegistry**: opcode ↔ type table, validated at build time
//! - **MessageDispatcher**: opcode → ordered handler list, failures isolated per handler
//! - **ActorId**: 64-bit actor addresses carrying the owning process

pub mod actor_id;
pub mod dispatcher;
pub mod message;
pub mod opcode;

#[cfg(test)]
pub(crate) mod fixtures;

pub use actor_id::{ActorId, ActorIdGenerator, ProcessActorId};
pub use dispatcher::{MessageContext, MessageDispatcher, MessageFn, MessageHandler, RpcFn};
pub use message::{
    ActorMessage, ActorRequest, ActorResponse, AnyMessage, Message, MessageKind, Request,
    Response, RpcHeader,
};
pub use opcode::{OpcodeRegistry, OpcodeRegistryBuilder};
