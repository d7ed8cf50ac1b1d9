//! # Message Traits
//!
//! Payload types are plain serde structs tagged with an opcode. The trait a
//! type implements decides how the stack treats it:
//!
//! | trait            | routed to                         | correlated by |
//! |------------------|-----------------------------------|---------------|
//! | `Message`        | dispatcher                        | -             |
//! | `Request`        | dispatcher (an rpc handler)       | rpc id        |
//! | `Response`       | the session that issued the call  | rpc id        |
//! | `ActorMessage`   | dispatcher, with a target actor   | -             |
//! | `ActorRequest`   | dispatcher, with a target actor   | rpc id        |
//! | `ActorResponse`  | the actor sender                  | rpc id        |
//!
//! ## Example
//! ```rust
//! use serde::{Deserialize, Serialize};
//! use cluster_net::protocol::message::{Message, Request, Response};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Ping { rpc_id: u32 }
//!
//! #[derive(Debug, Clone, Default, Serialize, Deserialize)]
//! struct Pong { rpc_id: u32, error: i32, message: String }
//!
//! impl Message for Ping { const OPCODE: u16 = 1; }
//! impl Message for Pong { const OPCODE: u16 = 2; }
//!
//! impl Request for Ping {
//!     type Response = Pong;
//!     fn rpc_id(&self) -> u32 { self.rpc_id }
//!     fn set_rpc_id(&mut self, rpc_id: u32) { self.rpc_id = rpc_id }
//! }
//!
//! impl Response for Pong {
//!     fn rpc_id(&self) -> u32 { self.rpc_id }
//!     fn set_rpc_id(&mut self, rpc_id: u32) { self.rpc_id = rpc_id }
//!     fn error(&self) -> i32 { self.error }
//!     fn set_error(&mut self, error: i32) { self.error = error }
//!     fn message(&self) -> &str { &self.message }
//!     fn set_message(&mut self, message: String) { self.message = message }
//! }
//! ```

use std::any::Any;
use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// A payload type with a fixed wire opcode.
pub trait Message: Serialize + DeserializeOwned + Debug + Send + Sync + 'static {
    const OPCODE: u16;
}

/// A message that expects exactly one response of type `Self::Response`.
pub trait Request: Message {
    type Response: Response;

    fn rpc_id(&self) -> u32;
    fn set_rpc_id(&mut self, rpc_id: u32);
}

/// The answer to a [`Request`]. `Default` lets the stack build error
/// responses (cancellation, handler failure) without knowing the type.
pub trait Response: Message + Default {
    fn rpc_id(&self) -> u32;
    fn set_rpc_id(&mut self, rpc_id: u32);
    fn error(&self) -> i32;
    fn set_error(&mut self, error: i32);
    fn message(&self) -> &str;
    fn set_message(&mut self, message: String);
}

/// Fire-and-forget message addressed to an actor.
pub trait ActorMessage: Message {}

/// Request addressed to an actor, answered with an [`ActorResponse`].
pub trait ActorRequest: Request {}

pub trait ActorResponse: Response {}

/// How the registry treats an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Message,
    Request { response: u16 },
    Response,
    ActorMessage,
    ActorRequest { response: u16 },
    ActorResponse,
}

impl MessageKind {
    pub fn is_response(self) -> bool {
        matches!(self, MessageKind::Response | MessageKind::ActorResponse)
    }

    pub fn is_request(self) -> bool {
        matches!(
            self,
            MessageKind::Request { .. } | MessageKind::ActorRequest { .. }
        )
    }

    pub fn is_actor(self) -> bool {
        matches!(
            self,
            MessageKind::ActorMessage | MessageKind::ActorRequest { .. } | MessageKind::ActorResponse
        )
    }

    /// Opcode of the declared response type, for requests.
    pub fn response_opcode(self) -> Option<u16> {
        match self {
            MessageKind::Request { response } | MessageKind::ActorRequest { response } => {
                Some(response)
            }
            _ => None,
        }
    }
}

/// Type-erased decoded message.
pub trait AnyMessage: Debug + Send + Sync + 'static {
    fn opcode(&self) -> u16;
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<M: Message> AnyMessage for M {
    fn opcode(&self) -> u16 {
        M::OPCODE
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

impl dyn AnyMessage {
    pub fn downcast_ref<M: Message>(&self) -> Option<&M> {
        self.as_any().downcast_ref::<M>()
    }

    pub fn downcast<M: Message>(self: Box<Self>) -> Option<M> {
        self.into_any().downcast::<M>().ok().map(|m| *m)
    }
}

/// Correlation fields of a response, read without knowing its type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcHeader {
    pub rpc_id: u32,
    pub error: i32,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::fixtures::{EchoRequest, EchoResponse};

    #[test]
    fn test_downcast() {
        let boxed: Box<dyn AnyMessage> = Box::new(EchoRequest {
            rpc_id: 3,
            text: "hi".into(),
        });
        assert_eq!(boxed.opcode(), EchoRequest::OPCODE);
        assert!(boxed.downcast_ref::<EchoResponse>().is_none());
        let request = boxed.downcast::<EchoRequest>().unwrap();
        assert_eq!(request.text, "hi");
    }

    #[test]
    fn test_kind_predicates() {
        let kind = MessageKind::ActorRequest { response: 9 };
        assert!(kind.is_request());
        assert!(kind.is_actor());
        assert_eq!(kind.response_opcode(), Some(9));
        assert!(MessageKind::ActorResponse.is_response());
        assert_eq!(MessageKind::Message.response_opcode(), None);
    }
}
