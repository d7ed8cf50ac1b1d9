//! # Opcode Registry
//!
//! Bidirectional opcode ↔ type table, built once at startup from an explicit
//! list of payload types and then shared read-only.
//!
//! Each entry carries the type-specific functions the stack needs while only
//! holding an opcode: decoding a body, reading a response's correlation
//! fields, and building an error response for a request. `build()` rejects
//! duplicate opcodes and requests whose response type was never registered,
//! so a missing mapping is a startup failure rather than a stuck call.
//!
//! ## Example
//! ```rust,ignore
//! let registry = OpcodeRegistry::builder()
//!     .request::<LoginRequest>()
//!     .response::<LoginResponse>()
//!     .message::<Heartbeat>()
//!     .build()?;
//! ```

use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::ops::RangeInclusive;

use bytes::Bytes;

use crate::core::serialization::SerializationFormat;
use crate::error::{ProtocolError, Result};
use crate::protocol::message::{
    ActorMessage, ActorRequest, ActorResponse, AnyMessage, Message, MessageKind, Request,
    Response, RpcHeader,
};

/// Opcodes of client-facing messages.
pub const OUTER_OPCODES: RangeInclusive<u16> = 10_000..=20_000;

pub fn is_outer_message(opcode: u16) -> bool {
    OUTER_OPCODES.contains(&opcode)
}

type DecodeFn = fn(SerializationFormat, &[u8]) -> Result<Box<dyn AnyMessage>>;
type RpcHeaderFn = fn(&dyn AnyMessage) -> Option<RpcHeader>;
type ErrorResponseFn = fn(u32, i32, String) -> Box<dyn AnyMessage>;

#[derive(Clone)]
struct OpcodeEntry {
    opcode: u16,
    type_id: TypeId,
    type_name: &'static str,
    kind: MessageKind,
    decode: DecodeFn,
    rpc_header: Option<RpcHeaderFn>,
    error_response: Option<ErrorResponseFn>,
}

fn decode_as<M: Message>(format: SerializationFormat, body: &[u8]) -> Result<Box<dyn AnyMessage>> {
    Ok(Box::new(format.deserialize::<M>(body)?))
}

fn rpc_header_of<R: Response>(message: &dyn AnyMessage) -> Option<RpcHeader> {
    message.downcast_ref::<R>().map(|r| RpcHeader {
        rpc_id: r.rpc_id(),
        error: r.error(),
        message: r.message().to_string(),
    })
}

fn error_response_of<R: Request>(rpc_id: u32, error: i32, message: String) -> Box<dyn AnyMessage> {
    let mut response = R::Response::default();
    response.set_rpc_id(rpc_id);
    response.set_error(error);
    response.set_message(message);
    Box::new(response)
}

impl OpcodeEntry {
    fn of<M: Message>(kind: MessageKind) -> Self {
        Self {
            opcode: M::OPCODE,
            type_id: TypeId::of::<M>(),
            type_name: type_name::<M>(),
            kind,
            decode: decode_as::<M>,
            rpc_header: None,
            error_response: None,
        }
    }
}

/// Collects registrations; see [`OpcodeRegistry::builder`].
#[derive(Default)]
pub struct OpcodeRegistryBuilder {
    entries: Vec<OpcodeEntry>,
    format: SerializationFormat,
}

impl OpcodeRegistryBuilder {
    /// Payload format for every registered type.
    pub fn format(mut self, format: SerializationFormat) -> Self {
        self.format = format;
        self
    }

    pub fn message<M: Message>(mut self) -> Self {
        self.entries.push(OpcodeEntry::of::<M>(MessageKind::Message));
        self
    }

    pub fn request<R: Request>(mut self) -> Self {
        let mut entry = OpcodeEntry::of::<R>(MessageKind::Request {
            response: <R::Response as Message>::OPCODE,
        });
        entry.error_response = Some(error_response_of::<R>);
        self.entries.push(entry);
        self
    }

    pub fn response<R: Response>(mut self) -> Self {
        let mut entry = OpcodeEntry::of::<R>(MessageKind::Response);
        entry.rpc_header = Some(rpc_header_of::<R>);
        self.entries.push(entry);
        self
    }

    pub fn actor_message<M: ActorMessage>(mut self) -> Self {
        self.entries.push(OpcodeEntry::of::<M>(MessageKind::ActorMessage));
        self
    }

    pub fn actor_request<R>(mut self) -> Self
    where
        R: ActorRequest,
        R::Response: ActorResponse,
    {
        let mut entry = OpcodeEntry::of::<R>(MessageKind::ActorRequest {
            response: <R::Response as Message>::OPCODE,
        });
        entry.error_response = Some(error_response_of::<R>);
        self.entries.push(entry);
        self
    }

    pub fn actor_response<R: ActorResponse>(mut self) -> Self {
        let mut entry = OpcodeEntry::of::<R>(MessageKind::ActorResponse);
        entry.rpc_header = Some(rpc_header_of::<R>);
        self.entries.push(entry);
        self
    }

    /// Validate and freeze the table.
    pub fn build(self) -> Result<OpcodeRegistry> {
        let mut by_opcode: HashMap<u16, OpcodeEntry> = HashMap::with_capacity(self.entries.len());
        let mut by_type: HashMap<TypeId, u16> = HashMap::with_capacity(self.entries.len());

        for entry in self.entries {
            if let Some(existing) = by_opcode.get(&entry.opcode) {
                if existing.type_id == entry.type_id && existing.kind == entry.kind {
                    continue;
                }
                return Err(ProtocolError::DuplicateOpcode(entry.opcode));
            }
            by_type.insert(entry.type_id, entry.opcode);
            by_opcode.insert(entry.opcode, entry);
        }

        for entry in by_opcode.values() {
            let Some(response) = entry.kind.response_opcode() else {
                continue;
            };
            let resolved = by_opcode
                .get(&response)
                .is_some_and(|r| r.kind.is_response() && r.kind.is_actor() == entry.kind.is_actor());
            if !resolved {
                return Err(ProtocolError::MissingResponseType {
                    request: entry.type_name,
                    response,
                });
            }
        }

        Ok(OpcodeRegistry {
            by_opcode,
            by_type,
            format: self.format,
        })
    }
}

/// Read-only opcode table shared by a network and its sessions.
pub struct OpcodeRegistry {
    by_opcode: HashMap<u16, OpcodeEntry>,
    by_type: HashMap<TypeId, u16>,
    format: SerializationFormat,
}

impl std::fmt::Debug for OpcodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpcodeRegistry")
            .field("opcodes", &self.by_opcode.len())
            .field("format", &self.format)
            .finish()
    }
}

impl OpcodeRegistry {
    pub fn builder() -> OpcodeRegistryBuilder {
        OpcodeRegistryBuilder::default()
    }

    #[inline]
    pub fn format(&self) -> SerializationFormat {
        self.format
    }

    pub fn len(&self) -> usize {
        self.by_opcode.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_opcode.is_empty()
    }

    pub fn contains(&self, opcode: u16) -> bool {
        self.by_opcode.contains_key(&opcode)
    }

    /// Opcode of a registered type.
    pub fn opcode_of<M: Message>(&self) -> Result<u16> {
        self.by_type
            .get(&TypeId::of::<M>())
            .copied()
            .ok_or(ProtocolError::UnregisteredType(type_name::<M>()))
    }

    /// Rust type name registered for `opcode`.
    pub fn type_name(&self, opcode: u16) -> Option<&'static str> {
        self.by_opcode.get(&opcode).map(|e| e.type_name)
    }

    pub fn kind(&self, opcode: u16) -> Option<MessageKind> {
        self.by_opcode.get(&opcode).map(|e| e.kind)
    }

    /// Response opcode declared by a request.
    pub fn response_opcode(&self, request_opcode: u16) -> Result<u16> {
        self.kind(request_opcode)
            .and_then(MessageKind::response_opcode)
            .ok_or(ProtocolError::UnknownOpcode(request_opcode))
    }

    /// Client-facing actor message that the gate forwards instead of handling.
    pub fn is_outer_actor_message(&self, opcode: u16) -> bool {
        is_outer_message(opcode) && self.kind(opcode).is_some_and(MessageKind::is_actor)
    }

    /// Serialize a registered payload.
    pub fn encode<M: Message>(&self, message: &M) -> Result<Bytes> {
        self.opcode_of::<M>()?;
        self.format.serialize(message)
    }

    /// Deserialize a body into the type registered for `opcode`.
    pub fn decode(&self, opcode: u16, body: &[u8]) -> Result<Box<dyn AnyMessage>> {
        let entry = self
            .by_opcode
            .get(&opcode)
            .ok_or(ProtocolError::UnknownOpcode(opcode))?;
        (entry.decode)(self.format, body)
    }

    /// Correlation fields of a decoded response.
    pub fn rpc_header(&self, message: &dyn AnyMessage) -> Option<RpcHeader> {
        let entry = self.by_opcode.get(&message.opcode())?;
        entry.rpc_header.and_then(|f| f(message))
    }

    /// A response of `request_opcode`'s declared type carrying only an error.
    pub fn new_error_response(
        &self,
        request_opcode: u16,
        rpc_id: u32,
        error: i32,
        message: impl Into<String>,
    ) -> Result<Box<dyn AnyMessage>> {
        let make = self
            .by_opcode
            .get(&request_opcode)
            .and_then(|e| e.error_response)
            .ok_or(ProtocolError::UnknownOpcode(request_opcode))?;
        Ok(make(rpc_id, error, message.into()))
    }
}
