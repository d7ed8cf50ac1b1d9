//! Payload types shared by the unit tests.

use serde::{Deserialize, Serialize};

use crate::protocol::message::{
    ActorMessage, ActorRequest, ActorResponse, Message, Request, Response,
};
use crate::protocol::opcode::OpcodeRegistry;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EchoRequest {
    pub rpc_id: u32,
    pub text: String,
}

impl EchoRequest {
    pub fn new(text: &str) -> Self {
        Self {
            rpc_id: 0,
            text: text.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EchoResponse {
    pub rpc_id: u32,
    pub error: i32,
    pub message: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notice {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoticeClash {
    pub code: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMove {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorPing {
    pub rpc_id: u32,
    pub value: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActorPong {
    pub rpc_id: u32,
    pub error: i32,
    pub message: String,
    pub value: u64,
}

impl Message for EchoRequest {
    const OPCODE: u16 = 100;
}
impl Message for EchoResponse {
    const OPCODE: u16 = 101;
}
impl Message for Notice {
    const OPCODE: u16 = 7;
}
impl Message for NoticeClash {
    const OPCODE: u16 = 7;
}
impl Message for ClientMove {
    const OPCODE: u16 = 10_005;
}
impl Message for ActorPing {
    const OPCODE: u16 = 200;
}
impl Message for ActorPong {
    const OPCODE: u16 = 201;
}

impl Request for EchoRequest {
    type Response = EchoResponse;

    fn rpc_id(&self) -> u32 {
        self.rpc_id
    }
    fn set_rpc_id(&mut self, rpc_id: u32) {
        self.rpc_id = rpc_id;
    }
}

impl Request for ActorPing {
    type Response = ActorPong;

    fn rpc_id(&self) -> u32 {
        self.rpc_id
    }
    fn set_rpc_id(&mut self, rpc_id: u32) {
        self.rpc_id = rpc_id;
    }
}

macro_rules! impl_response {
    ($ty:ty) => {
        impl Response for $ty {
            fn rpc_id(&self) -> u32 {
                self.rpc_id
            }
            fn set_rpc_id(&mut self, rpc_id: u32) {
                self.rpc_id = rpc_id;
            }
            fn error(&self) -> i32 {
                self.error
            }
            fn set_error(&mut self, error: i32) {
                self.error = error;
            }
            fn message(&self) -> &str {
                &self.message
            }
            fn set_message(&mut self, message: String) {
                self.message = message;
            }
        }
    };
}

impl_response!(EchoResponse);
impl_response!(ActorPong);

impl ActorMessage for ClientMove {}
impl ActorRequest for ActorPing {}
impl ActorResponse for ActorPong {}

pub fn fixture_registry() -> OpcodeRegistry {
    OpcodeRegistry::builder()
        .request::<EchoRequest>()
        .response::<EchoResponse>()
        .message::<Notice>()
        .actor_message::<ClientMove>()
        .actor_request::<ActorPing>()
        .actor_response::<ActorPong>()
        .build()
        .expect("fixture registry is consistent")
}
