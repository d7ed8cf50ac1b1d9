//! Message types and node helpers shared by the integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use cluster_net::config::NetworkConfig;
use cluster_net::core::packet::ServiceKind;
use cluster_net::protocol::message::{
    ActorMessage, ActorRequest, ActorResponse, Message, Request, Response,
};
use cluster_net::protocol::{MessageDispatcher, OpcodeRegistry};
use cluster_net::service::Network;
use cluster_net::transport::ChannelIdGenerator;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Add {
    pub rpc_id: u32,
    pub a: i64,
    pub b: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Sum {
    pub rpc_id: u32,
    pub error: i32,
    pub message: String,
    pub value: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deposit {
    pub rpc_id: u32,
    pub amount: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Balance {
    pub rpc_id: u32,
    pub error: i32,
    pub message: String,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Touch {
    pub marker: u32,
}

impl Message for Add {
    const OPCODE: u16 = 100;
}
impl Message for Sum {
    const OPCODE: u16 = 101;
}
impl Message for Chat {
    const OPCODE: u16 = 7;
}
impl Message for Deposit {
    const OPCODE: u16 = 300;
}
impl Message for Balance {
    const OPCODE: u16 = 301;
}
impl Message for Touch {
    const OPCODE: u16 = 302;
}

impl Request for Add {
    type Response = Sum;
    fn rpc_id(&self) -> u32 {
        self.rpc_id
    }
    fn set_rpc_id(&mut self, rpc_id: u32) {
        self.rpc_id = rpc_id;
    }
}

impl Request for Deposit {
    type Response = Balance;
    fn rpc_id(&self) -> u32 {
        self.rpc_id
    }
    fn set_rpc_id(&mut self, rpc_id: u32) {
        self.rpc_id = rpc_id;
    }
}

impl Response for Sum {
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

impl Response for Balance {
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

impl ActorRequest for Deposit {}
impl ActorResponse for Balance {}
impl ActorMessage for Touch {}

pub fn registry() -> Arc<OpcodeRegistry> {
    Arc::new(
        OpcodeRegistry::builder()
            .request::<Add>()
            .response::<Sum>()
            .message::<Chat>()
            .actor_request::<Deposit>()
            .actor_response::<Balance>()
            .actor_message::<Touch>()
            .build()
            .unwrap(),
    )
}

pub fn config(kind: ServiceKind, process: u32, listen: bool) -> NetworkConfig {
    NetworkConfig::default_with_overrides(|c| {
        c.service.kind = kind;
        c.service.address = "127.0.0.1:0".to_string();
        c.service.listen = listen;
        c.service.connect_timeout = Duration::from_secs(2);
        c.actor.process = process;
    })
}

/// A listening node on an ephemeral port.
pub fn server(kind: ServiceKind, process: u32, dispatcher: MessageDispatcher) -> (Network, SocketAddr) {
    let network = Network::start(
        &config(kind, process, true),
        registry(),
        Arc::new(dispatcher),
        Arc::new(ChannelIdGenerator::new()),
    )
    .unwrap();
    let addr = network.local_addr().unwrap();
    (network, addr)
}

/// A node that only dials out.
pub fn client(kind: ServiceKind, process: u32) -> Network {
    Network::start(
        &config(kind, process, false),
        registry(),
        Arc::new(MessageDispatcher::new()),
        Arc::new(ChannelIdGenerator::new()),
    )
    .unwrap()
}

pub const WAIT: Duration = Duration::from_secs(5);

/// Poll `check` until it holds or `WAIT` runs out.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
