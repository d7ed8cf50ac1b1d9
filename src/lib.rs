//! # cluster-net
//!
//! TCP transport and RPC substrate for a cluster of cooperating processes.
//!
//! Two wire variants share one stack: the *inner* protocol between processes
//! of the cluster (frames carry a target actor id) and the *outer* protocol
//! toward untrusted clients (no actor id, smaller frames).
//!
//! ## Layers
//! - [`core`]: ring buffers, framing and payload serialization
//! - [`transport`]: channels and the per-service driver task
//! - [`protocol`]: message traits, the opcode registry and the dispatcher
//! - [`service`]: sessions with RPC correlation, the network that routes
//!   messages to them, and cross-process actor calls
//!
//! ## Quick Start
//! ```rust,ignore
//! use std::sync::Arc;
//! use cluster_net::config::NetworkConfig;
//! use cluster_net::protocol::{MessageDispatcher, OpcodeRegistry};
//! use cluster_net::service::Network;
//! use cluster_net::transport::ChannelIdGenerator;
//!
//! let registry = Arc::new(OpcodeRegistry::builder()
//!     .request::<Login>()
//!     .response::<LoginReply>()
//!     .build()?);
//! let dispatcher = Arc::new(MessageDispatcher::new());
//! dispatcher.on_request::<Login, _, _>(|_ctx, login| async move {
//!     Ok(LoginReply { token: issue_token(&login.user), ..Default::default() })
//! })?;
//!
//! let config = NetworkConfig::from_file("node.toml")?;
//! let network = Network::start(&config, registry, dispatcher, Arc::new(ChannelIdGenerator::new()))?;
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use config::NetworkConfig;
pub use error::{ProtocolError, Result};
pub use protocol::{ActorId, Message, MessageDispatcher, OpcodeRegistry, Request, Response};
pub use service::{ActorMessageSender, Network, Session};
