//! # Error Types
//!
//! Error handling for the transport, session and RPC layers.
//!
//! ## Error Categories
//! - **Framing Errors**: malformed length prefix or header; always fatal to the connection
//! - **Socket Errors**: OS-level failures and peer disconnects; fatal to the channel
//! - **RPC Errors**: remote error codes, timeouts, disposed sessions
//! - **Routing Errors**: sends to unknown channels or processes
//! - **Registry Errors**: opcode/type table inconsistencies, caught at registration time
//!
//! Channel and service level failures never cross the event loop as errors. They are
//! reported upward as integer codes (see [`codes`]) on the service event stream, and
//! turned into a [`ProtocolError`] only where a caller is waiting for a result.
//!
//! ## Example Usage
//! ```rust
//! use cluster_net::error::{codes, ProtocolError, Result};
//!
//! fn check(code: i32) -> Result<()> {
//!     if codes::is_rpc_need_throw(code) {
//!         return Err(ProtocolError::Rpc { code, message: "remote failure".into() });
//!     }
//!     Ok(())
//! }
//!
//! assert!(check(0).is_ok());
//! assert!(check(42).is_err());
//! ```

use std::io;
use thiserror::Error;

use crate::transport::channel_id::ChannelId;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    pub const ERR_DISPATCHER_WRITE_LOCK: &str = "Failed to acquire write lock on dispatcher";
    pub const ERR_DISPATCHER_READ_LOCK: &str = "Failed to acquire read lock on dispatcher";

    pub const ERR_SERVICE_CLOSED: &str = "Network service is no longer running";
    pub const ERR_RESPONSE_DROPPED: &str = "Pending call dropped without a result";
}

/// Integer error codes carried in responses and in channel error events.
///
/// Codes in `1..=ERR_WITHOUT_EXCEPTION` are raised to the caller of an RPC as a
/// failure; codes above that range are application results returned as values.
pub mod codes {
    pub const ERR_OK: i32 = 0;

    /// Upper bound (inclusive) of the codes that raise on the calling side.
    pub const ERR_WITHOUT_EXCEPTION: i32 = 200_000;

    pub const ERR_PEER_DISCONNECT: i32 = 100_208;
    pub const ERR_SOCKET_ERROR: i32 = 100_210;
    pub const ERR_CONNECT_TIMEOUT: i32 = 100_211;
    pub const ERR_PACKET_PARSER_ERROR: i32 = 100_213;
    pub const ERR_SEND_MESSAGE_NOT_FOUND_CHANNEL: i32 = 100_214;
    pub const ERR_SESSION_IDLE_TIMEOUT: i32 = 100_215;
    pub const ERR_SERVICE_SHUTDOWN: i32 = 100_216;

    pub const ERR_RPC_FAIL: i32 = 110_307;
    pub const ERR_ACTOR_TIMEOUT: i32 = 110_308;
    pub const ERR_CANCEL: i32 = 200_001;

    /// Whether a response carrying `code` must be delivered as a failure.
    pub fn is_rpc_need_throw(code: i32) -> bool {
        match code {
            0 | -1 => false,
            c if c > ERR_WITHOUT_EXCEPTION => false,
            _ => true,
        }
    }
}

// ProtocolError is the primary error type for all transport and RPC operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Deserialize error: {0}")]
    DeserializeError(String),

    #[error("Invalid packet size: {size} (allowed {min}..={max})")]
    InvalidPacketSize { size: usize, min: usize, max: usize },

    #[error("Packet of {0} bytes is shorter than its header")]
    TruncatedHeader(usize),

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Buffer underflow: requested {requested} bytes, {available} available")]
    BufferUnderflow { requested: usize, available: usize },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("No route to process {0}")]
    NoRoute(u32),

    #[error("Unknown opcode: {0}")]
    UnknownOpcode(u16),

    #[error("Opcode {0} registered twice")]
    DuplicateOpcode(u16),

    #[error("Message type not registered: {0}")]
    UnregisteredType(&'static str),

    #[error("Request type {request} declares response opcode {response} which is not registered as a response")]
    MissingResponseType { request: &'static str, response: u16 },

    #[error("Unexpected message type")]
    UnexpectedMessage,

    #[error("Rpc error {code}: {message}")]
    Rpc { code: i32, message: String },

    #[error("Rpc {rpc_id} timed out")]
    RpcTimeout { rpc_id: u32 },

    #[error("Session {channel_id} disposed (error {error})")]
    SessionDisposed { channel_id: ChannelId, error: i32 },

    #[error("Timeout occurred")]
    Timeout,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::codes::*;

    #[test]
    fn test_rpc_throw_ranges() {
        assert!(!is_rpc_need_throw(ERR_OK));
        assert!(!is_rpc_need_throw(-1));
        assert!(is_rpc_need_throw(1));
        assert!(is_rpc_need_throw(ERR_WITHOUT_EXCEPTION));
        assert!(!is_rpc_need_throw(ERR_WITHOUT_EXCEPTION + 1));
        assert!(!is_rpc_need_throw(ERR_CANCEL));
        assert!(is_rpc_need_throw(ERR_RPC_FAIL));
        assert!(is_rpc_need_throw(ERR_ACTOR_TIMEOUT));
    }
}
