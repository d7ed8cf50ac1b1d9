//! # Serialization Formats
//!
//! Payload (de)serialization at the session boundary. The transport only ever
//! sees opaque bodies; this module is the `(value) -> bytes` /
//! `(bytes, type) -> value` pair the session and the opcode registry call.
//!
//! ## Formats
//! - **Bincode**: compact binary, the default for cluster traffic
//! - **Json**: human-readable, handy when debugging a link with a packet dump

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// Supported serialization formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializationFormat {
    /// Binary compact format (default, fastest)
    #[default]
    Bincode,
    /// Human-readable JSON format (debugging, interop)
    Json,
}

impl SerializationFormat {
    /// Get human-readable name
    pub fn name(self) -> &'static str {
        match self {
            SerializationFormat::Bincode => "Bincode",
            SerializationFormat::Json => "JSON",
        }
    }

    /// Serialize a message body.
    pub fn serialize<T: Serialize + ?Sized>(self, value: &T) -> Result<Bytes> {
        let bytes = match self {
            SerializationFormat::Bincode => bincode::serialize(value)?,
            SerializationFormat::Json => serde_json::to_vec(value)
                .map_err(|e| ProtocolError::SerializeError(e.to_string()))?,
        };
        Ok(Bytes::from(bytes))
    }

    /// Deserialize a message body.
    pub fn deserialize<T: DeserializeOwned>(self, data: &[u8]) -> Result<T> {
        match self {
            SerializationFormat::Bincode => bincode::deserialize(data)
                .map_err(|e| ProtocolError::DeserializeError(e.to_string())),
            SerializationFormat::Json => serde_json::from_slice(data)
                .map_err(|e| ProtocolError::DeserializeError(e.to_string())),
        }
    }
}
