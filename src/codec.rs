//! Message codecs
//!
//! Endpoints serialize values through one of two serde-backed codecs.
//! The codec is chosen per endpoint and must match on both sides of a
//! channel; a mismatch surfaces as a decode failure on the consumer,
//! not as a detectable protocol error. The `send_bytes`/`recv_bytes`
//! operations on every pattern bypass codecs entirely.

use serde::{de::DeserializeOwned, Serialize};

use crate::error::{Result, ShmError};

/// Serialization format for a channel endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    /// Compact Rust-native encoding (default). Not readable from other
    /// languages; use [`Codec::Json`] for cross-language channels.
    #[default]
    Bincode,
    /// Self-describing JSON for maps and lists of primitives;
    /// interoperable with non-Rust peers at some size cost.
    Json,
}

impl Codec {
    /// Serialize `value` to bytes
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            Codec::Bincode => bincode::serialize(value)
                .map_err(|e| ShmError::serialization(format!("bincode encode failed: {}", e))),
            Codec::Json => serde_json::to_vec(value)
                .map_err(|e| ShmError::serialization(format!("JSON encode failed: {}", e))),
        }
    }

    /// Deserialize bytes produced by [`encode`](Self::encode) with the
    /// same codec
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            Codec::Bincode => bincode::deserialize(bytes)
                .map_err(|e| ShmError::serialization(format!("bincode decode failed: {}", e))),
            Codec::Json => serde_json::from_slice(bytes)
                .map_err(|e| ShmError::serialization(format!("JSON decode failed: {}", e))),
        }
    }
}
