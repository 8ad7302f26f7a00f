//! Error types for the protocol crate.

use thiserror::Error;

/// Failure while encoding or decoding a wire envelope.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Failed to serialize an outbound envelope.
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// Inbound frame was not a well-formed envelope.
    #[error("decode failed: {0}")]
    Decode(#[source] serde_json::Error),
}
