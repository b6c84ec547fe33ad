//! WebSocket message codec.
//!
//! The tag stream uses JSON messages over WebSocket text frames. This module
//! provides encoding and decoding utilities for the protocol messages.

use crate::messages::{ClientMessage, ServerMessage};
use thiserror::Error;

/// Errors that can occur during message encoding/decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    /// JSON serialization failed.
    #[error("Failed to serialize message: {0}")]
    Serialize(#[source] serde_json::Error),

    /// Incoming text was not a recognized client message.
    #[error("Failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Encode a server message to a JSON string for WebSocket transmission.
pub fn encode_server_message(msg: &ServerMessage) -> Result<String, CodecError> {
    serde_json::to_string(msg).map_err(CodecError::Serialize)
}

/// Decode a client message from a JSON string received over WebSocket.
pub fn decode_client_message(text: &str) -> Result<ClientMessage, CodecError> {
    serde_json::from_str(text).map_err(CodecError::Decode)
}
