//! # tagserve-protocol
//!
//! Tagserve protocol message types and codec.
//!
//! This crate defines the WebSocket message formats and their JSON codec.

pub mod codec;
pub mod messages;

pub use codec::{decode_client_message, encode_server_message, CodecError};
pub use messages::*;
