//! Protocol message types for WebSocket communication.
//!
//! This module defines all message types exchanged over the tag stream:
//! - Server → Client: Hello, ChangeNotification, SubscribeResponse,
//!   UnsubscribeResponse, WriteResponse
//! - Client → Server: Subscribe, Unsubscribe, Write
//!
//! Messages are serialized as JSON over WebSocket text frames.

use serde::{Deserialize, Serialize};
use tagserve_core::Value;

/// Render a timestamp in the wire format (RFC 3339, millisecond precision,
/// UTC).
pub fn wire_timestamp(t: chrono::DateTime<chrono::Utc>) -> String {
    t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Subscription request: create one monitored item per spec entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeRequest {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub subscribe: Vec<MonitorSpec>,
}

/// A single monitored-item specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSpec {
    /// Target node id.
    pub node: String,

    /// Requested sampling interval in milliseconds. The server clamps this
    /// to its configured floor; omitted means the server default.
    #[serde(rename = "samplingInterval", skip_serializing_if = "Option::is_none")]
    pub sampling_interval: Option<u64>,
}

/// Per-spec outcomes of a subscribe request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeResponse {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub results: Vec<MonitorOutcome>,
}

/// Outcome of one monitored-item creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorOutcome {
    pub node: String,

    /// 0 on success, HTTP-flavored error code otherwise.
    #[serde(rename = "statusCode")]
    pub status_code: u16,

    /// Id of the created item; used in unsubscribe requests and carried in
    /// every notification for this item.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<u32>,

    /// The interval actually granted after clamping, in milliseconds.
    #[serde(
        rename = "revisedSamplingInterval",
        skip_serializing_if = "Option::is_none"
    )]
    pub revised_sampling_interval: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Unsubscribe request: delete monitored items by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsubscribeRequest {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub unsubscribe: Vec<u32>,
}

/// Which of the requested item ids were removed, and which were refused
/// (unknown, or owned by another connection).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsubscribeResponse {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub removed: Vec<u32>,
    pub failed: Vec<u32>,
}

/// Write request: replace one node's value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteRequest {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub write: WriteSpec,
}

/// Write specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteSpec {
    pub node: String,
    pub value: Value,
}

/// Write response message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteResponse {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub state: RequestState,
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Request completion state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestState {
    Completed,
    Failed,
}

/// A sampled change delivered for one monitored item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeNotification {
    /// Monitored-item id this change belongs to.
    pub item: u32,
    pub node: String,
    pub value: Value,
    /// Sample timestamp (RFC 3339, UTC).
    pub timestamp: String,
}

// ============================================================================
// Hello Message (Server → Client on connect)
// ============================================================================

/// Hello message sent by the server immediately on WebSocket connection.
///
/// # Example
/// ```json
/// {
///   "name": "tagserve",
///   "version": "0.1.0",
///   "timestamp": "2026-01-17T10:30:00.000Z"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloMessage {
    /// Server name identifier.
    pub name: String,

    /// Server version.
    pub version: String,

    /// Current server timestamp in ISO 8601 format.
    pub timestamp: String,
}

impl HelloMessage {
    /// Create a new Hello message stamped with the current time.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            timestamp: wire_timestamp(chrono::Utc::now()),
        }
    }
}

// ============================================================================
// Unified Message Enums
// ============================================================================

/// Messages that can be sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    /// Hello message sent on connection.
    Hello(HelloMessage),

    /// A sampled value change.
    Notification(ChangeNotification),

    /// Per-item results of a subscribe request.
    SubscribeResponse(SubscribeResponse),

    /// Results of an unsubscribe request.
    UnsubscribeResponse(UnsubscribeResponse),

    /// Response to a write request.
    WriteResponse(WriteResponse),
}

/// Messages that can be received from a client.
///
/// Uses untagged deserialization - the message type is determined by
/// examining which fields are present.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientMessage {
    /// Create monitored items.
    Subscribe(SubscribeRequest),

    /// Delete monitored items.
    Unsubscribe(UnsubscribeRequest),

    /// Write a node value.
    Write(WriteRequest),
}
