//! Envelope definitions for the browser-facing JSON protocol.
//!
//! Frames travel as WebSocket text (binary frames are treated as UTF-8
//! JSON by the transport layer). The envelope is adjacently tagged:
//! the `type` field names the message, `data` carries the payload.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Messages emitted by the server to a connected client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Raw PTY output carried as a text payload.
    Output(String),
    /// Role assigned to the receiving client.
    Role(RoleAssignment),
    /// Current number of connected clients.
    Clients(ClientCount),
}

/// Messages accepted by the server from a client.
///
/// Unknown `type` values fail to decode; callers drop such frames.
/// Unknown fields inside a known payload are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Keystrokes destined for the PTY.
    Input(String),
    /// Request to change the PTY window size.
    Resize(WindowSize),
}

/// A client's role within the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Allowed to type into the PTY.
    Controller,
    /// Read-only.
    Viewer,
}

/// Payload of a `role` message.
///
/// `shared_input` is present on the initial assignment and omitted on
/// promotion, so clients learn the input mode exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    /// The assigned role.
    pub role: Role,
    /// Whether every client may type, regardless of role.
    #[serde(
        rename = "sharedInput",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub shared_input: Option<bool>,
}

/// Payload of a `clients` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCount {
    /// Number of currently connected clients.
    pub count: usize,
}

/// Payload of a `resize` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSize {
    /// Columns.
    pub cols: u16,
    /// Rows.
    pub rows: u16,
}

impl ServerMessage {
    /// Builds an `output` envelope from raw PTY bytes.
    ///
    /// The transport is strictly Unicode, so invalid UTF-8 sequences
    /// are replaced rather than rejected.
    pub fn output_from_bytes(data: &[u8]) -> Self {
        ServerMessage::Output(String::from_utf8_lossy(data).into_owned())
    }
}

/// Serializes a server envelope to its wire form.
pub fn encode_server(msg: &ServerMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(msg).map_err(ProtocolError::Encode)
}

/// Parses an inbound frame into a client envelope.
pub fn decode_client(frame: &str) -> Result<ClientMessage, ProtocolError> {
    serde_json::from_str(frame).map_err(ProtocolError::Decode)
}
