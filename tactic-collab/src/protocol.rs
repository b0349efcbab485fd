//! JSON wire protocol between board clients and the room server.
//!
//! One JSON object per WebSocket text frame, discriminated by `type`:
//!
//! ```text
//! client → server   hello    {roomId, cap, token, since}
//!                   op       {roomId, seq, ops}
//!                   ping     {ts}
//! server → client   snapshot {roomId, seq, state: {nodes}}
//!                   delta    {roomId, from, to, ops}
//!                   presence {clients}
//!                   error    {code, msg}
//!                   pong     {ts}
//! ```
//!
//! Inbound frames are validated once, here, into [`ServerMessage`]. Frame
//! types this build does not know decode to [`ServerMessage::Unknown`] and
//! are ignored by callers; anything else that fails to decode is a
//! [`ProtocolError`].

use serde::{Deserialize, Serialize};
use tactic_core::{Node, Operation};

use crate::error::ProtocolError;
use crate::presence::PresenceEntry;

/// Permission level granted for a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    #[default]
    View,
    Edit,
}

impl Capability {
    pub fn can_edit(self) -> bool {
        self == Capability::Edit
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Capability::View => "view",
            Capability::Edit => "edit",
        }
    }
}

impl std::str::FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "view" => Ok(Capability::View),
            "edit" => Ok(Capability::Edit),
            other => Err(format!("unknown capability '{other}'")),
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error codes the server is known to send.
pub mod error_codes {
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const CONFLICT: &str = "conflict";
    pub const INVALID: &str = "invalid";
    pub const SERVER_ERROR: &str = "server_error";
}

/// Room state carried by a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotState {
    #[serde(default)]
    pub nodes: Vec<Node>,
}

/// Frames sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// First frame on every physical connection.
    #[serde(rename_all = "camelCase")]
    Hello {
        room_id: String,
        cap: Capability,
        token: String,
        /// Last sequence this client has applied.
        since: u64,
    },
    /// A batch of local edits. `seq` is the sequence the batch expects to get.
    #[serde(rename_all = "camelCase")]
    Op {
        room_id: String,
        seq: u64,
        ops: Vec<Operation>,
    },
    /// Application-level keepalive (unix millis).
    Ping { ts: i64 },
}

impl ClientMessage {
    pub fn hello(room_id: impl Into<String>, cap: Capability, token: impl Into<String>, since: u64) -> Self {
        ClientMessage::Hello {
            room_id: room_id.into(),
            cap,
            token: token.into(),
            since,
        }
    }

    pub fn op(room_id: impl Into<String>, seq: u64, ops: Vec<Operation>) -> Self {
        ClientMessage::Op {
            room_id: room_id.into(),
            seq,
            ops,
        }
    }

    pub fn ping(ts: i64) -> Self {
        ClientMessage::Ping { ts }
    }

    /// Serialize to a text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }
}

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Full room state at `seq`.
    #[serde(rename_all = "camelCase")]
    Snapshot {
        room_id: String,
        seq: u64,
        state: SnapshotState,
    },
    /// Operations advancing the room from `from` to `to`.
    #[serde(rename_all = "camelCase")]
    Delta {
        room_id: String,
        from: u64,
        to: u64,
        ops: Vec<Operation>,
    },
    /// Complete set of live cursors.
    Presence { clients: Vec<PresenceEntry> },
    /// Problem reported by the server. Not fatal to the connection.
    Error { code: String, msg: String },
    /// Reply to a `ping`.
    Pong {
        #[serde(default)]
        ts: i64,
    },
    /// A frame type this build does not handle.
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    /// Parse a text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Decode)
    }

    /// Parse a binary frame holding UTF-8 JSON.
    pub fn decode_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(bytes).map_err(|_| ProtocolError::NotUtf8)?;
        Self::decode(text)
    }

    /// The `type` tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Snapshot { .. } => "snapshot",
            ServerMessage::Delta { .. } => "delta",
            ServerMessage::Presence { .. } => "presence",
            ServerMessage::Error { .. } => "error",
            ServerMessage::Pong { .. } => "pong",
            ServerMessage::Unknown => "unknown",
        }
    }

    /// Serialize to a text frame. Used by test servers and tooling.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }
}

/// Current wall-clock time in unix milliseconds, for `ping` frames.
pub fn unix_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
