//! Payloads of the room REST endpoints.
//!
//! No HTTP client lives here; callers fetch with whatever they have and hand
//! the decoded [`RoomInfo`] to the session as its seed.
//!
//! ```text
//! GET  /api/rooms/{id}        → RoomInfo
//! POST /api/rooms/{id}/share  ShareRequest → ShareGrant
//! ```

use serde::{Deserialize, Serialize};
use tactic_core::Node;

use crate::protocol::{Capability, SnapshotState};

/// Share links live one day unless asked otherwise.
pub const DEFAULT_SHARE_TTL_MINUTES: u32 = 24 * 60;
/// The server caps share links at one week.
pub const MAX_SHARE_TTL_MINUTES: u32 = 7 * 24 * 60;

pub fn room_path(room_id: &str) -> String {
    format!("/api/rooms/{room_id}")
}

pub fn share_path(room_id: &str) -> String {
    format!("/api/rooms/{room_id}/share")
}

/// Persisted snapshot attached to a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub seq: u64,
    #[serde(default)]
    pub state: SnapshotState,
}

/// `GET /api/rooms/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub id: String,
    pub current_seq: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<RoomSnapshot>,
}

impl RoomInfo {
    /// Initial board contents, if the room has a snapshot.
    pub fn seed(&self) -> Option<(u64, Vec<Node>)> {
        self.snapshot
            .as_ref()
            .map(|snapshot| (snapshot.seq, snapshot.state.nodes.clone()))
    }
}

/// Body of `POST /api/rooms/{id}/share`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareRequest {
    pub role: Capability,
    pub ttl_minutes: u32,
}

impl ShareRequest {
    /// `ttl_minutes` of zero means the default; larger values are capped.
    pub fn new(role: Capability, ttl_minutes: u32) -> Self {
        let ttl_minutes = match ttl_minutes {
            0 => DEFAULT_SHARE_TTL_MINUTES,
            ttl => ttl.min(MAX_SHARE_TTL_MINUTES),
        };
        Self { role, ttl_minutes }
    }
}

/// Response of the share endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareGrant {
    pub token: String,
    pub role: Capability,
    /// RFC 3339 timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<String>,
    /// Relative link, e.g. `/room/{id}?token=…`.
    pub link: String,
}

/// Error body returned with non-2xx statuses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
}
