//! Presence: live cursors of the other people in a room.
//!
//! Presence is ephemeral. The server periodically pushes the complete set of
//! participants and the local table is replaced wholesale; there is no
//! sequencing and no field-level merging. A stale cursor costs a momentary
//! visual glitch and nothing else.
//!
//! ```text
//! {"type":"presence","clients":[…]}
//!       │
//!       ▼
//! PresenceTable::update()   (replace, keyed by clientId)
//!       │
//!       ▼
//! cursor layer (external)
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ───────────────────────────────────────────────────────────────────
// Wire type
// ───────────────────────────────────────────────────────────────────

/// One participant's cursor as reported by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub client_id: String,
    pub name: String,
    /// Cursor position in board coordinates.
    pub x: f64,
    pub y: f64,
    /// CSS color string for the cursor.
    pub color: String,
    /// Unix millis of the participant's last cursor update.
    pub updated_at: i64,
}

impl PresenceEntry {
    pub fn new(client_id: impl Into<String>, name: impl Into<String>, x: f64, y: f64) -> Self {
        Self {
            client_id: client_id.into(),
            name: name.into(),
            x,
            y,
            color: String::from("#4285f4"),
            updated_at: 0,
        }
    }

    /// Whether the cursor has not moved for longer than `idle_ms`.
    pub fn is_idle(&self, now_ms: i64, idle_ms: i64) -> bool {
        now_ms.saturating_sub(self.updated_at) > idle_ms
    }
}

// ───────────────────────────────────────────────────────────────────
// Table
// ───────────────────────────────────────────────────────────────────

/// Current presence set, keyed by `clientId`.
#[derive(Debug, Clone, Default)]
pub struct PresenceTable {
    entries: HashMap<String, PresenceEntry>,
}

impl PresenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole table with `entries`.
    ///
    /// If a client id appears twice, the later entry wins.
    pub fn update(&mut self, entries: Vec<PresenceEntry>) {
        self.entries = entries
            .into_iter()
            .map(|entry| (entry.client_id.clone(), entry))
            .collect();
    }

    pub fn get(&self, client_id: &str) -> Option<&PresenceEntry> {
        self.entries.get(client_id)
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.entries.contains_key(client_id)
    }

    /// Entries ordered by client id, so cursor layers draw in a stable order.
    pub fn iter(&self) -> impl Iterator<Item = &PresenceEntry> {
        let mut sorted: Vec<&PresenceEntry> = self.entries.values().collect();
        sorted.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        sorted.into_iter()
    }

    /// Entries updated within the last `idle_ms`.
    pub fn active(&self, now_ms: i64, idle_ms: i64) -> Vec<&PresenceEntry> {
        self.iter().filter(|e| !e.is_idle(now_ms, idle_ms)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
