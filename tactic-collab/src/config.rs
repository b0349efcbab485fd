//! Client configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tactic_core::GapPolicy;

use crate::client::BackoffPolicy;
use crate::error::ConfigError;

/// Settings for a room session and its connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Server origin, e.g. `https://board.example.com` or `ws://127.0.0.1:8080`.
    pub server_url: String,
    /// Debounce window for local edits.
    pub debounce_ms: u64,
    /// First reconnect delay is `2 * backoff_base_ms`.
    pub backoff_base_ms: u64,
    /// Upper bound on the reconnect delay.
    pub backoff_max_ms: u64,
    /// Handling of deltas that skip sequence numbers.
    pub gap_policy: GapPolicy,
    /// Send an application-level `ping` this often while connected.
    pub ping_interval_ms: Option<u64>,
    /// Capacity of the event channels handed to the application.
    pub event_capacity: usize,
    /// Maximum number of operations held while disconnected.
    pub offline_queue_limit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:8080".to_string(),
            debounce_ms: 200,
            backoff_base_ms: 1_000,
            backoff_max_ms: 8_000,
            gap_policy: GapPolicy::Resync,
            ping_interval_ms: None,
            event_capacity: 256,
            offline_queue_limit: 10_000,
        }
    }
}

impl SessionConfig {
    /// Default settings against `server_url`.
    pub fn for_server(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Self::default()
        }
    }

    /// Read a JSON config file. Missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_url.trim().is_empty() {
            return Err(ConfigError::Invalid("server_url is empty".into()));
        }
        if self.backoff_base_ms == 0 {
            return Err(ConfigError::Invalid("backoff_base_ms must be positive".into()));
        }
        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(ConfigError::Invalid(
                "backoff_max_ms must be at least backoff_base_ms".into(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid("event_capacity must be positive".into()));
        }
        if self.ping_interval_ms == Some(0) {
            return Err(ConfigError::Invalid("ping_interval_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn ping_interval(&self) -> Option<Duration> {
        self.ping_interval_ms.map(Duration::from_millis)
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(self.backoff_base_ms),
            max: Duration::from_millis(self.backoff_max_ms),
        }
    }

    /// WebSocket endpoint for `room_id`.
    ///
    /// `http` origins map to `ws`, `https` to `wss`.
    pub fn room_url(&self, room_id: &str) -> String {
        let base = self.server_url.trim().trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        format!("{base}/ws/room/{room_id}")
    }
}
