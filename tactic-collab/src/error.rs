//! Error types for the sync client.
//!
//! None of these ever escape the event loops as panics: they are reported
//! through [`ConnectionEvent::Error`](crate::client::ConnectionEvent) and
//! turned into user notices by the session.

use thiserror::Error;

/// Failures of the physical socket.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("receive failed: {0}")]
    Receive(String),
    #[error("connection closed")]
    Closed,
}

/// Encoding or decoding a wire frame failed.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("frame is not valid UTF-8")]
    NotUtf8,
}

/// Everything the connection manager reports through its error channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// Socket error or failed connect. A reconnect is already scheduled.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// An inbound frame could not be parsed. The connection stays open.
    #[error("unparseable frame: {0}")]
    Parse(String),
}

impl From<ProtocolError> for ConnectionError {
    fn from(err: ProtocolError) -> Self {
        ConnectionError::Parse(err.to_string())
    }
}

/// Invalid [`SessionConfig`](crate::config::SessionConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
