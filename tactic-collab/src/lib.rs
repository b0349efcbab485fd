//! # tactic-collab: real-time sync client for TacticBoard rooms
//!
//! Keeps a local [`Board`](tactic_core::Board) converged with the room server
//! over a WebSocket, buffering local edits and tracking live cursors.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   push/flush    ┌──────────────┐   op frames   ┌──────────────┐
//! │ application  │ ──────────────► │ RoomSession  │ ────────────► │ Connection   │
//! │ (renderer)   │ ◄── Arc<Board>  │  OpBuffer    │ ◄──────────── │ Manager      │
//! └──────────────┘ ◄── events ──── │  Board       │   snapshot /  └──────┬───────┘
//!                                  │  Presence    │   delta /            │
//!                                  └──────────────┘   presence / error   ▼
//!                                                                  room server
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: JSON wire frames (`hello`, `op`, `snapshot`, `delta`, …)
//! - [`transport`]: socket seam and the tokio-tungstenite implementation
//! - [`client`]: connection manager with resume and capped backoff
//! - [`buffer`]: debounced outbound edit buffer
//! - [`presence`]: live cursor table
//! - [`session`]: per-room controller wiring the above
//! - [`rest`]: REST payloads used to seed a session
//! - [`config`]: session settings

pub mod buffer;
pub mod client;
pub mod config;
pub mod error;
pub mod presence;
pub mod protocol;
pub mod rest;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use buffer::OpBuffer;
pub use client::{
    BackoffPolicy, ConnectionEvent, ConnectionHandle, ConnectionManager, ConnectionPhase,
    OfflineQueue, OpenParams, Reconnector, SeqCursor,
};
pub use config::SessionConfig;
pub use error::{ConfigError, ConnectionError, ProtocolError, TransportError};
pub use presence::{PresenceEntry, PresenceTable};
pub use protocol::{Capability, ClientMessage, ServerMessage, SnapshotState};
pub use rest::{RoomInfo, ShareGrant, ShareRequest};
pub use session::{Notice, RoomSession, SessionEvent, SessionHandle, SessionParams, Severity};
pub use transport::{Connector, Frame, Transport, WsConnector, WsTransport};
