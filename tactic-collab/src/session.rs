//! Room session: the one controller that owns a room's local state.
//!
//! ```text
//!  SessionHandle ──push/flush/close──► ┌──────────────┐ ◄──ConnectionEvent── ConnectionManager
//!                                      │ session task │ ──op frames────────►        │
//!  watch<Arc<Board>>         ◄──────── │  Board       │                             ▼
//!  watch<Arc<PresenceTable>> ◄──────── │  Presence    │                        WebSocket
//!  SessionEvent              ◄──────── │  OpBuffer    │
//!                                      │  OfflineQueue│
//!                                      └──────────────┘
//! ```
//!
//! Inbound frames, user commands and the debounce deadline are serialized on
//! one task, so nothing here is locked. Readers get immutable `Arc` views; the
//! task mutates copy-on-write and only clones when a reader still holds the
//! previous view.

use std::sync::Arc;

use tactic_core::{ApplyOutcome, Board, Operation};
use tokio::sync::{mpsc, watch};

use crate::buffer::OpBuffer;
use crate::client::{
    ConnectionEvent, ConnectionHandle, ConnectionManager, ConnectionPhase, OfflineQueue,
    OpenParams, SeqCursor,
};
use crate::config::SessionConfig;
use crate::error::ConnectionError;
use crate::presence::PresenceTable;
use crate::protocol::{error_codes, Capability, ClientMessage, ServerMessage};
use crate::rest::RoomInfo;
use crate::transport::Connector;

/// What a session joins.
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub room_id: String,
    pub token: String,
    pub capability: Capability,
    /// Sequence to resume from when there is no seed past it.
    pub resume_from: u64,
    /// Room state fetched over REST, applied before connecting.
    pub seed: Option<RoomInfo>,
}

impl SessionParams {
    pub fn new(room_id: impl Into<String>, token: impl Into<String>, capability: Capability) -> Self {
        Self {
            room_id: room_id.into(),
            token: token.into(),
            capability,
            resume_from: 0,
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: RoomInfo) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn resume_from(mut self, seq: u64) -> Self {
        self.resume_from = seq;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// A message meant for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub severity: Severity,
    pub message: String,
}

impl Notice {
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connected,
    Disconnected,
    /// The board advanced to `seq`.
    BoardChanged { seq: u64 },
    /// The presence table was replaced and now has `count` entries.
    PresenceChanged { count: usize },
    Notice(Notice),
}

enum Command {
    Push(Operation),
    Flush,
    Close,
}

/// Cloneable handle to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    room_id: String,
    capability: Capability,
    commands: mpsc::UnboundedSender<Command>,
    board: watch::Receiver<Arc<Board>>,
    presence: watch::Receiver<Arc<PresenceTable>>,
    connection: ConnectionHandle,
}

impl SessionHandle {
    /// Buffer a local edit. Returns `false` once the session has ended.
    pub fn push(&self, op: Operation) -> bool {
        self.commands.send(Command::Push(op)).is_ok()
    }

    /// Send buffered edits now.
    pub fn flush(&self) {
        let _ = self.commands.send(Command::Flush);
    }

    /// Flush buffered edits, then close the connection for good.
    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }

    /// Current board view.
    pub fn board(&self) -> Arc<Board> {
        self.board.borrow().clone()
    }

    /// Current presence view.
    pub fn presence(&self) -> Arc<PresenceTable> {
        self.presence.borrow().clone()
    }

    pub fn subscribe_board(&self) -> watch::Receiver<Arc<Board>> {
        self.board.clone()
    }

    pub fn subscribe_presence(&self) -> watch::Receiver<Arc<PresenceTable>> {
        self.presence.clone()
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.connection.phase()
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }
}

pub struct RoomSession;

impl RoomSession {
    /// Seed the board, connect, and start the session task.
    pub fn spawn<C: Connector>(
        config: &SessionConfig,
        params: SessionParams,
        connector: C,
    ) -> (SessionHandle, mpsc::Receiver<SessionEvent>) {
        let mut board = Board::with_gap_policy(config.gap_policy);
        board.enter_room(&params.room_id);
        if let Some(info) = &params.seed {
            seed_board(&mut board, &params.room_id, info);
        }

        let cursor = SeqCursor::new(params.resume_from.max(board.latest_seq()));
        let (connection, connection_events) = ConnectionManager::open(
            config,
            OpenParams {
                room_id: params.room_id.clone(),
                token: params.token.clone(),
                capability: params.capability,
                resume_from: cursor.clone(),
            },
            connector,
        );

        let (board_tx, board_rx) = watch::channel(Arc::new(board));
        let (presence_tx, presence_rx) = watch::channel(Arc::new(PresenceTable::new()));
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::channel(config.event_capacity.max(1));
        let (batch_tx, batches) = mpsc::unbounded_channel();

        let task = SessionTask {
            room_id: params.room_id.clone(),
            board: board_tx,
            presence: presence_tx,
            buffer: OpBuffer::new(config.debounce(), move |batch| {
                let _ = batch_tx.send(batch);
            }),
            batches,
            offline: OfflineQueue::new(config.offline_queue_limit),
            cursor,
            connection: connection.clone(),
            connection_events,
            commands,
            events,
            last_sent_seq: 0,
            connected: false,
            replay_pending: false,
            resync_pending: false,
            closing: false,
        };
        tokio::spawn(task.run());

        let handle = SessionHandle {
            room_id: params.room_id,
            capability: params.capability,
            commands: commands_tx,
            board: board_rx,
            presence: presence_rx,
            connection,
        };
        (handle, events_rx)
    }
}

fn seed_board(board: &mut Board, room_id: &str, info: &RoomInfo) {
    if info.id != room_id {
        log::warn!("Ignoring seed for room {} (joining {room_id})", info.id);
        return;
    }
    if let Some((seq, nodes)) = info.seed() {
        let count = nodes.len();
        if board.apply_snapshot(seq, nodes).is_applied() {
            log::info!("Seeded room {room_id} with {count} nodes at seq {seq}");
        }
    }
}

struct SessionTask<S>
where
    S: FnMut(Vec<Operation>),
{
    room_id: String,
    board: watch::Sender<Arc<Board>>,
    presence: watch::Sender<Arc<PresenceTable>>,
    buffer: OpBuffer<S>,
    batches: mpsc::UnboundedReceiver<Vec<Operation>>,
    offline: OfflineQueue,
    cursor: SeqCursor,
    connection: ConnectionHandle,
    connection_events: mpsc::Receiver<ConnectionEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::Sender<SessionEvent>,
    /// Highest `op.seq` sent on the current connection.
    last_sent_seq: u64,
    connected: bool,
    /// Set on open; outbound batches wait until the server's catch-up lands.
    replay_pending: bool,
    resync_pending: bool,
    closing: bool,
}

impl<S> SessionTask<S>
where
    S: FnMut(Vec<Operation>) + Send,
{
    async fn run(mut self) {
        loop {
            tokio::select! {
                event = self.connection_events.recv() => match event {
                    Some(event) => self.on_connection_event(event).await,
                    None => break,
                },
                command = self.commands.recv(), if !self.closing => match command {
                    Some(Command::Push(op)) => self.buffer.push(op),
                    Some(Command::Flush) => self.buffer.flush(),
                    Some(Command::Close) | None => {
                        self.buffer.flush();
                        self.closing = true;
                    }
                },
                _ = self.buffer.expired() => {}
            }

            self.send_batches().await;
            if self.closing {
                if self.replay_pending {
                    self.replay_offline().await;
                }
                self.connection.close();
            }
        }

        if !self.offline.is_empty() {
            log::warn!(
                "Session for room {} ended with {} unsent ops",
                self.room_id,
                self.offline.len()
            );
        }
        log::debug!("Session for room {} stopped", self.room_id);
    }

    async fn on_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Opened => {
                self.connected = true;
                self.resync_pending = false;
                self.last_sent_seq = 0;
                self.replay_pending = true;
                self.emit(SessionEvent::Connected).await;
            }
            ConnectionEvent::Closed { clean, reason } => {
                log::debug!("Room {} disconnected (clean={clean}): {reason}", self.room_id);
                self.connected = false;
                self.emit(SessionEvent::Disconnected).await;
                if !clean {
                    self.emit(SessionEvent::Notice(Notice::warning("Connection interrupted")))
                        .await;
                }
            }
            ConnectionEvent::Message(msg) => self.route(msg).await,
            ConnectionEvent::Error(ConnectionError::Transport(e)) => {
                log::warn!("Room {}: {e}", self.room_id);
                // a live socket reports the loss again as an unclean Closed
                if !self.connected {
                    self.emit(SessionEvent::Notice(Notice::warning("Connection interrupted")))
                        .await;
                }
            }
            ConnectionEvent::Error(ConnectionError::Parse(e)) => {
                log::warn!("Room {}: {e}", self.room_id);
                self.emit(SessionEvent::Notice(Notice::warning(
                    "Received a malformed message",
                )))
                .await;
            }
            ConnectionEvent::Reconnecting { attempt, delay } => {
                log::info!(
                    "Room {} reconnect attempt {attempt} in {}ms",
                    self.room_id,
                    delay.as_millis()
                );
            }
        }
    }

    async fn route(&mut self, msg: ServerMessage) {
        match msg {
            ServerMessage::Snapshot { room_id, seq, state } => {
                if !self.is_this_room(&room_id) {
                    return;
                }
                let outcome = self.apply(|board| {
                    match board.admit_snapshot(seq) {
                        ApplyOutcome::Applied { .. } => Arc::make_mut(board).apply_snapshot(seq, state.nodes),
                        other => other,
                    }
                });
                self.after_apply(outcome).await;
            }
            ServerMessage::Delta { room_id, from, to, ops } => {
                if !self.is_this_room(&room_id) {
                    return;
                }
                let outcome = self.apply(|board| match board.admit_delta(from, to) {
                    ApplyOutcome::Applied { .. } => Arc::make_mut(board).apply_delta(from, to, ops),
                    other => other,
                });
                self.after_apply(outcome).await;
            }
            ServerMessage::Presence { clients } => {
                let mut count = 0;
                self.presence.send_modify(|table| {
                    let table = Arc::make_mut(table);
                    table.update(clients);
                    count = table.len();
                });
                self.emit(SessionEvent::PresenceChanged { count }).await;
            }
            ServerMessage::Error { code, msg } => {
                log::warn!("Room {} server error [{code}]: {msg}", self.room_id);
                if code == error_codes::CONFLICT {
                    // later batches were numbered after the rejected one
                    self.last_sent_seq = 0;
                }
                self.emit(SessionEvent::Notice(Notice::error(msg))).await;
            }
            ServerMessage::Pong { .. } | ServerMessage::Unknown => {}
        }
    }

    fn is_this_room(&self, room_id: &str) -> bool {
        if room_id == self.room_id {
            return true;
        }
        log::warn!("Dropping frame for room {room_id} (joined {})", self.room_id);
        false
    }

    /// Run `f` against the board, notifying readers only if it applied.
    fn apply(&mut self, f: impl FnOnce(&mut Arc<Board>) -> ApplyOutcome) -> ApplyOutcome {
        let mut outcome = None;
        self.board.send_if_modified(|board| {
            let result = f(board);
            outcome = Some(result);
            result.is_applied()
        });
        outcome.unwrap_or(ApplyOutcome::Stale { seq: 0, latest: 0 })
    }

    async fn after_apply(&mut self, outcome: ApplyOutcome) {
        match outcome {
            ApplyOutcome::Applied { seq } => {
                self.cursor.advance(seq);
                self.emit(SessionEvent::BoardChanged { seq }).await;
                self.replay_after_catch_up().await;
            }
            ApplyOutcome::Stale { .. } => self.replay_after_catch_up().await,
            ApplyOutcome::Gap { expected, from, to } => {
                if self.resync_pending {
                    log::debug!("Gap {from}..{to} while resync already pending");
                    return;
                }
                log::info!(
                    "Room {} missed ops {}..{from}; resyncing",
                    self.room_id,
                    expected + 1
                );
                self.resync_pending = true;
                self.connection.resync();
            }
        }
    }

    async fn send_batches(&mut self) {
        while let Ok(batch) = self.batches.try_recv() {
            self.send_ops(batch).await;
        }
    }

    async fn send_ops(&mut self, ops: Vec<Operation>) {
        if ops.is_empty() {
            return;
        }
        if self.replay_pending {
            self.queue_offline(ops).await;
            return;
        }
        let seq = self.board.borrow().latest_seq().max(self.last_sent_seq) + 1;
        let count = ops.len();
        let msg = ClientMessage::op(self.room_id.clone(), seq, ops);
        if self.connection.send(&msg) {
            log::debug!("-> op seq={seq} ({count} ops)");
            self.last_sent_seq = seq;
            return;
        }
        if let ClientMessage::Op { ops, .. } = msg {
            self.queue_offline(ops).await;
        }
    }

    async fn queue_offline(&mut self, ops: Vec<Operation>) {
        let dropped = self.offline.enqueue(ops);
        log::debug!("Queued ops offline ({} pending)", self.offline.len());
        if dropped > 0 {
            log::warn!("Offline queue full; dropped {dropped} ops");
            self.emit(SessionEvent::Notice(Notice::warning(format!(
                "Offline edit queue is full; {dropped} edits were dropped"
            ))))
            .await;
        }
    }

    /// First snapshot or delta after opening: the board has caught up.
    async fn replay_after_catch_up(&mut self) {
        if self.replay_pending {
            self.replay_offline().await;
        }
    }

    async fn replay_offline(&mut self) {
        self.replay_pending = false;
        if self.offline.is_empty() {
            return;
        }
        let ops = self.offline.drain();
        log::info!("Replaying {} queued ops", ops.len());
        self.send_ops(ops).await;
    }

    async fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event).await;
    }
}
