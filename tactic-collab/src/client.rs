//! Connection manager: one logical room connection over many physical sockets.
//!
//! Provides:
//! - Connection lifecycle (connect, hello, reconnect with capped backoff, close)
//! - Resume cursor so every `hello` carries the latest applied sequence
//! - Best-effort outbound sends and a typed inbound event stream
//! - Offline queue for edits made while disconnected
//!
//! ```text
//! Idle ──► Connecting ──► Open ──► Backoff(n) ──► Connecting ──► …
//!   │           │           │           │
//!   └───────────┴─── close() ───────────┴──► Closed (terminal)
//! ```
//!
//! The worker task owns the socket and its timers and never touches board
//! state; everything it learns goes out through [`ConnectionEvent`]s.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tactic_core::Operation;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval};

use crate::config::SessionConfig;
use crate::error::{ConnectionError, ProtocolError, TransportError};
use crate::protocol::{unix_millis, Capability, ClientMessage, ServerMessage};
use crate::transport::{Connector, Frame, Transport};

// ───────────────────────────────────────────────────────────────────
// Backoff
// ───────────────────────────────────────────────────────────────────

/// Exponential reconnect delay: `min(base * 2^attempt, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1_000),
            max: Duration::from_millis(8_000),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

// ───────────────────────────────────────────────────────────────────
// State machine
// ───────────────────────────────────────────────────────────────────

/// Observable phase of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Idle,
    Connecting,
    Open,
    /// Waiting before reconnect attempt `attempt`.
    Backoff { attempt: u32 },
    Closed,
}

/// Pure reconnect bookkeeping, independent of sockets and timers.
#[derive(Debug, Clone)]
pub struct Reconnector {
    policy: BackoffPolicy,
    phase: ConnectionPhase,
    attempt: u32,
}

impl Reconnector {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            phase: ConnectionPhase::Idle,
            attempt: 0,
        }
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_closed(&self) -> bool {
        self.phase == ConnectionPhase::Closed
    }

    /// Start a physical connect. Returns `false` once closed.
    pub fn begin_connect(&mut self) -> bool {
        if self.is_closed() {
            return false;
        }
        self.phase = ConnectionPhase::Connecting;
        true
    }

    /// The socket is up and `hello` has been written.
    pub fn opened(&mut self) {
        if self.is_closed() {
            return;
        }
        self.attempt = 0;
        self.phase = ConnectionPhase::Open;
    }

    /// A connect failed or an open socket dropped.
    ///
    /// Returns the delay before the next attempt, or `None` once closed.
    pub fn disrupted(&mut self) -> Option<Duration> {
        if self.is_closed() {
            return None;
        }
        self.attempt = self.attempt.saturating_add(1);
        self.phase = ConnectionPhase::Backoff {
            attempt: self.attempt,
        };
        Some(self.policy.delay_for(self.attempt))
    }

    pub fn close(&mut self) {
        self.phase = ConnectionPhase::Closed;
    }
}

// ───────────────────────────────────────────────────────────────────
// Resume cursor
// ───────────────────────────────────────────────────────────────────

/// Shared latest-applied sequence. Only moves forward.
#[derive(Debug, Clone, Default)]
pub struct SeqCursor(Arc<AtomicU64>);

impl SeqCursor {
    pub fn new(seq: u64) -> Self {
        Self(Arc::new(AtomicU64::new(seq)))
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Raise the cursor to `seq`; lower values are ignored.
    pub fn advance(&self, seq: u64) {
        self.0.fetch_max(seq, Ordering::AcqRel);
    }
}

// ───────────────────────────────────────────────────────────────────
// Offline queue
// ───────────────────────────────────────────────────────────────────

/// Operations flushed while the socket was down, in flush order.
///
/// Bounded by operation count; overflow is refused.
#[derive(Debug, Clone)]
pub struct OfflineQueue {
    queue: VecDeque<Operation>,
    max_size: usize,
}

impl OfflineQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(max_size.min(1024)),
            max_size,
        }
    }

    /// Queue a batch. Returns how many operations did not fit.
    pub fn enqueue(&mut self, ops: Vec<Operation>) -> usize {
        let room = self.max_size.saturating_sub(self.queue.len());
        let dropped = ops.len().saturating_sub(room);
        self.queue.extend(ops.into_iter().take(room));
        dropped
    }

    /// Take everything for replay.
    pub fn drain(&mut self) -> Vec<Operation> {
        self.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

// ───────────────────────────────────────────────────────────────────
// Manager
// ───────────────────────────────────────────────────────────────────

/// What a connection is opened for.
#[derive(Debug, Clone)]
pub struct OpenParams {
    pub room_id: String,
    pub token: String,
    pub capability: Capability,
    /// Read at every (re)connect for `hello.since`.
    pub resume_from: SeqCursor,
}

/// Everything the connection reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Socket up and `hello` written.
    Opened,
    /// Socket gone. `clean` is true when the client asked for it.
    Closed { clean: bool, reason: String },
    /// A recognized inbound frame.
    Message(ServerMessage),
    Error(ConnectionError),
    /// Reconnect attempt `attempt` starts after `delay`.
    Reconnecting { attempt: u32, delay: Duration },
}

#[derive(Debug, Clone, Copy)]
enum Control {
    Close,
    Resync,
}

struct Shared {
    /// Writer for the current socket; `None` while not open.
    outgoing: Mutex<Option<mpsc::UnboundedSender<String>>>,
    closed: AtomicBool,
    phase: watch::Sender<ConnectionPhase>,
}

impl Shared {
    fn attach(&self, tx: mpsc::UnboundedSender<String>) {
        *self.outgoing.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
    }

    fn detach(&self) {
        self.outgoing.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}

/// Cloneable handle to a running connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Arc<Shared>,
    control: mpsc::UnboundedSender<Control>,
    cursor: SeqCursor,
}

impl ConnectionHandle {
    /// Queue a frame on the current socket.
    ///
    /// Returns `false` if not connected or after [`close`](Self::close).
    pub fn send(&self, msg: &ClientMessage) -> bool {
        if self.shared.closed.load(Ordering::Acquire) {
            return false;
        }
        let text = match msg.encode() {
            Ok(text) => text,
            Err(e) => {
                log::error!("Dropping outbound frame: {e}");
                return false;
            }
        };
        let outgoing = self.shared.outgoing.lock().unwrap_or_else(|e| e.into_inner());
        outgoing.as_ref().is_some_and(|tx| tx.send(text).is_ok())
    }

    /// End the session for good. Frames already accepted by
    /// [`send`](Self::send) are still written. Idempotent.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.control.send(Control::Close);
    }

    /// Drop the current socket and reconnect right away, resuming from the
    /// cursor. Does not count as a failed attempt.
    pub fn resync(&self) {
        if !self.is_closed() {
            let _ = self.control.send(Control::Resync);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    pub fn phase(&self) -> ConnectionPhase {
        *self.shared.phase.borrow()
    }

    pub fn watch_phase(&self) -> watch::Receiver<ConnectionPhase> {
        self.shared.phase.subscribe()
    }

    pub fn cursor(&self) -> &SeqCursor {
        &self.cursor
    }
}

/// Opens managed connections.
pub struct ConnectionManager;

impl ConnectionManager {
    /// Start connecting to `params.room_id` on a background task.
    ///
    /// The receiver yields events until the connection is closed and the
    /// task has ended.
    pub fn open<C: Connector>(
        config: &SessionConfig,
        params: OpenParams,
        connector: C,
    ) -> (ConnectionHandle, mpsc::Receiver<ConnectionEvent>) {
        let (events, event_rx) = mpsc::channel(config.event_capacity.max(1));
        let (control_tx, control) = mpsc::unbounded_channel();
        let (phase, _) = watch::channel(ConnectionPhase::Idle);

        let shared = Arc::new(Shared {
            outgoing: Mutex::new(None),
            closed: AtomicBool::new(false),
            phase,
        });

        let handle = ConnectionHandle {
            shared: shared.clone(),
            control: control_tx,
            cursor: params.resume_from.clone(),
        };

        let worker = Worker {
            url: config.room_url(&params.room_id),
            params,
            connector,
            reconnector: Reconnector::new(config.backoff()),
            ping_every: config.ping_interval(),
            shared,
            events,
            control,
        };
        tokio::spawn(worker.run());

        (handle, event_rx)
    }
}

// ───────────────────────────────────────────────────────────────────
// Worker
// ───────────────────────────────────────────────────────────────────

enum Exit {
    /// `close()` was called.
    Closed,
    /// `resync()` was called.
    Resync,
    /// The socket failed or the peer went away.
    Dropped(String),
}

struct Worker<C: Connector> {
    url: String,
    params: OpenParams,
    connector: C,
    reconnector: Reconnector,
    ping_every: Option<Duration>,
    shared: Arc<Shared>,
    events: mpsc::Sender<ConnectionEvent>,
    control: mpsc::UnboundedReceiver<Control>,
}

impl<C: Connector> Worker<C> {
    async fn run(mut self) {
        'session: loop {
            if self.shared.closed.load(Ordering::Acquire) || !self.reconnector.begin_connect() {
                break;
            }
            self.publish_phase();
            log::debug!("Connecting to {}", self.url);

            let connected = tokio::select! {
                result = self.connector.connect(&self.url) => Some(result),
                ctl = self.control.recv() => match ctl.unwrap_or(Control::Close) {
                    Control::Close => {
                        self.emit_closed().await;
                        break 'session;
                    }
                    // already connecting
                    Control::Resync => None,
                },
            };

            let exit = match connected {
                None => continue,
                Some(Err(e)) => {
                    log::warn!("Connect to {} failed: {e}", self.url);
                    self.emit(ConnectionEvent::Error(e.into())).await;
                    None
                }
                Some(Ok(mut transport)) => match self.open(&mut transport).await {
                    Ok(outgoing) => Some(self.drive(&mut transport, outgoing).await),
                    Err(e) => {
                        log::warn!("Handshake with {} failed: {e}", self.url);
                        self.emit(ConnectionEvent::Error(e.into())).await;
                        None
                    }
                },
            };

            match exit {
                Some(Exit::Closed) => {
                    self.emit_closed().await;
                    break;
                }
                Some(Exit::Resync) => {
                    log::info!("Resyncing room {} from seq {}", self.params.room_id, self.params.resume_from.get());
                    self.emit(ConnectionEvent::Closed {
                        clean: true,
                        reason: "resync".into(),
                    })
                    .await;
                    continue;
                }
                Some(Exit::Dropped(reason)) => {
                    log::info!("Connection to room {} lost: {reason}", self.params.room_id);
                    self.emit(ConnectionEvent::Closed { clean: false, reason }).await;
                }
                None => {}
            }

            let Some(delay) = self.reconnector.disrupted() else {
                break;
            };
            self.publish_phase();
            let attempt = self.reconnector.attempt();
            log::info!("Reconnecting in {}ms (attempt {attempt})", delay.as_millis());
            self.emit(ConnectionEvent::Reconnecting { attempt, delay }).await;

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                ctl = self.control.recv() => match ctl.unwrap_or(Control::Close) {
                    Control::Close => {
                        self.emit_closed().await;
                        break 'session;
                    }
                    Control::Resync => {}
                },
            }
        }

        self.shared.detach();
        self.reconnector.close();
        self.publish_phase();
        log::debug!("Connection worker for room {} stopped", self.params.room_id);
    }

    /// Write `hello` and attach a fresh outbound queue.
    async fn open(
        &mut self,
        transport: &mut C::Transport,
    ) -> Result<mpsc::UnboundedReceiver<String>, TransportError> {
        let hello = ClientMessage::hello(
            self.params.room_id.clone(),
            self.params.capability,
            self.params.token.clone(),
            self.params.resume_from.get(),
        );
        let text = hello
            .encode()
            .map_err(|e: ProtocolError| TransportError::Send(e.to_string()))?;
        transport.send_text(text).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.attach(tx);
        self.reconnector.opened();
        self.publish_phase();
        log::info!("Connected to room {}", self.params.room_id);
        self.emit(ConnectionEvent::Opened).await;
        Ok(rx)
    }

    async fn drive(
        &mut self,
        transport: &mut C::Transport,
        mut outgoing: mpsc::UnboundedReceiver<String>,
    ) -> Exit {
        let mut ping = self
            .ping_every
            .map(|every| tokio::time::interval_at(Instant::now() + every, every));

        loop {
            tokio::select! {
                frame = transport.recv() => match frame {
                    Some(Ok(Frame::Text(text))) => self.dispatch(ServerMessage::decode(&text)).await,
                    Some(Ok(Frame::Binary(bytes))) => self.dispatch(ServerMessage::decode_bytes(&bytes)).await,
                    Some(Ok(Frame::Close { code, reason })) => {
                        self.shared.detach();
                        return Exit::Dropped(match code {
                            Some(code) => format!("server closed ({code}) {reason}"),
                            None => "server closed".to_string(),
                        });
                    }
                    Some(Err(e)) => {
                        self.shared.detach();
                        let reason = e.to_string();
                        self.emit(ConnectionEvent::Error(e.into())).await;
                        return Exit::Dropped(reason);
                    }
                    None => {
                        self.shared.detach();
                        return Exit::Dropped("connection lost".into());
                    }
                },
                Some(text) = outgoing.recv() => {
                    if let Err(e) = transport.send_text(text).await {
                        self.shared.detach();
                        let reason = e.to_string();
                        self.emit(ConnectionEvent::Error(e.into())).await;
                        return Exit::Dropped(reason);
                    }
                }
                _ = tick(&mut ping) => {
                    let ping = ClientMessage::ping(unix_millis());
                    match ping.encode() {
                        Ok(text) => {
                            if let Err(e) = transport.send_text(text).await {
                                self.shared.detach();
                                return Exit::Dropped(e.to_string());
                            }
                        }
                        Err(e) => log::error!("Failed to encode ping: {e}"),
                    }
                }
                ctl = self.control.recv() => {
                    self.shared.detach();
                    return match ctl.unwrap_or(Control::Close) {
                        Control::Close => {
                            while let Ok(text) = outgoing.try_recv() {
                                if transport.send_text(text).await.is_err() {
                                    break;
                                }
                            }
                            if let Err(e) = transport.close().await {
                                log::debug!("Close handshake failed: {e}");
                            }
                            Exit::Closed
                        }
                        Control::Resync => {
                            let _ = transport.close().await;
                            Exit::Resync
                        }
                    };
                }
            }
        }
    }

    async fn dispatch(&self, decoded: Result<ServerMessage, ProtocolError>) {
        match decoded {
            Ok(ServerMessage::Unknown) => log::debug!("Ignoring unrecognized frame type"),
            Ok(ServerMessage::Pong { ts }) => log::debug!("pong ts={ts}"),
            Ok(msg) => {
                log::debug!("<- {}", msg.kind());
                self.emit(ConnectionEvent::Message(msg)).await;
            }
            Err(e) => {
                log::warn!("Unparseable frame from {}: {e}", self.url);
                self.emit(ConnectionEvent::Error(e.into())).await;
            }
        }
    }

    async fn emit_closed(&self) {
        self.emit(ConnectionEvent::Closed {
            clean: true,
            reason: "closed by client".into(),
        })
        .await;
    }

    async fn emit(&self, event: ConnectionEvent) {
        // owner may have gone away; the worker keeps running until close()
        let _ = self.events.send(event).await;
    }

    fn publish_phase(&self) {
        self.shared.phase.send_replace(self.reconnector.phase());
    }
}

/// Next keepalive tick, or never when keepalive is off.
async fn tick(ping: &mut Option<Interval>) {
    match ping {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
