//! In-memory transport for driving the connection worker from tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::transport::{Connector, Frame, Transport};

pub(crate) struct ScriptedTransport {
    inbound: mpsc::UnboundedReceiver<Frame>,
    sent: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.sent.send(text).map_err(|_| TransportError::Closed)
    }

    async fn recv(&mut self) -> Option<Result<Frame, TransportError>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// The server side of a [`ScriptedTransport`].
pub(crate) struct ScriptedPeer {
    frames: Option<mpsc::UnboundedSender<Frame>>,
    sent: mpsc::UnboundedReceiver<String>,
    closed: Arc<AtomicBool>,
}

impl ScriptedPeer {
    pub(crate) fn pair() -> (ScriptedTransport, ScriptedPeer) {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        (
            ScriptedTransport {
                inbound: frames_rx,
                sent: sent_tx,
                closed: closed.clone(),
            },
            ScriptedPeer {
                frames: Some(frames_tx),
                sent: sent_rx,
                closed,
            },
        )
    }

    pub(crate) fn push_text(&self, text: &str) {
        if let Some(frames) = &self.frames {
            let _ = frames.send(Frame::Text(text.to_string()));
        }
    }

    /// End the inbound stream, as if the socket dropped.
    pub(crate) fn hang_up(mut self) -> Self {
        self.frames = None;
        self
    }

    pub(crate) async fn next_sent(&mut self) -> Option<String> {
        self.sent.recv().await
    }

    pub(crate) fn drain_sent(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(text) = self.sent.try_recv() {
            out.push(text);
        }
        out
    }

    pub(crate) fn was_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Hands out pre-built connect results in order, then refuses.
pub(crate) struct ScriptedConnector {
    script: Mutex<VecDeque<Result<ScriptedTransport, TransportError>>>,
}

impl ScriptedConnector {
    pub(crate) fn new(script: Vec<Result<ScriptedTransport, TransportError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
        }
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    type Transport = ScriptedTransport;

    async fn connect(&self, _url: &str) -> Result<ScriptedTransport, TransportError> {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Connect("script exhausted".into())))
    }
}
