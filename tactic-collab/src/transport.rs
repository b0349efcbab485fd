//! Transport seam between the connection manager and the network.
//!
//! ```text
//! ConnectionManager ──► Connector::connect(url) ──► Transport
//!                                                    ├─ send_text()
//!                                                    ├─ recv()
//!                                                    └─ close()
//! ```
//!
//! [`WsConnector`] is the production implementation on top of
//! tokio-tungstenite. Tests plug in scripted connectors to drive reconnects
//! deterministically.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use crate::error::TransportError;

/// A frame received from the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    /// The peer sent a close frame.
    Close { code: Option<u16>, reason: String },
}

/// One physical duplex connection.
#[async_trait]
pub trait Transport: Send {
    /// Write a text frame.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Next frame, or `None` once the stream has ended.
    ///
    /// Control frames (ping/pong) are handled by the implementation and
    /// never returned.
    async fn recv(&mut self) -> Option<Result<Frame, TransportError>>;

    /// Close the connection gracefully.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Opens physical connections.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Transport: Transport + 'static;

    async fn connect(&self, url: &str) -> Result<Self::Transport, TransportError>;
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A [`Transport`] backed by tokio-tungstenite.
pub struct WsTransport {
    ws: WsStream,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.ws
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<Frame, TransportError>> {
        loop {
            let frame = match self.ws.next().await? {
                Ok(Message::Text(text)) => Frame::Text(text.as_str().to_owned()),
                Ok(Message::Binary(data)) => Frame::Binary(data.to_vec()),
                Ok(Message::Close(Some(close))) => Frame::Close {
                    code: Some(u16::from(close.code)),
                    reason: close.reason.as_str().to_owned(),
                },
                Ok(Message::Close(None)) => Frame::Close {
                    code: None,
                    reason: String::new(),
                },
                // tungstenite answers pings itself
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => continue,
                Err(e) => return Some(Err(TransportError::Receive(e.to_string()))),
            };
            return Some(Ok(frame));
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.ws
            .close(None)
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}

/// Connector that dials real WebSocket URLs.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    type Transport = WsTransport;

    async fn connect(&self, url: &str) -> Result<WsTransport, TransportError> {
        let (ws, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(WsTransport { ws })
    }
}
