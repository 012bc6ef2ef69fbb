//! Message transport for gateway sessions.
//!
//! The connection state machine only sees the [`Transport`] and
//! [`Connector`] traits. Production code uses [`WsConnector`], a websocket
//! client over `tokio-tungstenite` (TLS via rustls when the `tls` feature is
//! enabled); tests plug in an in-memory implementation.

use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

/// A message received from the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportMessage {
    /// Text frame
    Text(String),
    /// Binary frame
    Binary(Vec<u8>),
    /// The remote closed the transport
    Close {
        /// Close code, absent when the close frame had none
        code: Option<u16>,
        /// Close reason
        reason: String,
    },
}

/// One open, message-oriented connection
#[async_trait]
pub trait Transport: Send {
    /// Send a text message
    async fn send_text(&mut self, text: String) -> Result<()>;

    /// Receive the next message. `None` means the stream ended.
    /// Must be cancel safe.
    async fn recv(&mut self) -> Option<Result<TransportMessage>>;

    /// Close with the given code
    async fn close(&mut self, code: u16, reason: &str) -> Result<()>;
}

/// Opens transports
#[async_trait]
pub trait Connector: Send + Sync + std::fmt::Debug {
    /// Open a transport to `url`
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Websocket connector
#[derive(Debug, Default, Clone)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>> {
        let (stream, response) = connect_async(url).await.map_err(GatewayError::transport)?;
        debug!("Websocket connected to {} (status {})", url, response.status());
        Ok(Box::new(WsTransport { stream }))
    }
}

/// Websocket transport
pub struct WsTransport {
    stream: WsStream,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.stream
            .send(Message::text(text))
            .await
            .map_err(GatewayError::transport)
    }

    async fn recv(&mut self) -> Option<Result<TransportMessage>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(GatewayError::transport(e))),
            };

            match message {
                Message::Text(text) => return Some(Ok(TransportMessage::Text(text.to_string()))),
                Message::Binary(bytes) => return Some(Ok(TransportMessage::Binary(bytes.to_vec()))),
                Message::Close(frame) => {
                    let (code, reason) = match frame {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.to_string()),
                        None => (None, String::new()),
                    };
                    return Some(Ok(TransportMessage::Close { code, reason }));
                }
                // Pongs are queued by tungstenite itself
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {
                    trace!("Skipping websocket control frame");
                }
            }
        }
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<()> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        self.stream
            .close(Some(frame))
            .await
            .map_err(GatewayError::transport)
    }
}
