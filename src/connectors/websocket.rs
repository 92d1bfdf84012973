//! WebSocket transport

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace};

use crate::connector::{Connector, Transport};
use crate::{Result, SyncError};

/// Connects to a fixed WebSocket URL
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait::async_trait]
impl Connector for WebSocketConnector {
    type Transport = WebSocketTransport;

    async fn connect(&self) -> Result<Self::Transport> {
        debug!("Opening WebSocket to {}", self.url);
        let (stream, response) = connect_async(self.url.as_str()).await.map_err(|e| {
            SyncError::transport_with_source(format!("connect to {} failed", self.url), Box::new(e))
        })?;
        debug!("WebSocket handshake complete ({})", response.status());
        Ok(WebSocketTransport { stream })
    }

    fn target(&self) -> &str {
        &self.url
    }
}

/// Open WebSocket connection
pub struct WebSocketTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait::async_trait]
impl Transport for WebSocketTransport {
    async fn recv(&mut self) -> Option<Result<String>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => {
                    return Some(Err(SyncError::transport_with_source("read failed", Box::new(e))));
                }
            };

            match message {
                Message::Text(text) => return Some(Ok(text.as_str().to_owned())),
                // Not expected from the backend; surfaced as text and left to the ingestor
                Message::Binary(bytes) => {
                    return Some(Ok(String::from_utf8_lossy(&bytes).into_owned()));
                }
                Message::Close(frame) => {
                    debug!("Peer closed WebSocket: {:?}", frame);
                    return None;
                }
                // Pongs are queued by tungstenite and flushed on the next read or write
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {
                    trace!("Control frame");
                }
            }
        }
    }

    async fn send(&mut self, text: String) -> Result<()> {
        self.stream
            .send(Message::text(text))
            .await
            .map_err(|e| SyncError::transport_with_source("write failed", Box::new(e)))
    }

    async fn close(&mut self) -> Result<()> {
        self.stream
            .close(None)
            .await
            .map_err(|e| SyncError::transport_with_source("close failed", Box::new(e)))
    }
}
