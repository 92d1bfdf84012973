//! Transport traits for the live channel

use crate::Result;

/// Opens physical connections to the backend.
///
/// The channel calls [`connect`](Connector::connect) once per attempt and keeps
/// the returned transport until it closes or fails. Connectors are reused
/// across reconnections, so they hold the resolved address rather than
/// rediscovering it.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    type Transport: Transport;

    /// Open a new connection.
    async fn connect(&self) -> Result<Self::Transport>;

    /// Human-readable target, for logs
    fn target(&self) -> &str;
}

/// One open, bidirectional text connection.
#[async_trait::async_trait]
pub trait Transport: Send + 'static {
    /// Wait for the next text message.
    ///
    /// Returns:
    /// - `Some(Ok(text))` - Message received
    /// - `Some(Err(e))` - Transport failed; the connection is unusable
    /// - `None` - Peer closed the connection
    ///
    /// Must be cancel-safe: the channel races it against outbound sends and
    /// teardown.
    async fn recv(&mut self) -> Option<Result<String>>;

    /// Send a text message.
    async fn send(&mut self, text: String) -> Result<()>;

    /// Close the connection gracefully.
    async fn close(&mut self) -> Result<()>;
}
