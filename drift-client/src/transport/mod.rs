//! Transport abstraction for driftsync.
//!
//! The client consumes a minimal byte-level connection: connect, send,
//! receive, close. Everything above it (framing into messages, the
//! session state machine) lives in the client; everything below it
//! (WebSocket/TCP, TLS) lives in the transport implementation.
//!
//! A *session segment* is one connect..close span. The client re-uses a
//! single transport value across segments: each `connect` starts a fresh
//! segment and discards any receive-side remnants of the previous one.

mod mock;

pub use mock::MockTransport;

use async_trait::async_trait;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// Connection closed by the remote end.
    #[error("connection closed")]
    ConnectionClosed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),
}

/// Byte-level connection used by the client.
///
/// Implementations handle the underlying mechanism (WebSocket, TCP,
/// mock). All methods take `&self`; implementations carry their own
/// interior state.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to the given url, starting a fresh session segment.
    async fn connect(&self, url: &str) -> Result<(), TransportError>;

    /// Send bytes over the current segment.
    async fn send(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Receive bytes from the current segment.
    ///
    /// Blocks until data is available; returns
    /// [`TransportError::ConnectionClosed`] when the remote end is gone.
    async fn recv(&self) -> Result<Vec<u8>, TransportError>;

    /// Whether a segment is currently connected.
    fn is_connected(&self) -> bool;

    /// Close the current segment.
    async fn close(&self) -> Result<(), TransportError>;
}
