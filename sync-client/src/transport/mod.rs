//! Transport abstraction for the sync engine.
//!
//! The engine does not implement the wire channel itself. It talks to a
//! pluggable [`Transport`] that moves encoded envelope frames and publishes
//! two live streams: inbound frames and connection-state changes.
//!
//! # Design
//!
//! - `connect()` opens the channel for an endpoint and credential
//! - `send()` transmits one encoded envelope
//! - `inbound()` subscribes to frames received from the server
//! - `connection_states()` observes the channel's lifecycle
//! - `disconnect()` closes it
//!
//! Both streams are restartable: every call hands out a fresh receiver, so a
//! new session simply subscribes again.
//!
//! # Example
//!
//! ```ignore
//! let transport = MockTransport::new();
//! let mut inbound = transport.inbound();
//! transport.connect("wss://chat.example", "token").await?;
//! transport.send(&frame).await?;
//! let reply = inbound.recv().await?;
//! ```

mod mock;

pub use mock::{MockTransport, Responder};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{broadcast, watch};

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Connection timeout.
    #[error("connection timeout")]
    Timeout,
}

/// Lifecycle of the underlying channel.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// A connection attempt is in progress.
    Connecting,
    /// The channel is open.
    Connected,
    /// The channel is closed.
    #[default]
    Disconnected,
    /// The channel failed.
    Error(String),
}

/// Bidirectional channel carrying encoded envelopes.
///
/// Implementations handle the underlying connection mechanism
/// (WebSocket, mock, etc).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the channel to `endpoint`, authenticating with `credential`.
    async fn connect(&self, endpoint: &str, credential: &str) -> Result<(), TransportError>;

    /// Close the channel.
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Send one encoded envelope.
    async fn send(&self, frame: &[u8]) -> Result<(), TransportError>;

    /// Check if currently connected.
    fn is_connected(&self) -> bool;

    /// Subscribe to frames received from the server.
    fn inbound(&self) -> broadcast::Receiver<Vec<u8>>;

    /// Observe connection-state changes.
    fn connection_states(&self) -> watch::Receiver<ConnectionState>;
}
