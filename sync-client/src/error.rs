//! Error types for sync-client.

use outbox_sync_types::SyncError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::transport::TransportError;

/// Errors reported by the engine's entry points.
///
/// Only session-level failures surface here. Failures local to one queue
/// entry are folded into the pass's report instead.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No session is active.
    #[error("no active conversation")]
    NoActiveConversation,

    /// The transport is not connected.
    #[error("not connected")]
    NotConnected,

    /// Opening the transport failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Queue storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Envelope encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(#[from] SyncError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Queue storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row could not be mapped back to a queue entry.
    #[error("corrupt queue row: {reason}")]
    Corrupt {
        /// What was wrong with the row.
        reason: String,
    },

    /// The backing store is unavailable.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        assert_eq!(
            ClientError::NoActiveConversation.to_string(),
            "no active conversation"
        );
        let err = ClientError::from(StorageError::Corrupt {
            reason: "negative retry count".into(),
        });
        assert_eq!(
            err.to_string(),
            "storage error: corrupt queue row: negative retry count"
        );
    }

    #[test]
    fn errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ClientError>();
        assert_send_sync::<StorageError>();
    }
}
