//! Hooks into the embedding application.
//!
//! The engine only moves queue entries. Catch-up synchronization, message
//! status bookkeeping and handling of server-originated envelopes belong to
//! the application, so their errors are plain `anyhow` errors.

use async_trait::async_trait;
use outbox_sync_types::{Envelope, LocalId};

/// Full catch-up synchronization with the server, run by the scheduler.
#[async_trait]
pub trait CatchUpSync: Send + Sync {
    /// Run one synchronization pass.
    async fn sync_with_server(&self) -> anyhow::Result<()>;
}

/// Receives "message delivered" notifications for confirmed entries.
#[async_trait]
pub trait MessageStatusSink: Send + Sync {
    /// Record that the message with `local_id` reached the server.
    async fn mark_synced(&self, local_id: &LocalId, synced_at_ms: u64) -> anyhow::Result<()>;
}

/// Receives server-originated envelopes that are not acknowledgements.
///
/// Calls run one at a time in arrival order on a task of their own, apart
/// from acknowledgement handling. Envelopes queue up in memory while a call
/// is in progress.
#[async_trait]
pub trait InboundSink: Send + Sync {
    /// Handle one inbound envelope.
    async fn on_envelope(&self, envelope: Envelope) -> anyhow::Result<()>;
}

/// Collaborator that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct Noop;

#[async_trait]
impl CatchUpSync for Noop {
    async fn sync_with_server(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl MessageStatusSink for Noop {
    async fn mark_synced(&self, _local_id: &LocalId, _synced_at_ms: u64) -> anyhow::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl InboundSink for Noop {
    async fn on_envelope(&self, _envelope: Envelope) -> anyhow::Result<()> {
        Ok(())
    }
}
