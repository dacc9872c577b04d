//! Queue a user message.

use anyhow::Result;
use outbox_sync_client::{MockTransport, SyncManager};
use outbox_sync_types::{ConversationId, LocalId};
use std::sync::Arc;

use super::open_store;
use crate::config::Settings;

/// Run the enqueue command and return the new message's local id.
pub async fn run(settings: &Settings, conversation: &str, text: &str) -> Result<LocalId> {
    let queue = Arc::new(open_store(&settings.database).await?);

    // The session is never started: queueing is an offline operation and the
    // transport stays disconnected.
    let manager = SyncManager::new(MockTransport::new(), queue, settings.config.clone());
    let local_id = manager
        .enqueue_user_message(ConversationId::new(conversation), text)
        .await?;

    tracing::info!("Queued {} for {}", local_id, conversation);
    Ok(local_id)
}
