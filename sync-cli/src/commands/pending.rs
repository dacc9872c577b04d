//! List queued entries.

use anyhow::Result;
use outbox_sync_client::{QueueEntry, QueueStore};
use outbox_sync_types::ConversationId;
use std::time::{SystemTime, UNIX_EPOCH};

use super::open_store;
use crate::config::Settings;

/// Run the pending command, optionally scoped to one conversation.
///
/// Entries come back in send order (oldest first).
pub async fn run(settings: &Settings, conversation: Option<&str>) -> Result<Vec<QueueEntry>> {
    let queue = open_store(&settings.database).await?;

    let entries = match conversation {
        Some(id) => queue.pending_for(&ConversationId::new(id)).await?,
        None => queue.pending_all().await?,
    };
    Ok(entries)
}

/// Print entries as a table.
pub fn print(entries: &[QueueEntry]) {
    if entries.is_empty() {
        println!("Queue is empty");
        return;
    }

    println!(
        "{:<38} {:<20} {:<18} {:>7}  QUEUED",
        "LOCAL ID", "CONVERSATION", "KIND", "RETRIES"
    );
    for entry in entries {
        println!(
            "{:<38} {:<20} {:<18} {:>7}  {}",
            entry.local_id,
            entry.conversation_id,
            entry.kind,
            entry.retry_count,
            format_age(entry.created_at)
        );
    }
    println!();
    println!("{} pending", entries.len());
}

/// Format a unix-millis timestamp as a coarse age.
fn format_age(created_at_ms: u64) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);

    let diff = now.saturating_sub(created_at_ms) / 1000;

    if diff < 60 {
        "just now".to_string()
    } else if diff < 3600 {
        format!("{} minutes ago", diff / 60)
    } else if diff < 86400 {
        format!("{} hours ago", diff / 3600)
    } else {
        format!("{} days ago", diff / 86400)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::enqueue;
    use outbox_sync_client::SyncConfig;
    use tempfile::tempdir;

    fn settings(dir: &tempfile::TempDir) -> Settings {
        Settings {
            config: SyncConfig::default(),
            database: dir.path().join("outbox.db"),
        }
    }

    #[tokio::test]
    async fn pending_on_fresh_database_is_empty() {
        let dir = tempdir().unwrap();
        assert!(run(&settings(&dir), None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn pending_filters_by_conversation() {
        let dir = tempdir().unwrap();
        let settings = settings(&dir);

        let first = enqueue::run(&settings, "conv_1", "one").await.unwrap();
        enqueue::run(&settings, "conv_2", "two").await.unwrap();
        let third = enqueue::run(&settings, "conv_1", "three").await.unwrap();

        let entries = run(&settings, Some("conv_1")).await.unwrap();
        let ids: Vec<_> = entries.iter().map(|e| e.local_id.clone()).collect();
        assert_eq!(ids, vec![first, third]);

        assert_eq!(run(&settings, None).await.unwrap().len(), 3);
    }

    #[test]
    fn format_age_works() {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64;

        assert_eq!(format_age(now), "just now");
        assert!(format_age(now - 120_000).contains("minutes"));
        assert!(format_age(now - 7_200_000).contains("hours"));
        assert!(format_age(now - 172_800_000).contains("days"));
    }
}
