//! Drop exhausted entries.

use anyhow::Result;
use outbox_sync_client::{run_sweep, QueueEntry};

use super::open_store;
use crate::config::Settings;

/// Run the sweep command and return the dropped entries.
///
/// `max_retries` defaults to `[session].max_retries`.
pub async fn run(settings: &Settings, max_retries: Option<u32>) -> Result<Vec<QueueEntry>> {
    let queue = open_store(&settings.database).await?;
    let max_retries = max_retries.unwrap_or(settings.config.session.max_retries);

    Ok(run_sweep(&queue, max_retries).await?)
}

/// Print the dropped entries.
pub fn print(dropped: &[QueueEntry]) {
    if dropped.is_empty() {
        println!("Nothing to sweep");
        return;
    }

    for entry in dropped {
        println!(
            "Dropped {} ({}) in {} after {} attempts",
            entry.local_id, entry.kind, entry.conversation_id, entry.retry_count
        );
    }
    println!("{} undeliverable messages dropped", dropped.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{enqueue, open_store, pending};
    use outbox_sync_client::{QueueStore, SyncConfig};
    use tempfile::tempdir;

    #[tokio::test]
    async fn sweep_drops_only_exhausted_entries() {
        let dir = tempdir().unwrap();
        let settings = Settings {
            config: SyncConfig::default(),
            database: dir.path().join("outbox.db"),
        };

        let dead = enqueue::run(&settings, "conv_1", "lost").await.unwrap();
        let alive = enqueue::run(&settings, "conv_1", "kept").await.unwrap();

        let queue = open_store(&settings.database).await.unwrap();
        for _ in 0..3 {
            queue.increment_retry(&dead).await.unwrap();
        }
        queue.increment_retry(&alive).await.unwrap();

        let dropped = run(&settings, None).await.unwrap();
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].local_id, dead);

        let remaining = pending::run(&settings, None).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].local_id, alive);
    }

    #[tokio::test]
    async fn explicit_ceiling_overrides_config() {
        let dir = tempdir().unwrap();
        let settings = Settings {
            config: SyncConfig::default(),
            database: dir.path().join("outbox.db"),
        };

        let local_id = enqueue::run(&settings, "conv_1", "once").await.unwrap();
        let queue = open_store(&settings.database).await.unwrap();
        queue.increment_retry(&local_id).await.unwrap();

        assert!(run(&settings, None).await.unwrap().is_empty());
        assert_eq!(run(&settings, Some(1)).await.unwrap().len(), 1);
    }
}
