//! Count queued entries.

use anyhow::Result;
use outbox_sync_client::QueueStore;

use super::open_store;
use crate::config::Settings;

/// Run the count command.
pub async fn run(settings: &Settings) -> Result<u64> {
    let queue = open_store(&settings.database).await?;
    Ok(queue.count().await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::enqueue;
    use outbox_sync_client::SyncConfig;
    use tempfile::tempdir;

    #[tokio::test]
    async fn count_tracks_enqueued_messages() {
        let dir = tempdir().unwrap();
        let settings = Settings {
            config: SyncConfig::default(),
            database: dir.path().join("outbox.db"),
        };

        assert_eq!(run(&settings).await.unwrap(), 0);

        enqueue::run(&settings, "conv_1", "one").await.unwrap();
        enqueue::run(&settings, "conv_2", "two").await.unwrap();

        assert_eq!(run(&settings).await.unwrap(), 2);
    }
}
