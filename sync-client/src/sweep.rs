//! Background sweep of exhausted queue entries.
//!
//! Entries that reached the retry ceiling are never sent again. The sweep
//! deletes them; each one is a message the server never received, so every
//! drop is logged at warn level.

use crate::config::SweepConfig;
use crate::error::StorageError;
use crate::queue::{QueueEntry, QueueStore};
use std::sync::Arc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

/// Delete exhausted entries once and log every dropped message.
pub async fn run_sweep<Q: QueueStore + ?Sized>(
    queue: &Q,
    max_retries: u32,
) -> Result<Vec<QueueEntry>, StorageError> {
    let dropped = queue.sweep_exhausted(max_retries).await?;

    for entry in &dropped {
        tracing::warn!(
            "Dropping message {} ({}) in {} after {} failed attempts",
            entry.local_id,
            entry.kind,
            entry.conversation_id,
            entry.retry_count
        );
    }
    if dropped.is_empty() {
        tracing::debug!("Sweep: no exhausted entries");
    } else {
        tracing::warn!("Sweep: dropped {} undeliverable messages", dropped.len());
    }

    Ok(dropped)
}

/// Spawn the periodic sweep task.
///
/// The first sweep runs immediately. The task ends when `cancel` fires, or
/// right away when the sweep is disabled.
pub fn spawn_sweep_task<Q: QueueStore + 'static>(
    queue: Arc<Q>,
    max_retries: u32,
    config: SweepConfig,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if !config.enabled {
            tracing::info!("Sweep task disabled");
            return;
        }

        tracing::info!("Sweep task started (interval: {}s)", config.interval_secs);

        let mut timer = interval(config.interval());

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = timer.tick() => {}
            }

            if let Err(e) = run_sweep(queue.as_ref(), max_retries).await {
                tracing::error!("Sweep error: {}", e);
            }
        }

        tracing::debug!("Sweep task stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::tests::entry;
    use crate::queue::MemoryQueueStore;
    use outbox_sync_types::LocalId;
    use std::time::Duration;

    fn sweep_config(interval_secs: u64, enabled: bool) -> SweepConfig {
        SweepConfig {
            enabled,
            interval_secs,
        }
    }

    async fn exhaust(queue: &MemoryQueueStore, local_id: &str, times: u32) {
        for _ in 0..times {
            queue.increment_retry(&LocalId::from(local_id)).await.unwrap();
        }
    }

    #[tokio::test]
    async fn run_sweep_returns_dropped_entries() {
        let queue = MemoryQueueStore::new();
        queue.enqueue(entry("dead", "c1", 1)).await.unwrap();
        queue.enqueue(entry("alive", "c1", 2)).await.unwrap();
        exhaust(&queue, "dead", 3).await;

        let dropped = run_sweep(&queue, 3).await.unwrap();

        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].local_id, LocalId::from("dead"));
        assert_eq!(queue.count().await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_task_runs_periodically() {
        let queue = Arc::new(MemoryQueueStore::new());
        let cancel = CancellationToken::new();
        let handle = spawn_sweep_task(
            Arc::clone(&queue),
            3,
            sweep_config(300, true),
            cancel.clone(),
        );

        // First sweep at t=0 finds nothing.
        tokio::time::sleep(Duration::from_secs(1)).await;
        queue.enqueue(entry("m1", "c1", 1)).await.unwrap();
        exhaust(&queue, "m1", 3).await;

        tokio::time::sleep(Duration::from_secs(200)).await;
        assert_eq!(queue.count().await.unwrap(), 1);

        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(queue.count().await.unwrap(), 0);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn sweep_task_disabled() {
        let queue = Arc::new(MemoryQueueStore::new());
        let handle = spawn_sweep_task(queue, 3, sweep_config(1, false), CancellationToken::new());

        // Task should complete immediately when disabled
        tokio::time::timeout(Duration::from_millis(100), handle)
            .await
            .expect("Task should complete when disabled")
            .expect("Task should not panic");
    }
}
