//! Process-local queue store.
//!
//! Not durable: entries live as long as the process. Used by tests and by
//! embedders that persist messages elsewhere.

use async_trait::async_trait;
use outbox_sync_types::{ConversationId, LocalId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

use super::{QueueEntry, QueueStore};
use crate::error::StorageError;

/// In-memory [`QueueStore`].
#[derive(Debug)]
pub struct MemoryQueueStore {
    entries: Mutex<Vec<QueueEntry>>,
    count: watch::Sender<u64>,
    unavailable: AtomicBool,
}

impl MemoryQueueStore {
    /// Create an empty store.
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            entries: Mutex::new(Vec::new()),
            count,
            unavailable: AtomicBool::new(false),
        }
    }

    /// Make every operation fail with [`StorageError::Unavailable`].
    ///
    /// Lets tests exercise storage failures.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn entries(&self) -> Result<MutexGuard<'_, Vec<QueueEntry>>, StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("memory store offline".into()));
        }
        Ok(self.entries.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn publish_count(&self, entries: &[QueueEntry]) {
        self.count.send_replace(entries.len() as u64);
    }

    fn ordered<F>(entries: &[QueueEntry], keep: F) -> Vec<QueueEntry>
    where
        F: Fn(&QueueEntry) -> bool,
    {
        // Stable sort keeps insertion order for equal timestamps.
        let mut selected: Vec<QueueEntry> = entries.iter().filter(|&e| keep(e)).cloned().collect();
        selected.sort_by_key(|e| e.created_at);
        selected
    }
}

impl Default for MemoryQueueStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn enqueue(&self, entry: QueueEntry) -> Result<(), StorageError> {
        let mut entries = self.entries()?;
        if entries.iter().any(|e| e.local_id == entry.local_id) {
            return Ok(());
        }
        entries.push(entry);
        self.publish_count(&entries);
        Ok(())
    }

    async fn pending_for(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<QueueEntry>, StorageError> {
        let entries = self.entries()?;
        Ok(Self::ordered(&entries, |e| &e.conversation_id == conversation_id))
    }

    async fn pending_all(&self) -> Result<Vec<QueueEntry>, StorageError> {
        let entries = self.entries()?;
        Ok(Self::ordered(&entries, |_| true))
    }

    async fn mark_confirmed(&self, local_id: &LocalId) -> Result<bool, StorageError> {
        let mut entries = self.entries()?;
        let before = entries.len();
        entries.retain(|e| &e.local_id != local_id);
        let removed = entries.len() != before;
        if removed {
            self.publish_count(&entries);
        }
        Ok(removed)
    }

    async fn increment_retry(&self, local_id: &LocalId) -> Result<Option<u32>, StorageError> {
        let mut entries = self.entries()?;
        Ok(entries
            .iter_mut()
            .find(|e| &e.local_id == local_id)
            .map(|e| {
                e.retry_count = e.retry_count.saturating_add(1);
                e.retry_count
            }))
    }

    async fn retryable(&self, max_retries: u32) -> Result<Vec<QueueEntry>, StorageError> {
        let entries = self.entries()?;
        Ok(Self::ordered(&entries, |e| !e.is_exhausted(max_retries)))
    }

    async fn sweep_exhausted(&self, max_retries: u32) -> Result<Vec<QueueEntry>, StorageError> {
        let mut entries = self.entries()?;
        let swept = Self::ordered(&entries, |e| e.is_exhausted(max_retries));
        if !swept.is_empty() {
            entries.retain(|e| !e.is_exhausted(max_retries));
            self.publish_count(&entries);
        }
        Ok(swept)
    }

    async fn count(&self) -> Result<u64, StorageError> {
        Ok(self.entries()?.len() as u64)
    }

    fn watch_count(&self) -> watch::Receiver<u64> {
        self.count.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::tests::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn lists_in_creation_order() {
        check_creation_order(&MemoryQueueStore::new()).await;
    }

    #[tokio::test]
    async fn confirmation_is_idempotent() {
        check_idempotent_confirmation(&MemoryQueueStore::new()).await;
    }

    #[tokio::test]
    async fn retry_count_is_monotonic() {
        check_retry_monotonicity(&MemoryQueueStore::new()).await;
    }

    #[tokio::test]
    async fn retryable_and_sweep_partition_by_ceiling() {
        check_retryable_and_sweep(&MemoryQueueStore::new()).await;
    }

    #[tokio::test]
    async fn duplicate_enqueue_is_ignored() {
        check_duplicate_enqueue_keeps_entry(&MemoryQueueStore::new()).await;
    }

    #[tokio::test]
    async fn count_is_live() {
        check_live_count(&MemoryQueueStore::new()).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_are_not_lost() {
        check_concurrent_increments(Arc::new(MemoryQueueStore::new())).await;
    }

    #[tokio::test]
    async fn unavailable_store_reports_errors() {
        let store = MemoryQueueStore::new();
        store.enqueue(entry("m1", "c1", 1)).await.unwrap();

        store.set_unavailable(true);
        assert!(matches!(
            store.count().await,
            Err(StorageError::Unavailable(_))
        ));
        assert!(store.increment_retry(&LocalId::from("m1")).await.is_err());

        store.set_unavailable(false);
        assert_eq!(store.count().await.unwrap(), 1);
    }
}
