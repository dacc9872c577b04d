//! Durable outbound queue.
//!
//! Every user-originated envelope is persisted as a [`QueueEntry`] before the
//! engine tries to send it. Exactly one entry exists per unconfirmed message:
//! it is deleted when its acknowledgement is reconciled, bumped when a send
//! or ack wait fails, and swept once it reaches the retry ceiling.

mod memory;
mod sqlite;

pub use memory::MemoryQueueStore;
pub use sqlite::SqliteQueueStore;

use async_trait::async_trait;
use outbox_sync_types::{meta_keys, ConversationId, Envelope, LocalId, SyncError};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::watch;

use crate::codec::EnvelopeCodec;
use crate::error::StorageError;

/// A persisted, not-yet-confirmed outbound envelope.
#[derive(Clone, PartialEq, Eq)]
pub struct QueueEntry {
    /// Client-generated identity (primary key).
    pub local_id: LocalId,
    /// Conversation the envelope belongs to.
    pub conversation_id: ConversationId,
    /// Short type tag (the envelope's message type name).
    pub kind: String,
    /// Encoded envelope bytes.
    pub payload: Vec<u8>,
    /// Failed delivery attempts so far.
    pub retry_count: u32,
    /// Creation time (unix millis), the queue's ordering key.
    pub created_at: u64,
}

impl QueueEntry {
    /// Create a fresh entry stamped with the current time.
    pub fn new(
        local_id: LocalId,
        conversation_id: ConversationId,
        kind: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            local_id,
            conversation_id,
            kind: kind.into(),
            payload,
            retry_count: 0,
            created_at: now_millis(),
        }
    }

    /// Build an entry from an authored envelope.
    ///
    /// Uses the envelope's `meta.localId`, assigning a new one if it has none,
    /// so the stored payload always carries its fallback correlation key.
    pub fn from_envelope(envelope: &Envelope, codec: &dyn EnvelopeCodec) -> Result<Self, SyncError> {
        let local_id = envelope.local_id().unwrap_or_default();
        let stamped = envelope
            .clone()
            .with_meta(meta_keys::LOCAL_ID, local_id.as_str());
        let payload = codec.encode(&stamped)?;
        Ok(Self::new(
            local_id,
            envelope.conversation_id().clone(),
            envelope.message_type().name(),
            payload,
        ))
    }

    /// True once the entry has reached the retry ceiling.
    pub fn is_exhausted(&self, max_retries: u32) -> bool {
        self.retry_count >= max_retries
    }
}

impl std::fmt::Debug for QueueEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueEntry")
            .field("local_id", &self.local_id)
            .field("conversation_id", &self.conversation_id)
            .field("kind", &self.kind)
            .field("payload", &format!("[{} bytes]", self.payload.len()))
            .field("retry_count", &self.retry_count)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Trait for queue storage backends.
///
/// Listing operations return entries in creation order. `mark_confirmed` and
/// `increment_retry` must be safe to call concurrently for the same id: the
/// synchronous and background paths may both touch an entry.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Persist an entry. The message is durable only once this returns `Ok`.
    ///
    /// Enqueueing a local id that is already queued keeps the existing entry.
    async fn enqueue(&self, entry: QueueEntry) -> Result<(), StorageError>;

    /// Entries of one conversation.
    async fn pending_for(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<QueueEntry>, StorageError>;

    /// All entries.
    async fn pending_all(&self) -> Result<Vec<QueueEntry>, StorageError>;

    /// Delete an entry. Returns whether it existed; unknown ids are a no-op.
    async fn mark_confirmed(&self, local_id: &LocalId) -> Result<bool, StorageError>;

    /// Atomically bump the retry count. Returns the new count, or `None` if
    /// the entry no longer exists.
    async fn increment_retry(&self, local_id: &LocalId) -> Result<Option<u32>, StorageError>;

    /// Entries with `retry_count < max_retries`.
    async fn retryable(&self, max_retries: u32) -> Result<Vec<QueueEntry>, StorageError>;

    /// Delete entries with `retry_count >= max_retries` and return them.
    async fn sweep_exhausted(&self, max_retries: u32) -> Result<Vec<QueueEntry>, StorageError>;

    /// Current number of entries.
    async fn count(&self) -> Result<u64, StorageError>;

    /// Live view of the number of entries.
    fn watch_count(&self) -> watch::Receiver<u64>;
}

/// Current unix time in milliseconds.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::codec::MsgpackCodec;
    use outbox_sync_types::{Body, StanzaId, UserMessage};
    use std::sync::Arc;

    pub(crate) fn entry(local_id: &str, conversation: &str, created_at: u64) -> QueueEntry {
        QueueEntry {
            local_id: LocalId::from(local_id),
            conversation_id: ConversationId::new(conversation),
            kind: "UserMessage".into(),
            payload: vec![1, 2, 3],
            retry_count: 0,
            created_at,
        }
    }

    // ===========================================
    // Shared store properties
    // ===========================================

    pub(crate) async fn check_creation_order<Q: QueueStore>(store: &Q) {
        store.enqueue(entry("b", "c1", 20)).await.unwrap();
        store.enqueue(entry("a", "c1", 10)).await.unwrap();
        store.enqueue(entry("x", "c2", 15)).await.unwrap();
        store.enqueue(entry("c", "c1", 30)).await.unwrap();

        let ids: Vec<String> = store
            .pending_for(&ConversationId::new("c1"))
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.local_id.into_string())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        let all: Vec<String> = store
            .pending_all()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.local_id.into_string())
            .collect();
        assert_eq!(all, vec!["a", "x", "b", "c"]);
    }

    pub(crate) async fn check_idempotent_confirmation<Q: QueueStore>(store: &Q) {
        store.enqueue(entry("m1", "c1", 1)).await.unwrap();

        assert!(store.mark_confirmed(&LocalId::from("m1")).await.unwrap());
        assert!(!store.mark_confirmed(&LocalId::from("m1")).await.unwrap());
        assert!(!store.mark_confirmed(&LocalId::from("never")).await.unwrap());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    pub(crate) async fn check_retry_monotonicity<Q: QueueStore>(store: &Q) {
        store.enqueue(entry("m1", "c1", 1)).await.unwrap();
        let id = LocalId::from("m1");

        for expected in 1..=4 {
            assert_eq!(store.increment_retry(&id).await.unwrap(), Some(expected));
        }
        let stored = store.pending_all().await.unwrap();
        assert_eq!(stored[0].retry_count, 4);

        assert_eq!(
            store.increment_retry(&LocalId::from("missing")).await.unwrap(),
            None
        );
    }

    pub(crate) async fn check_retryable_and_sweep<Q: QueueStore>(store: &Q) {
        store.enqueue(entry("fresh", "c1", 1)).await.unwrap();
        store.enqueue(entry("tired", "c1", 2)).await.unwrap();
        store.enqueue(entry("dead", "c1", 3)).await.unwrap();
        for _ in 0..2 {
            store.increment_retry(&LocalId::from("tired")).await.unwrap();
        }
        for _ in 0..3 {
            store.increment_retry(&LocalId::from("dead")).await.unwrap();
        }

        let retryable: Vec<String> = store
            .retryable(3)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.local_id.into_string())
            .collect();
        assert_eq!(retryable, vec!["fresh", "tired"]);

        let swept = store.sweep_exhausted(3).await.unwrap();
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].local_id, LocalId::from("dead"));
        assert_eq!(swept[0].retry_count, 3);
        assert_eq!(store.count().await.unwrap(), 2);

        assert!(store.sweep_exhausted(3).await.unwrap().is_empty());
    }

    pub(crate) async fn check_duplicate_enqueue_keeps_entry<Q: QueueStore>(store: &Q) {
        store.enqueue(entry("m1", "c1", 1)).await.unwrap();
        store.increment_retry(&LocalId::from("m1")).await.unwrap();

        let mut again = entry("m1", "c1", 99);
        again.payload = vec![9];
        store.enqueue(again).await.unwrap();

        let stored = store.pending_all().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].retry_count, 1);
        assert_eq!(stored[0].payload, vec![1, 2, 3]);
    }

    pub(crate) async fn check_live_count<Q: QueueStore>(store: &Q) {
        let mut count = store.watch_count();
        assert_eq!(*count.borrow_and_update(), 0);

        store.enqueue(entry("m1", "c1", 1)).await.unwrap();
        store.enqueue(entry("m2", "c1", 2)).await.unwrap();
        assert!(count.has_changed().unwrap());
        assert_eq!(*count.borrow_and_update(), 2);

        store.mark_confirmed(&LocalId::from("m1")).await.unwrap();
        assert_eq!(*count.borrow_and_update(), 1);
    }

    pub(crate) async fn check_concurrent_increments<Q: QueueStore + 'static>(store: Arc<Q>) {
        store.enqueue(entry("hot", "c1", 1)).await.unwrap();

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.increment_retry(&LocalId::from("hot")).await })
            })
            .collect();

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().is_some() {
                successes += 1;
            }
        }

        let stored = store.pending_all().await.unwrap();
        assert_eq!(stored[0].retry_count, successes);
        assert_eq!(successes, 20);
    }

    // ===========================================
    // QueueEntry
    // ===========================================

    fn user_envelope() -> Envelope {
        Envelope::new(
            StanzaId::new(1),
            ConversationId::new("conv_1"),
            Body::UserMessage(UserMessage {
                id: "m1".into(),
                previous_id: None,
                conversation_id: "conv_1".into(),
                content: "hello".into(),
                timestamp: None,
            }),
        )
    }

    #[test]
    fn from_envelope_assigns_local_id() {
        let codec = MsgpackCodec;
        let entry = QueueEntry::from_envelope(&user_envelope(), &codec).unwrap();

        assert_eq!(entry.kind, "UserMessage");
        assert_eq!(entry.retry_count, 0);
        assert_eq!(entry.conversation_id.as_str(), "conv_1");

        let stored = codec.decode(&entry.payload).unwrap();
        assert_eq!(stored.local_id(), Some(entry.local_id.clone()));
    }

    #[test]
    fn from_envelope_keeps_existing_local_id() {
        let codec = MsgpackCodec;
        let envelope = user_envelope().with_meta(meta_keys::LOCAL_ID, "authored-1");
        let entry = QueueEntry::from_envelope(&envelope, &codec).unwrap();

        assert_eq!(entry.local_id, LocalId::from("authored-1"));
    }

    #[test]
    fn exhaustion_is_inclusive() {
        let mut e = entry("m", "c", 1);
        e.retry_count = 2;
        assert!(!e.is_exhausted(3));
        e.retry_count = 3;
        assert!(e.is_exhausted(3));
    }

    #[test]
    fn debug_hides_payload_bytes() {
        let mut e = entry("m", "c", 1);
        e.payload = vec![0xDE, 0xAD, 0xBE, 0xEF];
        let debug = format!("{:?}", e);
        assert!(debug.contains("[4 bytes]"));
        assert!(!debug.contains("222"));
    }
}
