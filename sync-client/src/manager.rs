//! Sync manager: the engine's public face.
//!
//! Wraps the orchestrator and owns the background tasks that live as long
//! as a session: the adaptive catch-up scheduler and the exhausted-entry
//! sweep. It is also where new messages enter the queue.

use outbox_sync_core::{SessionState, SyncReport};
use outbox_sync_types::{meta_keys, Body, ConversationId, Envelope, LocalId, StanzaId, UserMessage};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::collaborators::{CatchUpSync, Noop};
use crate::config::SyncConfig;
use crate::error::ClientError;
use crate::orchestrator::{Collaborators, SyncOrchestrator};
use crate::queue::{now_millis, QueueEntry, QueueStore};
use crate::scheduler::AdaptiveScheduler;
use crate::sweep::spawn_sweep_task;
use crate::transport::Transport;

/// Placeholder stanza id of queued envelopes; a real one is stamped on send.
const UNSENT_STANZA: i32 = 0;

struct Background {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Offline-first message sync engine.
pub struct SyncManager<T, Q> {
    orchestrator: SyncOrchestrator<T, Q>,
    scheduler: Arc<AdaptiveScheduler>,
    catch_up: Arc<dyn CatchUpSync>,
    config: SyncConfig,
    background: Mutex<Option<Background>>,
}

impl<T, Q> SyncManager<T, Q>
where
    T: Transport + 'static,
    Q: QueueStore + 'static,
{
    /// Create a manager with default collaborators and no catch-up sync.
    pub fn new(transport: T, queue: Arc<Q>, config: SyncConfig) -> Self {
        Self::with_collaborators(
            transport,
            queue,
            config,
            Collaborators::default(),
            Arc::new(Noop),
        )
    }

    /// Create a manager with explicit collaborators.
    pub fn with_collaborators(
        transport: T,
        queue: Arc<Q>,
        config: SyncConfig,
        collaborators: Collaborators,
        catch_up: Arc<dyn CatchUpSync>,
    ) -> Self {
        let orchestrator = SyncOrchestrator::with_collaborators(
            transport,
            queue,
            config.session.clone(),
            collaborators,
        );
        Self {
            orchestrator,
            scheduler: Arc::new(AdaptiveScheduler::new(config.scheduler.clone())),
            catch_up,
            config,
            background: Mutex::new(None),
        }
    }

    /// Start syncing `conversation_id` and the session's background tasks.
    ///
    /// A no-op if a session is already syncing.
    pub async fn start_sync(
        &self,
        conversation_id: ConversationId,
        endpoint: &str,
        credential: &str,
    ) -> Result<(), ClientError> {
        self.orchestrator
            .start_sync(conversation_id, endpoint, credential)
            .await?;

        let mut background = self.background.lock().await;
        if background.is_none() {
            let cancel = CancellationToken::new();
            let tasks = vec![
                Arc::clone(&self.scheduler).spawn(Arc::clone(&self.catch_up), cancel.clone()),
                spawn_sweep_task(
                    Arc::clone(self.orchestrator.queue()),
                    self.config.session.max_retries,
                    self.config.sweep.clone(),
                    cancel.clone(),
                ),
            ];
            *background = Some(Background { cancel, tasks });
        }
        Ok(())
    }

    /// Stop the session and its background tasks.
    pub async fn stop_sync(&self) {
        self.orchestrator.stop_sync().await;

        if let Some(background) = self.background.lock().await.take() {
            background.cancel.cancel();
            for task in background.tasks {
                if let Err(e) = task.await {
                    tracing::warn!("Background task ended abnormally: {}", e);
                }
            }
        }
    }

    /// Send pending entries of the active conversation and wait for their
    /// acknowledgements.
    pub async fn sync_now(&self) -> Result<SyncReport, ClientError> {
        self.orchestrator.sync_now().await
    }

    /// Queue a user text message and return its local id.
    pub async fn enqueue_user_message(
        &self,
        conversation_id: ConversationId,
        content: impl Into<String>,
    ) -> Result<LocalId, ClientError> {
        let local_id = LocalId::new();
        let now = i64::try_from(now_millis()).unwrap_or(i64::MAX);

        let envelope = Envelope::new(
            StanzaId::new(UNSENT_STANZA),
            conversation_id.clone(),
            Body::UserMessage(UserMessage {
                id: local_id.to_string(),
                previous_id: None,
                conversation_id: conversation_id.to_string(),
                content: content.into(),
                timestamp: Some(now),
            }),
        )
        .with_meta(meta_keys::LOCAL_ID, local_id.as_str())
        .with_meta(meta_keys::TIMESTAMP, now)
        .with_meta(meta_keys::CLIENT_VERSION, env!("CARGO_PKG_VERSION"));

        self.enqueue(&envelope).await
    }

    /// Queue an authored envelope and return its local id.
    ///
    /// The envelope keeps its `meta.localId` if it has one. Counts as user
    /// activity for the scheduler.
    pub async fn enqueue(&self, envelope: &Envelope) -> Result<LocalId, ClientError> {
        let entry = QueueEntry::from_envelope(envelope, self.orchestrator.codec().as_ref())?;
        let local_id = entry.local_id.clone();

        self.orchestrator.queue().enqueue(entry).await?;
        self.scheduler.mark_activity();

        tracing::debug!(
            "Queued {} {} for {}",
            envelope.message_type(),
            local_id,
            envelope.conversation_id()
        );
        Ok(local_id)
    }

    /// Live number of queued entries.
    pub fn pending_count(&self) -> watch::Receiver<u64> {
        self.orchestrator.pending_count()
    }

    /// Live session state.
    pub fn session_state(&self) -> watch::Receiver<SessionState> {
        self.orchestrator.session_state()
    }

    /// Record user or content activity.
    pub fn mark_activity(&self) {
        self.scheduler.mark_activity();
    }

    /// Allocate the next outbound stanza id of this session.
    pub fn next_stanza_id(&self) -> StanzaId {
        self.orchestrator.next_stanza_id()
    }

    /// The underlying orchestrator.
    pub fn orchestrator(&self) -> &SyncOrchestrator<T, Q> {
        &self.orchestrator
    }

    /// The adaptive scheduler.
    pub fn scheduler(&self) -> &AdaptiveScheduler {
        &self.scheduler
    }
}
