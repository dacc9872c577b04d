//! Sync orchestrator.
//!
//! Drives one sync session at a time:
//! - `start_sync` opens the transport and spawns two consumers, one for
//!   inbound frames and one for connection-state changes
//! - a `Connected` transition triggers a background drain of the active
//!   conversation's retryable entries (fire-and-forget, no ack waits)
//! - `sync_now` sends pending entries one by one and waits for each
//!   acknowledgement through the [`AckCorrelator`]
//! - inbound acknowledgements resolve a waiter, or are reconciled against the
//!   queue by the `localId` carried in the envelope meta
//! - other inbound envelopes go to the [`InboundSink`] on their own task, so a
//!   slow sink never holds up acknowledgements
//!
//! Lifecycle decisions come from the pure [`SessionState`] machine; this
//! module executes the actions it returns.

use outbox_sync_core::{
    DrainReport, SessionAction, SessionEvent, SessionState, StanzaCounter, SyncReport,
};
use outbox_sync_types::{meta_keys, ConversationId, Envelope, LocalId, StanzaId, SyncError};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::codec::{EnvelopeCodec, MsgpackCodec};
use crate::collaborators::{InboundSink, MessageStatusSink, Noop};
use crate::config::SessionConfig;
use crate::correlator::{AckCorrelator, AckError, AckOutcome};
use crate::error::{ClientError, StorageError};
use crate::queue::{now_millis, QueueEntry, QueueStore};
use crate::transport::{ConnectionState, Transport, TransportError};

/// Pluggable pieces of the orchestrator.
#[derive(Clone)]
pub struct Collaborators {
    /// Envelope codec.
    pub codec: Arc<dyn EnvelopeCodec>,
    /// Told about every confirmed message.
    pub status_sink: Arc<dyn MessageStatusSink>,
    /// Receives non-acknowledgement inbound envelopes.
    pub inbound_sink: Arc<dyn InboundSink>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            codec: Arc::new(MsgpackCodec),
            status_sink: Arc::new(Noop),
            inbound_sink: Arc::new(Noop),
        }
    }
}

/// How an inbound acknowledgement was matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// The envelope is not an acknowledgement.
    NotAnAck,
    /// A `sync_now` waiter received it.
    Waiter,
    /// No waiter; the entry with this local id was confirmed.
    ConfirmedByLocalId(LocalId),
    /// No waiter; the server rejected this local id. The entry stays queued.
    RejectedByLocalId(LocalId),
    /// No waiter and no local id to fall back on.
    Unmatched,
}

/// Why one entry did not get confirmed.
#[derive(Debug)]
enum EntryFailure {
    Encode(SyncError),
    Send(TransportError),
    Ack(AckError),
    Rejected(Option<String>),
}

struct ActiveSession {
    conversation_id: ConversationId,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

struct Inner<T, Q> {
    transport: T,
    queue: Arc<Q>,
    codec: Arc<dyn EnvelopeCodec>,
    status_sink: Arc<dyn MessageStatusSink>,
    inbound_sink: Arc<dyn InboundSink>,
    correlator: AckCorrelator,
    config: SessionConfig,
    state: watch::Sender<SessionState>,
    session: Mutex<Option<ActiveSession>>,
    stanzas: StanzaCounter,
}

/// Moves queued envelopes to the server and reconciles acknowledgements.
///
/// Clones share the same session.
pub struct SyncOrchestrator<T, Q> {
    inner: Arc<Inner<T, Q>>,
}

impl<T, Q> Clone for SyncOrchestrator<T, Q> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, Q> SyncOrchestrator<T, Q>
where
    T: Transport + 'static,
    Q: QueueStore + 'static,
{
    /// Create an orchestrator with the MessagePack codec and no-op sinks.
    pub fn new(transport: T, queue: Arc<Q>, config: SessionConfig) -> Self {
        Self::with_collaborators(transport, queue, config, Collaborators::default())
    }

    /// Create an orchestrator with explicit collaborators.
    pub fn with_collaborators(
        transport: T,
        queue: Arc<Q>,
        config: SessionConfig,
        collaborators: Collaborators,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            inner: Arc::new(Inner {
                transport,
                queue,
                codec: collaborators.codec,
                status_sink: collaborators.status_sink,
                inbound_sink: collaborators.inbound_sink,
                correlator: AckCorrelator::new(),
                config,
                state,
                session: Mutex::new(None),
                stanzas: StanzaCounter::new(),
            }),
        }
    }

    /// Start syncing `conversation_id`.
    ///
    /// A no-op when a session is already syncing. Fails with
    /// [`ClientError::ConnectionFailed`] if the transport cannot be opened,
    /// leaving the session in the `Error` state.
    pub async fn start_sync(
        &self,
        conversation_id: ConversationId,
        endpoint: &str,
        credential: &str,
    ) -> Result<(), ClientError> {
        let mut session = self.inner.session.lock().await;

        let stale = session.as_ref().map(|active| active.cancel.clone());
        let actions = self.inner.apply_retiring(
            SessionEvent::StartRequested {
                conversation_id: conversation_id.clone(),
            },
            stale.as_ref(),
        );

        for action in actions {
            match action {
                SessionAction::IgnoreStart => {
                    tracing::info!(
                        "Sync already active, ignoring start for {}",
                        conversation_id
                    );
                    return Ok(());
                }
                SessionAction::OpenTransport => {
                    // A session left behind by a disconnect or error.
                    if let Some(stale) = session.take() {
                        self.inner.close_session(stale).await;
                    }

                    let active = self
                        .open_session(conversation_id.clone(), endpoint, credential)
                        .await?;
                    *session = Some(active);
                }
                other => tracing::debug!("Unexpected start action: {:?}", other),
            }
        }

        tracing::info!("Sync started for {} via {}", conversation_id, endpoint);
        Ok(())
    }

    async fn open_session(
        &self,
        conversation_id: ConversationId,
        endpoint: &str,
        credential: &str,
    ) -> Result<ActiveSession, ClientError> {
        let inner = &self.inner;

        // Subscribe first so nothing published during connect is missed.
        let inbound = inner.transport.inbound();
        let states = inner.transport.connection_states();

        if let Err(e) = inner.transport.connect(endpoint, credential).await {
            tracing::warn!("Connect to {} failed: {}", endpoint, e);
            inner.apply(SessionEvent::TransportFailed {
                cause: e.to_string(),
            });
            return Err(ClientError::ConnectionFailed(e.to_string()));
        }

        inner.stanzas.reset();
        let cancel = CancellationToken::new();
        let (to_sink, from_consumer) = mpsc::unbounded_channel();
        let tasks = vec![
            tokio::spawn(Inner::consume_inbound(
                Arc::clone(inner),
                inbound,
                to_sink,
                cancel.clone(),
            )),
            tokio::spawn(Inner::dispatch_inbound(
                Arc::clone(inner),
                from_consumer,
                cancel.clone(),
            )),
            tokio::spawn(Inner::watch_connection(
                Arc::clone(inner),
                conversation_id.clone(),
                states,
                cancel.clone(),
            )),
        ];

        Ok(ActiveSession {
            conversation_id,
            cancel,
            tasks,
        })
    }

    /// Stop the session.
    ///
    /// Cancels both consumers, fails outstanding acknowledgement waits with
    /// [`AckError::SessionClosed`], closes the transport and returns to `Idle`.
    pub async fn stop_sync(&self) {
        let mut session = self.inner.session.lock().await;

        let retiring = session.as_ref().map(|active| active.cancel.clone());
        for action in self
            .inner
            .apply_retiring(SessionEvent::StopRequested, retiring.as_ref())
        {
            if action == SessionAction::CloseTransport {
                match session.take() {
                    Some(active) => {
                        let conversation_id = active.conversation_id.clone();
                        self.inner.close_session(active).await;
                        tracing::info!("Sync stopped for {}", conversation_id);
                    }
                    None => tracing::debug!("Stop requested with no active session"),
                }
            }
        }
    }

    /// Send every pending entry of the active conversation and wait for each
    /// acknowledgement.
    ///
    /// Entries are processed sequentially in creation order. Per-entry
    /// failures are tallied in the report; only a missing session, a closed
    /// transport or a failing queue listing fail the call.
    pub async fn sync_now(&self) -> Result<SyncReport, ClientError> {
        let (conversation_id, cancel) = self.active_session().await?;
        let entries = self.inner.queue.pending_for(&conversation_id).await?;

        let mut report = SyncReport::default();
        for entry in entries {
            if cancel.is_cancelled() {
                tracing::info!("Session closed, ending sync pass early");
                break;
            }

            match self.inner.deliver_and_wait(&entry).await {
                Ok(()) => report.record_success(),
                Err(failure) => {
                    report.record_failure();
                    self.inner.log_failure(&entry, &failure);
                    self.inner.bump_retry(&entry.local_id).await;
                    if matches!(failure, EntryFailure::Ack(AckError::SessionClosed)) {
                        break;
                    }
                }
            }
        }

        tracing::info!("Sync pass for {}: {}", conversation_id, report);
        Ok(report)
    }

    /// Send the active conversation's retryable entries without waiting for
    /// acknowledgements. This is what a reconnect triggers.
    pub async fn drain_queue(&self) -> Result<DrainReport, ClientError> {
        let (conversation_id, cancel) = self.active_session().await?;
        Ok(self.inner.drain(&conversation_id, &cancel).await?)
    }

    /// Match an inbound acknowledgement to a waiter or a queue entry.
    pub async fn reconcile_acknowledgement(
        &self,
        envelope: &Envelope,
    ) -> Result<Reconciliation, StorageError> {
        self.inner.reconcile(envelope).await
    }

    async fn active_session(&self) -> Result<(ConversationId, CancellationToken), ClientError> {
        let (conversation_id, cancel) = {
            let session = self.inner.session.lock().await;
            let active = session.as_ref().ok_or(ClientError::NoActiveConversation)?;
            (active.conversation_id.clone(), active.cancel.clone())
        };

        if !self.inner.transport.is_connected() {
            return Err(ClientError::NotConnected);
        }
        Ok((conversation_id, cancel))
    }

    /// Live number of queued entries.
    pub fn pending_count(&self) -> watch::Receiver<u64> {
        self.inner.queue.watch_count()
    }

    /// Live session state.
    pub fn session_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Current session state.
    pub fn current_state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    /// Allocate the next outbound stanza id of this session.
    pub fn next_stanza_id(&self) -> StanzaId {
        self.inner.stanzas.next_id()
    }

    /// Number of acknowledgement waits in flight.
    pub fn pending_acks(&self) -> usize {
        self.inner.correlator.pending()
    }

    /// The queue this orchestrator drains.
    pub fn queue(&self) -> &Arc<Q> {
        &self.inner.queue
    }

    /// The codec used for queued payloads.
    pub fn codec(&self) -> &Arc<dyn EnvelopeCodec> {
        &self.inner.codec
    }
}

impl<T, Q> Inner<T, Q>
where
    T: Transport + 'static,
    Q: QueueStore + 'static,
{
    /// Feed an event to the state machine and publish the new state.
    fn apply(&self, event: SessionEvent) -> Vec<SessionAction> {
        self.transition(event, None, None)
    }

    /// Apply a start or stop request. When it opens or closes the transport,
    /// `retiring` (the token of the session being replaced) is cancelled
    /// before the state lock is released.
    fn apply_retiring(
        &self,
        event: SessionEvent,
        retiring: Option<&CancellationToken>,
    ) -> Vec<SessionAction> {
        self.transition(event, retiring, None)
    }

    /// Apply a transport event on behalf of the session owning `cancel`.
    /// A retired session's events are dropped.
    fn apply_live(&self, event: SessionEvent, cancel: &CancellationToken) -> Vec<SessionAction> {
        self.transition(event, None, Some(cancel))
    }

    // The watch lock is held across the whole closure: the retire-cancel of
    // a start/stop and the liveness check of a transport event are ordered.
    fn transition(
        &self,
        event: SessionEvent,
        retiring: Option<&CancellationToken>,
        owner: Option<&CancellationToken>,
    ) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        self.state.send_if_modified(|state| {
            if owner.is_some_and(CancellationToken::is_cancelled) {
                tracing::debug!("Dropping {:?} from a retired session", event);
                return false;
            }

            let (next, produced) = state.clone().on_event(event);
            let retires = produced.iter().any(|action| {
                matches!(
                    action,
                    SessionAction::OpenTransport | SessionAction::CloseTransport
                )
            });
            if retires {
                if let Some(token) = retiring {
                    token.cancel();
                }
            }

            actions = produced;
            let changed = next != *state;
            *state = next;
            changed
        });
        actions
    }

    async fn close_session(&self, active: ActiveSession) {
        active.cancel.cancel();

        let released = self.correlator.close_all();
        if released > 0 {
            tracing::debug!("Released {} pending acknowledgement waits", released);
        }

        for task in active.tasks {
            if let Err(e) = task.await {
                tracing::warn!("Session task ended abnormally: {}", e);
            }
        }

        if let Err(e) = self.transport.disconnect().await {
            tracing::warn!("Transport disconnect failed: {}", e);
        }
    }

    async fn consume_inbound(
        self: Arc<Self>,
        mut inbound: broadcast::Receiver<Vec<u8>>,
        to_sink: mpsc::UnboundedSender<Envelope>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                frame = inbound.recv() => match frame {
                    Ok(frame) => self.handle_frame(&frame, &to_sink).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!("Inbound consumer lagged, {} frames dropped", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::debug!("Inbound stream closed");
                        break;
                    }
                },
            }
        }
    }

    /// Hand non-acknowledgement envelopes to the inbound sink, in arrival
    /// order, off the consumer that reconciles acknowledgements.
    async fn dispatch_inbound(
        self: Arc<Self>,
        mut envelopes: mpsc::UnboundedReceiver<Envelope>,
        cancel: CancellationToken,
    ) {
        loop {
            let envelope = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                envelope = envelopes.recv() => match envelope {
                    Some(envelope) => envelope,
                    None => break,
                },
            };

            let message_type = envelope.message_type();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.inbound_sink.on_envelope(envelope) => {
                    if let Err(e) = result {
                        tracing::warn!("Inbound {} handler failed: {:#}", message_type, e);
                    }
                }
            }
        }
    }

    async fn watch_connection(
        self: Arc<Self>,
        conversation_id: ConversationId,
        mut states: watch::Receiver<ConnectionState>,
        cancel: CancellationToken,
    ) {
        // The transport may already be up by the time this task runs.
        let initial = states.borrow_and_update().clone();
        if initial == ConnectionState::Connected {
            self.on_connection_state(&conversation_id, initial, &cancel)
                .await;
        }

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                changed = states.changed() => {
                    if changed.is_err() {
                        tracing::debug!("Connection state stream closed");
                        break;
                    }
                    let state = states.borrow_and_update().clone();
                    self.on_connection_state(&conversation_id, state, &cancel).await;
                }
            }
        }
    }

    async fn on_connection_state(
        &self,
        conversation_id: &ConversationId,
        state: ConnectionState,
        cancel: &CancellationToken,
    ) {
        if cancel.is_cancelled() {
            return;
        }

        let event = match state {
            ConnectionState::Connecting => {
                tracing::debug!("Transport connecting");
                return;
            }
            ConnectionState::Connected => SessionEvent::TransportConnected {
                conversation_id: conversation_id.clone(),
            },
            ConnectionState::Disconnected => {
                tracing::info!("Transport disconnected");
                SessionEvent::TransportDisconnected
            }
            ConnectionState::Error(cause) => {
                tracing::warn!("Transport error: {}", cause);
                SessionEvent::TransportFailed { cause }
            }
        };

        for action in self.apply_live(event, cancel) {
            if action == SessionAction::DrainQueue {
                match self.drain(conversation_id, cancel).await {
                    Ok(report) => tracing::info!(
                        "Drained queue for {}: {} sent, {} failed, {} skipped",
                        conversation_id,
                        report.sent,
                        report.failed,
                        report.skipped
                    ),
                    Err(e) => tracing::error!("Queue drain failed: {}", e),
                }
            }
        }
    }

    async fn drain(
        &self,
        conversation_id: &ConversationId,
        cancel: &CancellationToken,
    ) -> Result<DrainReport, StorageError> {
        let entries = self.queue.retryable(self.config.max_retries).await?;

        let mut report = DrainReport::default();
        let mut first = true;
        for entry in entries {
            if &entry.conversation_id != conversation_id {
                report.skipped += 1;
                continue;
            }

            if !first {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.config.drain_delay()) => {}
                }
            }
            if cancel.is_cancelled() {
                break;
            }
            first = false;

            match self.send_entry(&entry, self.stanzas.next_id()).await {
                Ok(()) => report.sent += 1,
                Err(failure) => {
                    report.failed += 1;
                    self.log_failure(&entry, &failure);
                    self.bump_retry(&entry.local_id).await;
                }
            }
        }

        Ok(report)
    }

    /// Re-stamp an entry with a fresh stanza id and its local id, then send.
    async fn send_entry(&self, entry: &QueueEntry, stanza_id: StanzaId) -> Result<(), EntryFailure> {
        let frame = self.restamp(entry, stanza_id).map_err(EntryFailure::Encode)?;
        self.transport
            .send(&frame)
            .await
            .map_err(EntryFailure::Send)
    }

    async fn deliver_and_wait(&self, entry: &QueueEntry) -> Result<(), EntryFailure> {
        let stanza_id = self.stanzas.next_id();
        let frame = self.restamp(entry, stanza_id).map_err(EntryFailure::Encode)?;

        // Registered before the send so a fast ack cannot slip past.
        let waiter = self.correlator.register(stanza_id);
        self.transport
            .send(&frame)
            .await
            .map_err(EntryFailure::Send)?;

        match waiter.wait(self.config.ack_timeout()).await {
            Ok(AckOutcome::Accepted) => {
                self.confirm(&entry.local_id).await;
                Ok(())
            }
            Ok(AckOutcome::Rejected { reason }) => Err(EntryFailure::Rejected(reason)),
            Err(e) => Err(EntryFailure::Ack(e)),
        }
    }

    fn restamp(&self, entry: &QueueEntry, stanza_id: StanzaId) -> Result<Vec<u8>, SyncError> {
        let envelope = self
            .codec
            .decode(&entry.payload)?
            .with_stanza_id(stanza_id)
            .with_meta(meta_keys::LOCAL_ID, entry.local_id.as_str());
        self.codec.encode(&envelope)
    }

    async fn handle_frame(&self, frame: &[u8], to_sink: &mpsc::UnboundedSender<Envelope>) {
        let envelope = match self.codec.decode(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!("Dropping undecodable inbound frame: {}", e);
                return;
            }
        };

        match self.reconcile(&envelope).await {
            Ok(Reconciliation::NotAnAck) => {
                let message_type = envelope.message_type();
                tracing::debug!(
                    "Inbound {} for {}",
                    message_type,
                    envelope.conversation_id()
                );
                if to_sink.send(envelope).is_err() {
                    tracing::debug!("Inbound {} dropped, session closing", message_type);
                }
            }
            Ok(_) => {}
            Err(e) => tracing::error!("Acknowledgement reconciliation failed: {}", e),
        }
    }

    async fn reconcile(&self, envelope: &Envelope) -> Result<Reconciliation, StorageError> {
        let Some(ack) = envelope.as_acknowledgement() else {
            return Ok(Reconciliation::NotAnAck);
        };

        let stanza_id = ack.acknowledged_stanza_id;
        let reason = envelope.meta_str(meta_keys::REASON).map(str::to_owned);
        if self
            .correlator
            .resolve(stanza_id, AckOutcome::from_success(ack.success, reason.clone()))
        {
            return Ok(Reconciliation::Waiter);
        }

        let Some(local_id) = envelope.local_id() else {
            tracing::debug!("No waiter or local id for ack of stanza {}", stanza_id);
            return Ok(Reconciliation::Unmatched);
        };

        if !ack.success {
            tracing::warn!(
                "Server rejected message {}: {}",
                local_id,
                reason.as_deref().unwrap_or("no reason given")
            );
            return Ok(Reconciliation::RejectedByLocalId(local_id));
        }

        if self.queue.mark_confirmed(&local_id).await? {
            self.notify_synced(&local_id).await;
        } else {
            tracing::debug!("Message {} was already confirmed", local_id);
        }
        Ok(Reconciliation::ConfirmedByLocalId(local_id))
    }

    async fn confirm(&self, local_id: &LocalId) {
        match self.queue.mark_confirmed(local_id).await {
            Ok(true) => self.notify_synced(local_id).await,
            Ok(false) => tracing::debug!("Message {} was already confirmed", local_id),
            Err(e) => tracing::error!("Failed to remove confirmed message {}: {}", local_id, e),
        }
    }

    async fn notify_synced(&self, local_id: &LocalId) {
        if let Err(e) = self.status_sink.mark_synced(local_id, now_millis()).await {
            tracing::warn!("Failed to mark message {} as synced: {:#}", local_id, e);
        }
    }

    /// Record a failed attempt. Storage errors are logged, never raised: the
    /// caller's batch must go on.
    async fn bump_retry(&self, local_id: &LocalId) {
        match self.queue.increment_retry(local_id).await {
            Ok(Some(count)) => tracing::debug!("Message {} retry count now {}", local_id, count),
            Ok(None) => tracing::debug!("Message {} left the queue before its retry", local_id),
            Err(e) => tracing::error!("Failed to record retry for {}: {}", local_id, e),
        }
    }

    fn log_failure(&self, entry: &QueueEntry, failure: &EntryFailure) {
        let local_id = &entry.local_id;
        match failure {
            EntryFailure::Encode(e) => {
                tracing::warn!("Message {} could not be re-encoded: {}", local_id, e)
            }
            EntryFailure::Send(e) => tracing::warn!("Send failed for message {}: {}", local_id, e),
            EntryFailure::Ack(AckError::Timeout) => tracing::warn!(
                "No acknowledgement for message {} within {}ms",
                local_id,
                self.config.ack_timeout_ms
            ),
            EntryFailure::Ack(e) => {
                tracing::warn!("Wait for message {} ended: {}", local_id, e)
            }
            EntryFailure::Rejected(reason) => tracing::warn!(
                "Server rejected message {}: {}",
                local_id,
                reason.as_deref().unwrap_or("no reason given")
            ),
        }
    }
}
