//! Acknowledgement correlator.
//!
//! Matches inbound acknowledgements to callers waiting on a specific stanza
//! id. The registry is a concurrent map keyed by stanza id. A wait ends
//! exactly once: either `resolve` delivers into it and returns `true`, or the
//! wait times out and every later `resolve` returns `false`.
//!
//! Each registration carries a ticket. A waiter only ever removes the slot
//! holding its own ticket, which keeps a late timeout from evicting a newer
//! registration for the same id.

use dashmap::DashMap;
use outbox_sync_types::StanzaId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

/// Result of a positive or negative acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    /// The server accepted the message.
    Accepted,
    /// The server rejected the message.
    Rejected {
        /// Reason given by the server, if any.
        reason: Option<String>,
    },
}

impl AckOutcome {
    /// Build an outcome from the acknowledgement's success flag.
    pub fn from_success(success: bool, reason: Option<String>) -> Self {
        if success {
            Self::Accepted
        } else {
            Self::Rejected { reason }
        }
    }

    /// True for [`AckOutcome::Accepted`].
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Why a wait ended without an acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AckError {
    /// No acknowledgement arrived in time.
    #[error("acknowledgement timed out")]
    Timeout,
    /// The session was stopped while waiting.
    #[error("session closed while awaiting acknowledgement")]
    SessionClosed,
    /// A newer registration took over the stanza id.
    #[error("superseded by a newer registration")]
    Superseded,
}

type AckSender = oneshot::Sender<Result<AckOutcome, AckError>>;
type Registry = DashMap<StanzaId, (u64, AckSender)>;

/// In-memory registry of outstanding acknowledgement waits.
///
/// Clones share the registry.
#[derive(Debug, Clone, Default)]
pub struct AckCorrelator {
    waiters: Arc<Registry>,
    tickets: Arc<AtomicU64>,
}

impl AckCorrelator {
    /// Create an empty correlator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in the acknowledgement for `stanza_id`.
    ///
    /// Register before sending, then [`AckWaiter::wait`] after the send went
    /// out. A previous registration for the same id resolves with
    /// [`AckError::Superseded`].
    pub fn register(&self, stanza_id: StanzaId) -> AckWaiter {
        let ticket = self.tickets.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        if let Some((_, previous)) = self.waiters.insert(stanza_id, (ticket, tx)) {
            tracing::debug!("Ack waiter for stanza {} superseded", stanza_id);
            let _ = previous.send(Err(AckError::Superseded));
        }

        AckWaiter {
            stanza_id,
            ticket,
            rx,
            waiters: Arc::clone(&self.waiters),
        }
    }

    /// Register and wait in one step.
    pub async fn await_ack(
        &self,
        stanza_id: StanzaId,
        timeout: Duration,
    ) -> Result<AckOutcome, AckError> {
        self.register(stanza_id).wait(timeout).await
    }

    /// Complete the wait for `stanza_id`.
    ///
    /// Returns `false` when nobody is waiting (never registered, already
    /// resolved, or timed out); the caller then reconciles by local id.
    pub fn resolve(&self, stanza_id: StanzaId, outcome: AckOutcome) -> bool {
        match self.waiters.remove(&stanza_id) {
            Some((_, (_, tx))) => tx.send(Ok(outcome)).is_ok(),
            None => false,
        }
    }

    /// Fail every outstanding wait with [`AckError::SessionClosed`].
    ///
    /// Returns how many waiters were released.
    pub fn close_all(&self) -> usize {
        let ids: Vec<StanzaId> = self.waiters.iter().map(|entry| *entry.key()).collect();
        let mut released = 0;
        for id in ids {
            if let Some((_, (_, tx))) = self.waiters.remove(&id) {
                if tx.send(Err(AckError::SessionClosed)).is_ok() {
                    released += 1;
                }
            }
        }
        released
    }

    /// Number of outstanding waits.
    pub fn pending(&self) -> usize {
        self.waiters.len()
    }
}

/// Handle for one registered acknowledgement wait.
///
/// Dropping the handle withdraws the registration.
#[derive(Debug)]
pub struct AckWaiter {
    stanza_id: StanzaId,
    ticket: u64,
    rx: oneshot::Receiver<Result<AckOutcome, AckError>>,
    waiters: Arc<Registry>,
}

impl AckWaiter {
    /// Stanza id this waiter is registered for.
    pub fn stanza_id(&self) -> StanzaId {
        self.stanza_id
    }

    /// Wait up to `timeout` for the acknowledgement.
    ///
    /// On timeout the channel is closed before the registration is removed.
    /// A `resolve` racing the timer either delivered already, and its outcome
    /// is returned, or fails to send and reports `false`.
    pub async fn wait(mut self, timeout: Duration) -> Result<AckOutcome, AckError> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AckError::SessionClosed),
            Err(_) => {
                self.rx.close();
                self.withdraw();
                match self.rx.try_recv() {
                    Ok(result) => result,
                    Err(_) => Err(AckError::Timeout),
                }
            }
        }
    }

    fn withdraw(&self) {
        let ticket = self.ticket;
        self.waiters
            .remove_if(&self.stanza_id, |_, (held, _)| *held == ticket);
    }
}

impl Drop for AckWaiter {
    fn drop(&mut self) {
        self.withdraw();
    }
}
