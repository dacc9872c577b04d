//! Sync session state machine.
//!
//! This module provides a pure, side-effect-free state machine for the
//! lifecycle of a sync session. The state machine takes events as input and
//! produces a new state plus a list of actions to execute.
//!
//! The actual I/O (opening the transport, draining the queue) is performed by
//! sync-client, not by this module.

use outbox_sync_types::ConversationId;

/// Session state - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No session is syncing.
    #[default]
    Idle,
    /// Syncing the given conversation.
    Syncing {
        /// The active conversation.
        conversation_id: ConversationId,
    },
    /// The transport reported an error.
    Error {
        /// Error description from the transport.
        cause: String,
    },
}

impl SessionState {
    /// Create a new state machine in the Idle state.
    pub fn new() -> Self {
        Self::Idle
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function - no side effects. The caller (sync-client)
    /// is responsible for executing the returned actions.
    pub fn on_event(self, event: SessionEvent) -> (Self, Vec<SessionAction>) {
        match (self, event) {
            // Starting while already syncing is a no-op
            (state @ Self::Syncing { .. }, SessionEvent::StartRequested { .. }) => {
                (state, vec![SessionAction::IgnoreStart])
            }
            (Self::Idle | Self::Error { .. }, SessionEvent::StartRequested { conversation_id }) => (
                Self::Syncing { conversation_id },
                vec![SessionAction::OpenTransport],
            ),

            (_, SessionEvent::StopRequested) => (Self::Idle, vec![SessionAction::CloseTransport]),

            // A (re)connect resumes the session's conversation and drains its queue
            (_, SessionEvent::TransportConnected { conversation_id }) => (
                Self::Syncing { conversation_id },
                vec![SessionAction::DrainQueue],
            ),

            (Self::Syncing { .. }, SessionEvent::TransportDisconnected) => (Self::Idle, vec![]),
            (Self::Syncing { .. }, SessionEvent::TransportFailed { cause }) => {
                (Self::Error { cause }, vec![])
            }

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Check if a conversation is currently syncing.
    pub fn is_syncing(&self) -> bool {
        matches!(self, Self::Syncing { .. })
    }

    /// The conversation being synced, if any.
    pub fn conversation_id(&self) -> Option<&ConversationId> {
        match self {
            Self::Syncing { conversation_id } => Some(conversation_id),
            _ => None,
        }
    }
}

/// Events that can occur in the session lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Caller asked to start syncing a conversation.
    StartRequested {
        /// The conversation to sync.
        conversation_id: ConversationId,
    },
    /// Caller asked to stop.
    StopRequested,
    /// Transport reached the connected state.
    TransportConnected {
        /// Conversation of the session that owns the transport.
        conversation_id: ConversationId,
    },
    /// Transport lost its connection.
    TransportDisconnected,
    /// Transport reported an error.
    TransportFailed {
        /// Error description.
        cause: String,
    },
}

/// Actions to be executed by the sync-client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Open the transport and start the consumer tasks.
    OpenTransport,
    /// Cancel consumers, fail outstanding waits and close the transport.
    CloseTransport,
    /// Send the conversation's retryable queue entries.
    DrainQueue,
    /// A start request arrived while already syncing.
    IgnoreStart,
}
