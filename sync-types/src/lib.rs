//! # sync-types
//!
//! Wire format types for the outbox message sync protocol.
//!
//! This crate provides the foundational types used across all outbox crates:
//! - [`StanzaId`], [`LocalId`], [`ConversationId`] - Correlation and identity types
//! - [`Envelope`] - The unit of protocol exchange
//! - [`Body`] and the typed message bodies
//! - [`SyncError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod envelope;
mod error;
mod ids;
mod messages;

pub use envelope::{meta_keys, Envelope, Meta, MetaValue};
pub use error::SyncError;
pub use ids::{ConversationId, LocalId, StanzaId};
pub use messages::{
    Acknowledgement, AssistantMessage, AssistantSentence, Body, ErrorMessage, MessageType,
    StartAnswer, UserMessage,
};
