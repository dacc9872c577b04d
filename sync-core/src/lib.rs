//! # sync-core
//!
//! Pure logic for outbox sync (no I/O, instant tests).
//!
//! This crate implements the state machines and algorithms for sync
//! without any network or disk I/O, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (network, disk) is performed by `sync-client`, which
//! interprets the actions produced by these state machines.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod report;
pub mod schedule;
pub mod stanza;
pub mod state;

pub use report::{DrainReport, SyncReport};
pub use schedule::{ErrorBackoff, SchedulerConfig};
pub use stanza::StanzaCounter;
pub use state::{SessionAction, SessionEvent, SessionState};
