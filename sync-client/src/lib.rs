//! # sync-client
//!
//! Offline-first outbound message sync engine.
//!
//! Messages authored while offline are persisted in a durable queue and
//! delivered once a connection is available. Every send is correlated with
//! its acknowledgement, failures are retried up to a ceiling, and a background
//! scheduler keeps the application caught up with the server.
//!
//! ## Features
//!
//! - **Durable queue**: [`QueueStore`] with SQLite and in-memory backends
//! - **Ack correlation**: [`AckCorrelator`] with timeouts and a local-id fallback
//! - **Adaptive polling**: [`AdaptiveScheduler`] backs off on idleness and errors
//! - **Transport abstraction**: pluggable [`Transport`] (mock included)
//! - **Pure state machine**: session lifecycle lives in sync-core
//!
//! ## Example
//!
//! ```ignore
//! use outbox_sync_client::{MockTransport, SqliteQueueStore, SyncConfig, SyncManager};
//!
//! let queue = Arc::new(SqliteQueueStore::new(Path::new("outbox.db")).await?);
//! let manager = SyncManager::new(MockTransport::new(), queue, SyncConfig::default());
//!
//! manager.enqueue_user_message("conv_1".into(), "hello").await?;
//! manager.start_sync("conv_1".into(), "wss://chat.example", "token").await?;
//! let report = manager.sync_now().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod collaborators;
pub mod config;
pub mod correlator;
pub mod error;
pub mod manager;
pub mod orchestrator;
pub mod queue;
pub mod scheduler;
pub mod sweep;
pub mod transport;

pub use codec::{EnvelopeCodec, MsgpackCodec};
pub use collaborators::{CatchUpSync, InboundSink, MessageStatusSink, Noop};
pub use config::{ConfigError, SessionConfig, StorageConfig, SweepConfig, SyncConfig};
pub use correlator::{AckCorrelator, AckError, AckOutcome, AckWaiter};
pub use error::{ClientError, StorageError};
pub use manager::SyncManager;
pub use orchestrator::{Collaborators, Reconciliation, SyncOrchestrator};
pub use queue::{MemoryQueueStore, QueueEntry, QueueStore, SqliteQueueStore};
pub use scheduler::AdaptiveScheduler;
pub use sweep::{run_sweep, spawn_sweep_task};
pub use transport::{ConnectionState, MockTransport, Responder, Transport, TransportError};

pub use outbox_sync_core::{DrainReport, SchedulerConfig, SessionState, SyncReport};
