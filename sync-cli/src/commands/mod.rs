//! CLI command implementations.

pub mod count;
pub mod enqueue;
pub mod pending;
pub mod show;
pub mod sweep;

use anyhow::{Context, Result};
use outbox_sync_client::SqliteQueueStore;
use std::path::Path;

/// Open the queue database, creating its directory if needed.
pub async fn open_store(database: &Path) -> Result<SqliteQueueStore> {
    if let Some(parent) = database.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .context("Failed to create database directory")?;
    }

    SqliteQueueStore::new(database)
        .await
        .with_context(|| format!("Failed to open queue database {}", database.display()))
}
