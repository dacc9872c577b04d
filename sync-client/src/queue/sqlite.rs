//! SQLite queue store.

use super::{QueueEntry, QueueStore};
use crate::error::StorageError;
use async_trait::async_trait;
use outbox_sync_types::{ConversationId, LocalId};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

/// SQLite-backed [`QueueStore`].
///
/// Uses WAL mode so the CLI can inspect the queue while an engine runs.
/// Entries survive process restarts.
#[derive(Debug, Clone)]
pub struct SqliteQueueStore {
    pool: SqlitePool,
    count: Arc<watch::Sender<u64>>,
    // Serializes count refreshes so an older COUNT(*) is never published
    // after a newer one.
    refresh: Arc<Mutex<()>>,
}

impl SqliteQueueStore {
    /// Open (or create) the queue database at `path`.
    pub async fn new(path: &Path) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        Self::with_pool(pool).await
    }

    /// Create an in-memory store (for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(":memory:").map_err(StorageError::Database)?;

        // A single connection that is never recycled: the database dies with it.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, StorageError> {
        let (count, _) = watch::channel(0);
        let store = Self {
            pool,
            count: Arc::new(count),
            refresh: Arc::new(Mutex::new(())),
        };
        store.run_migrations().await?;
        store.refresh_count().await;
        Ok(store)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS outbox_queue (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                local_id TEXT NOT NULL UNIQUE,
                conversation_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                payload BLOB NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_queue_conversation ON outbox_queue(conversation_id, created_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(())
    }

    /// Re-read the row count and publish it to watchers.
    async fn refresh_count(&self) {
        let _guard = self.refresh.lock().await;
        match self.count().await {
            Ok(count) => {
                self.count.send_replace(count);
            }
            Err(e) => tracing::error!("Queue count refresh failed: {}", e),
        }
    }

    async fn select(
        &self,
        filter: &str,
        bind: Option<Binding<'_>>,
    ) -> Result<Vec<QueueEntry>, StorageError> {
        let sql = format!(
            "SELECT local_id, conversation_id, kind, payload, retry_count, created_at \
             FROM outbox_queue {} ORDER BY created_at, seq",
            filter
        );
        let query = sqlx::query_as::<_, QueueRow>(&sql);
        let query = match bind {
            Some(Binding::Text(value)) => query.bind(value),
            Some(Binding::Int(value)) => query.bind(value),
            None => query,
        };

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        Ok(decode_rows(rows))
    }
}

/// Convert rows to entries, skipping and logging corrupt ones so a single
/// bad row cannot block the rest of the queue.
fn decode_rows(rows: Vec<QueueRow>) -> Vec<QueueEntry> {
    rows.into_iter()
        .filter_map(|row| {
            let local_id = row.local_id.clone();
            match QueueEntry::try_from(row) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::error!("Skipping queue entry {}: {}", local_id, e);
                    None
                }
            }
        })
        .collect()
}

enum Binding<'a> {
    Text(&'a str),
    Int(i64),
}

#[async_trait]
impl QueueStore for SqliteQueueStore {
    async fn enqueue(&self, entry: QueueEntry) -> Result<(), StorageError> {
        let result = sqlx::query(
            r#"
            INSERT INTO outbox_queue (local_id, conversation_id, kind, payload, retry_count, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(local_id) DO NOTHING
            "#,
        )
        .bind(entry.local_id.as_str())
        .bind(entry.conversation_id.as_str())
        .bind(&entry.kind)
        .bind(&entry.payload)
        .bind(i64::from(entry.retry_count))
        .bind(to_sql_millis(entry.created_at))
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        if result.rows_affected() > 0 {
            self.refresh_count().await;
        }
        Ok(())
    }

    async fn pending_for(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<QueueEntry>, StorageError> {
        self.select(
            "WHERE conversation_id = ?1",
            Some(Binding::Text(conversation_id.as_str())),
        )
        .await
    }

    async fn pending_all(&self) -> Result<Vec<QueueEntry>, StorageError> {
        self.select("", None).await
    }

    async fn mark_confirmed(&self, local_id: &LocalId) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM outbox_queue WHERE local_id = ?1")
            .bind(local_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        let removed = result.rows_affected() > 0;
        if removed {
            self.refresh_count().await;
        }
        Ok(removed)
    }

    async fn increment_retry(&self, local_id: &LocalId) -> Result<Option<u32>, StorageError> {
        // Single statement: concurrent increments never lose an update.
        let count: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE outbox_queue
            SET retry_count = retry_count + 1
            WHERE local_id = ?1
            RETURNING retry_count
            "#,
        )
        .bind(local_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        count.map(retry_from_sql).transpose()
    }

    async fn retryable(&self, max_retries: u32) -> Result<Vec<QueueEntry>, StorageError> {
        self.select(
            "WHERE retry_count < ?1",
            Some(Binding::Int(i64::from(max_retries))),
        )
        .await
    }

    async fn sweep_exhausted(&self, max_retries: u32) -> Result<Vec<QueueEntry>, StorageError> {
        // Corrupt rows can never be sent, so they are swept as well.
        let mut rows = sqlx::query_as::<_, QueueRow>(
            r#"
            DELETE FROM outbox_queue
            WHERE retry_count >= ?1 OR retry_count < 0 OR created_at < 0
            RETURNING local_id, conversation_id, kind, payload, retry_count, created_at
            "#,
        )
        .bind(i64::from(max_retries))
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        if rows.is_empty() {
            return Ok(Vec::new());
        }
        self.refresh_count().await;

        // RETURNING order is unspecified.
        rows.sort_by_key(|row| row.created_at);
        Ok(decode_rows(rows))
    }

    async fn count(&self) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM outbox_queue")
            .fetch_one(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        Ok(count.max(0) as u64)
    }

    fn watch_count(&self) -> watch::Receiver<u64> {
        self.count.subscribe()
    }
}

fn to_sql_millis(millis: u64) -> i64 {
    i64::try_from(millis).unwrap_or(i64::MAX)
}

fn retry_from_sql(value: i64) -> Result<u32, StorageError> {
    u32::try_from(value).map_err(|_| StorageError::Corrupt {
        reason: format!("retry_count out of range: {}", value),
    })
}

/// Internal row type for SQLite queries.
#[derive(sqlx::FromRow)]
struct QueueRow {
    local_id: String,
    conversation_id: String,
    kind: String,
    payload: Vec<u8>,
    retry_count: i64,
    created_at: i64,
}

impl TryFrom<QueueRow> for QueueEntry {
    type Error = StorageError;

    fn try_from(row: QueueRow) -> Result<Self, Self::Error> {
        Ok(QueueEntry {
            local_id: LocalId::from(row.local_id),
            conversation_id: ConversationId::from(row.conversation_id),
            kind: row.kind,
            payload: row.payload,
            retry_count: retry_from_sql(row.retry_count)?,
            created_at: u64::try_from(row.created_at).map_err(|_| StorageError::Corrupt {
                reason: format!("negative created_at: {}", row.created_at),
            })?,
        })
    }
}
