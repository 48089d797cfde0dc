//! Async SQLite executor using a dedicated background thread.
//!
//! All SQLite work runs on one thread owned by `tokio_rusqlite`. Callers send
//! closures through a channel and await the result, so the Tokio runtime is
//! never blocked on disk I/O. Only SQL and lightweight row mapping belong
//! inside `call()`.

use crate::{migrations, queries, DatabaseError, DatabaseResult, OutboxStats, StoredMessage};
use outbox_core::{Message, MessageId, NewOutboxMessage};
use std::path::Path;
use tokio_rusqlite::Connection;
use tracing::{debug, info};

/// Convert a tokio_rusqlite::Error to DatabaseError.
fn from_tokio_rusqlite(e: tokio_rusqlite::Error) -> DatabaseError {
    match e {
        tokio_rusqlite::Error::Rusqlite(e) => DatabaseError::Sqlite(e),
        tokio_rusqlite::Error::ConnectionClosed => DatabaseError::Closed,
        tokio_rusqlite::Error::Close(_) => DatabaseError::Connection("Connection close failed".to_string()),
        other => DatabaseError::Connection(other.to_string()),
    }
}

/// Async SQLite database with a dedicated executor thread.
///
/// Cloning is cheap; every clone talks to the same thread. After `close()`
/// every clone fails with [`DatabaseError::Closed`].
#[derive(Clone)]
pub struct AsyncDatabase {
    conn: Connection,
    path: String,
}

impl AsyncDatabase {
    /// Open a database at the given path.
    ///
    /// This will:
    /// - Create the database file if it doesn't exist
    /// - Enable WAL mode and performance pragmas
    /// - Run any pending migrations
    /// - Start the dedicated executor thread
    pub async fn open(path: &Path) -> DatabaseResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let path_str = path.to_string_lossy().to_string();

        info!(path = %path_str, "Opening async database");

        let conn = Connection::open(&path_str)
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        Self::initialize(conn, path_str).await
    }

    /// Open a private in-memory database. Used by tests and dry runs.
    pub async fn open_in_memory() -> DatabaseResult<Self> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        Self::initialize(conn, ":memory:".to_string()).await
    }

    async fn initialize(conn: Connection, path: String) -> DatabaseResult<Self> {
        conn.call(|conn| {
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA foreign_keys = ON;
                PRAGMA busy_timeout = 5000;
                ",
            )?;
            Ok(())
        })
        .await
        .map_err(from_tokio_rusqlite)?;

        let db = Self { conn, path };
        db.call(|conn| migrations::run_migrations(conn)).await?;

        info!(path = %db.path, "Async database initialized with WAL mode");
        Ok(db)
    }

    /// Execute a closure on the database connection.
    ///
    /// The closure runs on the dedicated SQLite thread. The caller's async
    /// task is parked (not blocked) until the result is ready.
    pub async fn call<F, T>(&self, f: F) -> DatabaseResult<T>
    where
        F: FnOnce(&rusqlite::Connection) -> DatabaseResult<T> + Send + 'static,
        T: Send + 'static,
    {
        // Our DatabaseResult rides inside tokio_rusqlite's Ok variant and is
        // flattened after the await.
        let outer_result = self.conn.call(move |conn| Ok(f(conn))).await;

        match outer_result {
            Ok(inner) => inner,
            Err(e) => Err(from_tokio_rusqlite(e)),
        }
    }

    /// Execute a closure that returns a rusqlite::Result.
    pub async fn call_sqlite<F, T>(&self, f: F) -> DatabaseResult<T>
    where
        F: FnOnce(&rusqlite::Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.conn
            .call(move |conn| Ok(f(conn)?))
            .await
            .map_err(from_tokio_rusqlite)
    }

    /// Insert an outbox message in its own transaction.
    ///
    /// Business code that must commit the event with its own rows should use
    /// [`queries::enqueue_in_transaction`] inside `call()` instead.
    pub async fn enqueue(&self, msg: NewOutboxMessage) -> DatabaseResult<MessageId> {
        self.call(move |conn| queries::insert_outbox_message(conn, &msg)).await
    }

    /// Up to `limit` undelivered messages, oldest first.
    pub async fn pending_messages(&self, limit: usize) -> DatabaseResult<Vec<Message>> {
        self.call(move |conn| queries::select_pending_messages(conn, limit)).await
    }

    /// Mark messages delivered. Returns the number of rows that changed.
    pub async fn mark_delivered(&self, ids: Vec<MessageId>) -> DatabaseResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.call(move |conn| queries::mark_delivered(conn, &ids)).await
    }

    pub async fn soft_delete(&self, id: MessageId) -> DatabaseResult<()> {
        self.call(move |conn| queries::soft_delete(conn, id)).await
    }

    pub async fn get_message(&self, id: MessageId) -> DatabaseResult<Option<StoredMessage>> {
        self.call(move |conn| queries::get_message(conn, id)).await
    }

    pub async fn pending_count(&self) -> DatabaseResult<i64> {
        self.call(queries::count_pending).await
    }

    pub async fn stats(&self) -> DatabaseResult<OutboxStats> {
        self.call(queries::outbox_stats).await
    }

    /// Get the database file path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Check if the database is healthy by executing a simple query.
    pub async fn health_check(&self) -> DatabaseResult<()> {
        self.call_sqlite(|conn| conn.execute_batch("SELECT 1")).await?;
        debug!("Database health check passed");
        Ok(())
    }

    /// Close the database connection.
    ///
    /// Waits for queued operations, then shuts down the executor thread.
    pub async fn close(self) -> DatabaseResult<()> {
        self.conn
            .close()
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to close database: {:?}", e)))?;
        info!(path = %self.path, "Database closed");
        Ok(())
    }
}
