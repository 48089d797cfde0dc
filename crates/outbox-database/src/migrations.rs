//! Database migrations.
//!
//! Migrations are run in order and tracked in the `migrations` table.

use crate::{DatabaseError, DatabaseResult};
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> DatabaseResult<()> {
    // Create migrations tracking table
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM migrations",
        [],
        |row| row.get(0),
    )?;

    if current_version > CURRENT_VERSION {
        return Err(DatabaseError::Migration(format!(
            "schema version {} is newer than supported version {}",
            current_version, CURRENT_VERSION
        )));
    }

    info!(current_version, target_version = CURRENT_VERSION, "Running migrations");

    if current_version < 1 {
        migrate_v1_outbox_messages(conn)?;
    }
    if current_version < 2 {
        migrate_v2_pending_index(conn)?;
    }

    info!("Migrations complete");
    Ok(())
}

fn record_migration(conn: &Connection, version: i32, name: &str) -> DatabaseResult<()> {
    conn.execute(
        "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
        rusqlite::params![version, name],
    )?;
    debug!(version, name, "Migration applied");
    Ok(())
}

/// V1: Outbox table.
fn migrate_v1_outbox_messages(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v1: outbox messages");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS outbox_messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            topic TEXT NOT NULL,
            partition_key BLOB,
            headers BLOB,
            value BLOB,
            idempotency_key BLOB NOT NULL UNIQUE,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            delivered_at TEXT,
            deleted_at TEXT
        );
        ",
    )?;

    record_migration(conn, 1, "outbox_messages")?;
    Ok(())
}

/// V2: Partial index backing the relay's pending scan.
fn migrate_v2_pending_index(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v2: pending index");

    conn.execute_batch(
        "
        CREATE INDEX IF NOT EXISTS idx_outbox_messages_pending
            ON outbox_messages(created_at, id)
            WHERE delivered_at IS NULL AND deleted_at IS NULL;
        ",
    )?;

    record_migration(conn, 2, "pending_index")?;
    Ok(())
}
