//! Standalone query functions that work with any Connection.
//!
//! Each function takes a `&Connection` as its first parameter, so the same
//! helpers run inside the async executor and inside a caller's transaction.

use crate::{DatabaseError, DatabaseResult, OutboxStats, StoredMessage};
use chrono::{DateTime, SecondsFormat, Utc};
use outbox_core::{Headers, Message, MessageId, NewOutboxMessage};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Transaction};
use tracing::debug;

/// Upper bound on ids bound into one `IN (...)` clause.
const CONFIRM_CHUNK_SIZE: usize = 500;

/// Current time in the stored timestamp format (RFC 3339, millisecond precision).
///
/// The fixed width keeps lexicographic and chronological order identical.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ==========================================
// Write path
// ==========================================

/// Insert a new outbox message.
pub fn insert_outbox_message(conn: &Connection, msg: &NewOutboxMessage) -> DatabaseResult<MessageId> {
    let now = now_timestamp();
    let headers = encode_headers(&msg.headers)?;
    conn.execute(
        "INSERT INTO outbox_messages (topic, partition_key, headers, value, idempotency_key, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![
            msg.topic,
            msg.partition_key,
            headers,
            msg.value,
            msg.idempotency_key,
            now,
        ],
    )?;
    let id = MessageId::new(conn.last_insert_rowid());
    debug!(id = %id, topic = %msg.topic, "Outbox message inserted");
    Ok(id)
}

/// Insert an outbox message inside the caller's transaction.
///
/// The row becomes visible to the relay only when `tx` commits, together with
/// whatever business rows the caller wrote in the same transaction.
pub fn enqueue_in_transaction(tx: &Transaction<'_>, msg: &NewOutboxMessage) -> DatabaseResult<MessageId> {
    insert_outbox_message(tx, msg)
}

/// Soft delete a message so the relay never reads it.
///
/// Returns `NotFound` if no row has this id. Deleting twice keeps the first
/// deletion time.
pub fn soft_delete(conn: &Connection, id: MessageId) -> DatabaseResult<()> {
    let now = now_timestamp();
    let count = conn.execute(
        "UPDATE outbox_messages
         SET deleted_at = COALESCE(deleted_at, ?1), updated_at = ?1
         WHERE id = ?2",
        params![now, id.get()],
    )?;
    if count == 0 {
        return Err(DatabaseError::NotFound(format!("outbox message {}", id)));
    }
    Ok(())
}

// ==========================================
// Relay path
// ==========================================

/// Get up to `limit` undelivered, non-deleted messages, oldest first.
pub fn select_pending_messages(conn: &Connection, limit: usize) -> DatabaseResult<Vec<Message>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, topic, partition_key, headers, value, idempotency_key
         FROM outbox_messages
         WHERE delivered_at IS NULL AND deleted_at IS NULL
         ORDER BY created_at ASC, id ASC
         LIMIT ?1",
    )?;

    let rows = stmt
        .query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<Vec<u8>>>(2)?,
                row.get::<_, Option<Vec<u8>>>(3)?,
                row.get::<_, Option<Vec<u8>>>(4)?,
                row.get::<_, Vec<u8>>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(id, topic, partition_key, headers, value, idempotency_key)| -> DatabaseResult<Message> {
            Ok(Message {
                id: MessageId::new(id),
                topic,
                partition_key: partition_key.unwrap_or_default(),
                headers: decode_headers(headers)?,
                value: value.unwrap_or_default(),
                idempotency_key,
            })
        })
        .collect()
}

/// Mark messages as delivered.
///
/// Rows that are already delivered keep their first `delivered_at`. Returns
/// the number of rows that changed state.
pub fn mark_delivered(conn: &Connection, ids: &[MessageId]) -> DatabaseResult<usize> {
    if ids.is_empty() {
        return Ok(0);
    }

    let now = now_timestamp();
    let tx = conn.unchecked_transaction()?;
    let mut updated = 0;

    for chunk in ids.chunks(CONFIRM_CHUNK_SIZE) {
        let placeholders = (0..chunk.len())
            .map(|i| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE outbox_messages
             SET updated_at = ?1, delivered_at = ?1
             WHERE delivered_at IS NULL AND id IN ({})",
            placeholders
        );

        let mut values = Vec::with_capacity(chunk.len() + 1);
        values.push(Value::Text(now.clone()));
        values.extend(chunk.iter().map(|id| Value::Integer(id.get())));

        updated += tx.execute(&sql, params_from_iter(values.iter()))?;
    }

    tx.commit()?;
    debug!(requested = ids.len(), updated, "Outbox messages marked delivered");
    Ok(updated)
}

// ==========================================
// Inspection
// ==========================================

/// Get a message by ID, regardless of its lifecycle state.
pub fn get_message(conn: &Connection, id: MessageId) -> DatabaseResult<Option<StoredMessage>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, topic, partition_key, headers, value, idempotency_key,
                created_at, updated_at, delivered_at, deleted_at
         FROM outbox_messages WHERE id = ?1",
    )?;

    let row = stmt
        .query_row(params![id.get()], |row| {
            Ok(RawStoredRow {
                id: row.get(0)?,
                topic: row.get(1)?,
                partition_key: row.get(2)?,
                headers: row.get(3)?,
                value: row.get(4)?,
                idempotency_key: row.get(5)?,
                created_at: row.get(6)?,
                updated_at: row.get(7)?,
                delivered_at: row.get(8)?,
                deleted_at: row.get(9)?,
            })
        })
        .optional()?;

    row.map(RawStoredRow::into_stored).transpose()
}

/// Count messages the relay still has to deliver.
pub fn count_pending(conn: &Connection) -> DatabaseResult<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM outbox_messages WHERE delivered_at IS NULL AND deleted_at IS NULL",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Row counts by lifecycle state.
pub fn outbox_stats(conn: &Connection) -> DatabaseResult<OutboxStats> {
    let (pending, delivered, deleted, oldest): (i64, i64, i64, Option<String>) = conn.query_row(
        "SELECT
            COALESCE(SUM(CASE WHEN delivered_at IS NULL AND deleted_at IS NULL THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN delivered_at IS NOT NULL THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN deleted_at IS NOT NULL THEN 1 ELSE 0 END), 0),
            MIN(CASE WHEN delivered_at IS NULL AND deleted_at IS NULL THEN created_at END)
         FROM outbox_messages",
        [],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
    )?;

    Ok(OutboxStats {
        pending,
        delivered,
        deleted,
        oldest_pending_at: oldest.map(|s| parse_datetime(&s)).transpose()?,
    })
}

// ==========================================
// Helpers
// ==========================================

struct RawStoredRow {
    id: i64,
    topic: String,
    partition_key: Option<Vec<u8>>,
    headers: Option<Vec<u8>>,
    value: Option<Vec<u8>>,
    idempotency_key: Vec<u8>,
    created_at: String,
    updated_at: String,
    delivered_at: Option<String>,
    deleted_at: Option<String>,
}

impl RawStoredRow {
    fn into_stored(self) -> DatabaseResult<StoredMessage> {
        Ok(StoredMessage {
            id: MessageId::new(self.id),
            topic: self.topic,
            partition_key: self.partition_key.unwrap_or_default(),
            headers: decode_headers(self.headers)?,
            value: self.value.unwrap_or_default(),
            idempotency_key: self.idempotency_key,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
            delivered_at: self.delivered_at.as_deref().map(parse_datetime).transpose()?,
            deleted_at: self.deleted_at.as_deref().map(parse_datetime).transpose()?,
        })
    }
}

/// Empty headers are stored as NULL.
fn encode_headers(headers: &Headers) -> DatabaseResult<Option<Vec<u8>>> {
    if headers.is_empty() {
        return Ok(None);
    }
    Ok(Some(headers.to_bytes()?))
}

fn decode_headers(raw: Option<Vec<u8>>) -> DatabaseResult<Headers> {
    match raw {
        Some(bytes) => Ok(Headers::from_bytes(&bytes)?),
        None => Ok(Headers::new()),
    }
}

fn parse_datetime(s: &str) -> DatabaseResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::InvalidData(format!("bad timestamp {:?}: {}", s, e)))
}
