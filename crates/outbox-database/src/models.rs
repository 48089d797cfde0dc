//! Database model types.

use chrono::{DateTime, Utc};
use outbox_core::{Headers, Message, MessageId};
use serde::Serialize;

/// Full outbox row including lifecycle timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: MessageId,
    pub topic: String,
    pub partition_key: Vec<u8>,
    pub headers: Headers,
    pub value: Vec<u8>,
    pub idempotency_key: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl StoredMessage {
    /// Still visible to the relay.
    pub fn is_pending(&self) -> bool {
        self.delivered_at.is_none() && self.deleted_at.is_none()
    }

    pub fn into_message(self) -> Message {
        Message {
            id: self.id,
            topic: self.topic,
            partition_key: self.partition_key,
            headers: self.headers,
            value: self.value,
            idempotency_key: self.idempotency_key,
        }
    }
}

/// Row counts by lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutboxStats {
    pub pending: i64,
    pub delivered: i64,
    pub deleted: i64,
    /// Creation time of the oldest pending row, if any.
    pub oldest_pending_at: Option<DateTime<Utc>>,
}
