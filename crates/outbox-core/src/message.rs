//! Outbox message model.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Headers;

/// Storage-assigned identifier of an outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(i64);

impl MessageId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for MessageId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// An undelivered outbox row, ready to be published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub topic: String,
    pub partition_key: Vec<u8>,
    pub headers: Headers,
    pub value: Vec<u8>,
    pub idempotency_key: Vec<u8>,
}

impl Message {
    /// Sum of key, value and header bytes, used for batch size logging.
    pub fn payload_size(&self) -> usize {
        self.partition_key.len()
            + self.value.len()
            + self
                .headers
                .iter()
                .map(|(k, v)| k.len() + v.len())
                .sum::<usize>()
    }
}

/// Insert-side shape written by the business write path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOutboxMessage {
    pub topic: String,
    pub partition_key: Vec<u8>,
    pub headers: Headers,
    pub value: Vec<u8>,
    pub idempotency_key: Vec<u8>,
}

impl NewOutboxMessage {
    /// New message for `topic` with a random UUID v4 idempotency key.
    pub fn new(topic: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            partition_key: Vec::new(),
            headers: Headers::new(),
            value: value.into(),
            idempotency_key: uuid::Uuid::new_v4().as_bytes().to_vec(),
        }
    }

    pub fn partition_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.partition_key = key.into();
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.insert(key, value);
        self
    }

    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Override the generated idempotency key.
    pub fn idempotency_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.idempotency_key = key.into();
        self
    }
}
