//! Relay error types.

use outbox_core::HeadersError;
use outbox_database::DatabaseError;
use std::time::Duration;
use thiserror::Error;

/// Error returned by a `MessageSender`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// Breaker is open, the broker was not contacted
    #[error("Circuit breaker is open")]
    CircuitOpen,

    /// Breaker is half-open and its trial quota is used up
    #[error("Circuit breaker is half-open and rejecting extra requests")]
    TooManyRequests,

    /// Broker communication failed while delivering
    #[error("Message delivery failed: {0}")]
    DeliveryFailed(String),

    /// A single message was rejected by its topic partition
    #[error("Delivery to {topic} (partition {partition:?}) failed: {reason}")]
    Partition {
        topic: String,
        partition: Option<i32>,
        reason: String,
    },

    /// Acknowledgements did not arrive before the per-call deadline
    #[error("Delivery deadline of {timeout:?} exceeded with {outstanding} acknowledgements outstanding")]
    DeadlineExceeded { timeout: Duration, outstanding: usize },

    /// Local producer queue is full
    #[error("Producer queue is full")]
    QueueFull,

    /// Local enqueue failed for a reason other than backpressure
    #[error("Failed to produce message: {0}")]
    Produce(String),

    /// Delivery report of a kind the sender does not understand
    #[error("Unknown delivery event: {0}")]
    UnknownEvent(String),

    /// The cancellation token fired while sending
    #[error("Send cancelled")]
    Cancelled,
}

impl SendError {
    /// Whether the batch simply could not be delivered this time.
    ///
    /// The relay logs these and polls again; every other error ends the relay.
    pub fn is_undeliverable(&self) -> bool {
        matches!(
            self,
            SendError::CircuitOpen
                | SendError::TooManyRequests
                | SendError::DeliveryFailed(_)
                | SendError::Partition { .. }
                | SendError::DeadlineExceeded { .. }
                | SendError::QueueFull
        )
    }
}

/// Result type alias using SendError.
pub type SendResult<T> = Result<T, SendError>;

/// Error returned by the reader and confirmer.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Database error
    #[error("Database error: {0}")]
    Database(DatabaseError),

    /// Stored headers could not be decoded
    #[error("Corrupt message headers: {0}")]
    Headers(#[from] HeadersError),

    /// The reader or its database was closed
    #[error("Storage is closed")]
    Closed,

    /// The cancellation token fired while waiting on storage
    #[error("Storage operation cancelled")]
    Cancelled,
}

impl From<DatabaseError> for StorageError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Closed => StorageError::Closed,
            DatabaseError::Headers(e) => StorageError::Headers(e),
            other => StorageError::Database(other),
        }
    }
}

/// Result type alias using StorageError.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error that ends the relay loop.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Reading the next batch failed
    #[error("Failed to read outbox messages: {0}")]
    Read(#[source] StorageError),

    /// Sending failed with a non-retryable error
    #[error("Failed to send outbox messages: {0}")]
    Send(#[source] SendError),

    /// Confirming a delivered batch failed under the terminate policy
    #[error("Failed to confirm message delivery: {0}")]
    Confirm(#[source] StorageError),

    /// Closing the reader during shutdown failed
    #[error("Failed to close message reader: {0}")]
    ReaderClose(#[source] StorageError),

    /// The relay was assembled with missing or invalid parts
    #[error("Invalid relay configuration: {0}")]
    Configuration(String),
}

/// Result type alias using RelayError.
pub type RelayResult<T> = Result<T, RelayError>;
