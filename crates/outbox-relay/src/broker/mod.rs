//! Batch publishing with per-message acknowledgement.
//!
//! [`BrokerSender`] hands every message of a batch to a [`BrokerProducer`]
//! and then waits for exactly one delivery report per message. The call is
//! bounded by a deadline that starts when the call starts, and the producer's
//! outbound queue is purged on every exit path so nothing from an abandoned
//! batch is sent later behind the relay's back.

#[cfg(feature = "kafka")]
pub mod kafka;

use crate::{MessageSender, SendError, SendResult};
use async_trait::async_trait;
use outbox_core::{Headers, Message};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default per-call delivery deadline.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(2);

/// A message as handed to the broker client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerRecord {
    pub topic: String,
    pub key: Vec<u8>,
    pub headers: Headers,
    pub payload: Vec<u8>,
}

impl From<&Message> for BrokerRecord {
    fn from(message: &Message) -> Self {
        Self {
            topic: message.topic.clone(),
            key: message.partition_key.clone(),
            headers: message.headers.clone(),
            payload: message.value.clone(),
        }
    }
}

/// Delivery report for one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryEvent {
    /// The broker stored the record.
    Delivered {
        topic: String,
        partition: i32,
        offset: i64,
    },
    /// The record was rejected for its topic partition.
    PartitionError {
        topic: String,
        partition: Option<i32>,
        reason: String,
    },
    /// The client could not talk to the broker.
    BrokerError(String),
    /// A report the sender has no mapping for.
    Unknown(String),
}

/// Local failure to enqueue a record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProduceError {
    #[error("producer queue is full")]
    QueueFull,
    #[error("{0}")]
    Other(String),
}

impl From<ProduceError> for SendError {
    fn from(err: ProduceError) -> Self {
        match err {
            ProduceError::QueueFull => SendError::QueueFull,
            ProduceError::Other(reason) => SendError::Produce(reason),
        }
    }
}

/// Broker client used by [`BrokerSender`].
///
/// `produce` must not block. The producer reports the outcome of each
/// accepted record exactly once on `reports`, unless the receiver is gone.
pub trait BrokerProducer: Send + Sync {
    fn produce(
        &self,
        record: BrokerRecord,
        reports: mpsc::Sender<DeliveryEvent>,
    ) -> Result<(), ProduceError>;

    /// Drop records still waiting in the local outbound queue.
    fn purge(&self) -> Result<(), ProduceError>;
}

impl<P: BrokerProducer + ?Sized> BrokerProducer for Arc<P> {
    fn produce(
        &self,
        record: BrokerRecord,
        reports: mpsc::Sender<DeliveryEvent>,
    ) -> Result<(), ProduceError> {
        (**self).produce(record, reports)
    }

    fn purge(&self) -> Result<(), ProduceError> {
        (**self).purge()
    }
}

/// Purges the producer queue when dropped.
struct PurgeOnExit<'a, P: BrokerProducer> {
    producer: &'a P,
}

impl<P: BrokerProducer> Drop for PurgeOnExit<'_, P> {
    fn drop(&mut self) {
        if let Err(e) = self.producer.purge() {
            warn!(error = %e, "Failed to purge producer queue");
        }
    }
}

/// [`MessageSender`] that publishes a batch and waits for every acknowledgement.
///
/// Calls are serialized: at most one batch is in flight.
pub struct BrokerSender<P> {
    producer: P,
    max_wait: Duration,
    in_flight: Mutex<()>,
}

impl<P: BrokerProducer> BrokerSender<P> {
    pub fn new(producer: P) -> Self {
        Self {
            producer,
            max_wait: DEFAULT_MAX_WAIT,
            in_flight: Mutex::new(()),
        }
    }

    /// Override the per-call delivery deadline.
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }
}

#[async_trait]
impl<P: BrokerProducer> MessageSender for BrokerSender<P> {
    async fn send_message(&self, cancel: &CancellationToken, batch: &[Message]) -> SendResult<()> {
        let deadline = Instant::now() + self.max_wait;
        let deadline_exceeded = |outstanding| SendError::DeadlineExceeded {
            timeout: self.max_wait,
            outstanding,
        };

        let _in_flight = tokio::select! {
            guard = self.in_flight.lock() => guard,
            _ = cancel.cancelled() => return Err(SendError::Cancelled),
            _ = tokio::time::sleep_until(deadline) => return Err(deadline_exceeded(batch.len())),
        };

        if batch.is_empty() {
            return Ok(());
        }

        let _purge = PurgeOnExit {
            producer: &self.producer,
        };
        let (reports, mut events) = mpsc::channel(batch.len());

        for message in batch {
            self.producer
                .produce(BrokerRecord::from(message), reports.clone())
                .map_err(|e| {
                    warn!(id = %message.id, topic = %message.topic, error = %e, "Failed to enqueue message");
                    SendError::from(e)
                })?;
        }
        drop(reports);

        let mut outstanding = batch.len();
        while outstanding > 0 {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SendError::Cancelled),
                _ = tokio::time::sleep_until(deadline) => return Err(deadline_exceeded(outstanding)),
                event = events.recv() => event,
            };

            match event {
                Some(DeliveryEvent::Delivered {
                    topic,
                    partition,
                    offset,
                }) => {
                    debug!(topic = %topic, partition, offset, "Message delivered");
                    outstanding -= 1;
                }
                Some(DeliveryEvent::PartitionError {
                    topic,
                    partition,
                    reason,
                }) => {
                    return Err(SendError::Partition {
                        topic,
                        partition,
                        reason,
                    });
                }
                Some(DeliveryEvent::BrokerError(reason)) => {
                    return Err(SendError::DeliveryFailed(reason));
                }
                Some(DeliveryEvent::Unknown(description)) => {
                    warn!(event = %description, "Unknown delivery event");
                    return Err(SendError::UnknownEvent(description));
                }
                None => {
                    return Err(SendError::DeliveryFailed(format!(
                        "delivery reports stopped with {} outstanding",
                        outstanding
                    )));
                }
            }
        }

        Ok(())
    }
}
