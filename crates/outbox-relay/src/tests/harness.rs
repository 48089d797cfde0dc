//! Test harness for relay tests.
//!
//! Provides:
//! - MockStore: in-memory outbox shared by MockReader and MockConfirmer
//! - MockSender: scripted `MessageSender` that records every batch
//! - MockProducer: scripted `BrokerProducer` for BrokerSender tests

use crate::{
    BrokerProducer, BrokerRecord, DeliveryEvent, MessageDeliveryConfirmer, MessageSender,
    MessagesReader, ProduceError, SendError, SendResult, StorageError, StorageResult,
};
use async_trait::async_trait;
use outbox_core::{Headers, Message, MessageId};
use outbox_database::DatabaseError;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub fn message(id: i64) -> Message {
    Message {
        id: MessageId::new(id),
        topic: "orders".to_string(),
        partition_key: format!("key-{}", id).into_bytes(),
        headers: Headers::new().with("seq", id.to_string()),
        value: format!("payload-{}", id).into_bytes(),
        idempotency_key: format!("idem-{}", id).into_bytes(),
    }
}

pub fn ids(values: &[i64]) -> Vec<MessageId> {
    values.iter().copied().map(MessageId::new).collect()
}

// =============================================================================
// Store, reader, confirmer
// =============================================================================

#[derive(Default)]
struct StoreInner {
    messages: Vec<Message>,
    delivered: BTreeMap<MessageId, usize>,
    confirm_calls: Vec<Vec<MessageId>>,
    read_calls: usize,
}

/// In-memory outbox. Clones share state.
#[derive(Clone, Default)]
pub struct MockStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl MockStore {
    pub fn with_messages(count: i64) -> Self {
        let store = Self::default();
        for id in 1..=count {
            store.push(message(id));
        }
        store
    }

    pub fn push(&self, message: Message) {
        self.inner.lock().unwrap().messages.push(message);
    }

    pub fn pending(&self) -> Vec<MessageId> {
        let inner = self.inner.lock().unwrap();
        inner
            .messages
            .iter()
            .map(|m| m.id)
            .filter(|id| !inner.delivered.contains_key(id))
            .collect()
    }

    pub fn confirm_calls(&self) -> Vec<Vec<MessageId>> {
        self.inner.lock().unwrap().confirm_calls.clone()
    }

    pub fn read_calls(&self) -> usize {
        self.inner.lock().unwrap().read_calls
    }

    pub fn is_delivered(&self, id: MessageId) -> bool {
        self.inner.lock().unwrap().delivered.contains_key(&id)
    }

    pub fn reader(&self) -> MockReader {
        MockReader {
            store: self.clone(),
            fail_reads: Arc::new(AtomicBool::new(false)),
            fail_close: Arc::new(AtomicBool::new(false)),
            close_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn confirmer(&self) -> MockConfirmer {
        MockConfirmer {
            store: self.clone(),
            fail: Arc::new(AtomicBool::new(false)),
        }
    }
}

fn storage_failure(what: &str) -> StorageError {
    StorageError::Database(DatabaseError::Connection(format!("{} failed", what)))
}

/// Reader over a `MockStore`. Clones share failure switches and counters.
#[derive(Clone)]
pub struct MockReader {
    store: MockStore,
    fail_reads: Arc<AtomicBool>,
    fail_close: Arc<AtomicBool>,
    close_calls: Arc<AtomicUsize>,
}

impl MockReader {
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessagesReader for MockReader {
    async fn read_messages(
        &self,
        _cancel: &CancellationToken,
        limit: usize,
    ) -> StorageResult<Vec<Message>> {
        let mut inner = self.store.inner.lock().unwrap();
        inner.read_calls += 1;
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(storage_failure("read"));
        }
        let batch = inner
            .messages
            .iter()
            .filter(|m| !inner.delivered.contains_key(&m.id))
            .take(limit)
            .cloned()
            .collect();
        Ok(batch)
    }

    async fn close(&self) -> StorageResult<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(storage_failure("close"));
        }
        Ok(())
    }
}

/// Confirmer over a `MockStore`.
#[derive(Clone)]
pub struct MockConfirmer {
    store: MockStore,
    fail: Arc<AtomicBool>,
}

impl MockConfirmer {
    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessageDeliveryConfirmer for MockConfirmer {
    async fn confirm_message_delivery(
        &self,
        _cancel: &CancellationToken,
        ids: &[MessageId],
    ) -> StorageResult<()> {
        let mut inner = self.store.inner.lock().unwrap();
        inner.confirm_calls.push(ids.to_vec());
        if self.fail.load(Ordering::SeqCst) {
            return Err(storage_failure("confirm"));
        }
        for id in ids {
            *inner.delivered.entry(*id).or_insert(0) += 1;
        }
        Ok(())
    }
}

// =============================================================================
// Sender
// =============================================================================

/// How MockSender answers one call.
#[derive(Debug, Clone)]
pub enum SendBehavior {
    Succeed,
    Fail(SendError),
    /// Block until the token fires, then report cancellation.
    HangUntilCancelled,
}

#[derive(Default)]
struct SenderInner {
    script: VecDeque<SendBehavior>,
    batches: Vec<Vec<MessageId>>,
}

/// Scripted sender. Clones share state.
#[derive(Clone)]
pub struct MockSender {
    inner: Arc<Mutex<SenderInner>>,
    default: Arc<Mutex<SendBehavior>>,
}

impl MockSender {
    pub fn new(default: SendBehavior) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SenderInner::default())),
            default: Arc::new(Mutex::new(default)),
        }
    }

    pub fn succeeding() -> Self {
        Self::new(SendBehavior::Succeed)
    }

    pub fn failing(err: SendError) -> Self {
        Self::new(SendBehavior::Fail(err))
    }

    /// Queue a behaviour for the next call, ahead of the default.
    pub fn queue(&self, behavior: SendBehavior) {
        self.inner.lock().unwrap().script.push_back(behavior);
    }

    pub fn set_default(&self, behavior: SendBehavior) {
        *self.default.lock().unwrap() = behavior;
    }

    pub fn calls(&self) -> usize {
        self.inner.lock().unwrap().batches.len()
    }

    pub fn batches(&self) -> Vec<Vec<MessageId>> {
        self.inner.lock().unwrap().batches.clone()
    }
}

#[async_trait]
impl MessageSender for MockSender {
    async fn send_message(&self, cancel: &CancellationToken, batch: &[Message]) -> SendResult<()> {
        let behavior = {
            let mut inner = self.inner.lock().unwrap();
            inner.batches.push(batch.iter().map(|m| m.id).collect());
            inner
                .script
                .pop_front()
                .unwrap_or_else(|| self.default.lock().unwrap().clone())
        };

        match behavior {
            SendBehavior::Succeed => Ok(()),
            SendBehavior::Fail(err) => Err(err),
            SendBehavior::HangUntilCancelled => {
                cancel.cancelled().await;
                Err(SendError::Cancelled)
            }
        }
    }
}

// =============================================================================
// Broker producer
// =============================================================================

/// How MockProducer handles one record.
#[derive(Debug, Clone)]
pub enum ProduceBehavior {
    /// Report delivery after the given delay.
    Ack(Duration),
    PartitionError,
    BrokerError,
    Unknown,
    /// Accept the record and never report on it.
    Silent,
    /// Accept the record and drop its report channel.
    Forget,
    QueueFull,
    Reject,
}

#[derive(Default)]
struct ProducerInner {
    script: VecDeque<ProduceBehavior>,
    produced: Vec<BrokerRecord>,
    held: Vec<mpsc::Sender<DeliveryEvent>>,
    log: Vec<String>,
    purges: usize,
}

/// Scripted broker client. Clones share state.
#[derive(Clone)]
pub struct MockProducer {
    inner: Arc<Mutex<ProducerInner>>,
    default: ProduceBehavior,
    fail_purge: bool,
}

impl MockProducer {
    pub fn new(default: ProduceBehavior) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ProducerInner::default())),
            default,
            fail_purge: false,
        }
    }

    pub fn acking() -> Self {
        Self::new(ProduceBehavior::Ack(Duration::ZERO))
    }

    pub fn with_failing_purge(mut self) -> Self {
        self.fail_purge = true;
        self
    }

    pub fn queue(&self, behavior: ProduceBehavior) {
        self.inner.lock().unwrap().script.push_back(behavior);
    }

    pub fn produced(&self) -> Vec<BrokerRecord> {
        self.inner.lock().unwrap().produced.clone()
    }

    pub fn purges(&self) -> usize {
        self.inner.lock().unwrap().purges
    }

    /// Produce and purge calls in order, as `produce:<payload>` and `purge`.
    pub fn log(&self) -> Vec<String> {
        self.inner.lock().unwrap().log.clone()
    }
}

impl BrokerProducer for MockProducer {
    fn produce(
        &self,
        record: BrokerRecord,
        reports: mpsc::Sender<DeliveryEvent>,
    ) -> Result<(), ProduceError> {
        let mut inner = self.inner.lock().unwrap();
        let behavior = inner
            .script
            .pop_front()
            .unwrap_or_else(|| self.default.clone());
        inner
            .log
            .push(format!("produce:{}", String::from_utf8_lossy(&record.payload)));

        let event = match behavior {
            ProduceBehavior::QueueFull => return Err(ProduceError::QueueFull),
            ProduceBehavior::Reject => {
                return Err(ProduceError::Other("Broker: Unknown topic".to_string()))
            }
            ProduceBehavior::Ack(delay) => {
                let topic = record.topic.clone();
                inner.produced.push(record);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = reports
                        .send(DeliveryEvent::Delivered {
                            topic,
                            partition: 0,
                            offset: 42,
                        })
                        .await;
                });
                return Ok(());
            }
            ProduceBehavior::Silent => {
                // Keep the channel open so only the deadline can end the wait.
                inner.produced.push(record);
                inner.held.push(reports);
                return Ok(());
            }
            ProduceBehavior::Forget => {
                inner.produced.push(record);
                return Ok(());
            }
            ProduceBehavior::PartitionError => DeliveryEvent::PartitionError {
                topic: record.topic.clone(),
                partition: Some(3),
                reason: "Broker: Not leader for partition".to_string(),
            },
            ProduceBehavior::BrokerError => {
                DeliveryEvent::BrokerError("Local: All broker connections are down".to_string())
            }
            ProduceBehavior::Unknown => DeliveryEvent::Unknown("stats event".to_string()),
        };

        inner.produced.push(record);
        let _ = reports.try_send(event);
        Ok(())
    }

    fn purge(&self) -> Result<(), ProduceError> {
        let mut inner = self.inner.lock().unwrap();
        inner.purges += 1;
        inner.log.push("purge".to_string());
        inner.held.clear();
        if self.fail_purge {
            return Err(ProduceError::Other("purge failed".to_string()));
        }
        Ok(())
    }
}
