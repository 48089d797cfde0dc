//! Capabilities the relay loop is assembled from.

use crate::{SendResult, StorageResult};
use async_trait::async_trait;
use outbox_core::{Message, MessageId};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Pulls batches of undelivered messages, oldest first.
#[async_trait]
pub trait MessagesReader: Send + Sync {
    /// Up to `limit` messages; an empty vec when nothing is due.
    async fn read_messages(
        &self,
        cancel: &CancellationToken,
        limit: usize,
    ) -> StorageResult<Vec<Message>>;

    /// Release reader resources. Called once when the relay winds down.
    async fn close(&self) -> StorageResult<()>;
}

/// Publishes a batch and returns once every message is acknowledged.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_message(&self, cancel: &CancellationToken, batch: &[Message]) -> SendResult<()>;
}

/// Marks messages as delivered. Must be idempotent.
#[async_trait]
pub trait MessageDeliveryConfirmer: Send + Sync {
    async fn confirm_message_delivery(
        &self,
        cancel: &CancellationToken,
        ids: &[MessageId],
    ) -> StorageResult<()>;
}

/// Shared handle to a reader.
pub type ReaderHandle = Arc<dyn MessagesReader>;

/// Shared handle to a sender.
pub type SenderHandle = Arc<dyn MessageSender>;

/// Shared handle to a confirmer.
pub type ConfirmerHandle = Arc<dyn MessageDeliveryConfirmer>;

#[async_trait]
impl<T: MessageSender + ?Sized> MessageSender for Arc<T> {
    async fn send_message(&self, cancel: &CancellationToken, batch: &[Message]) -> SendResult<()> {
        (**self).send_message(cancel, batch).await
    }
}
