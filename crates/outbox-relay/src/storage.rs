//! Reader and confirmer backed by the SQLite outbox.

use crate::{MessageDeliveryConfirmer, MessagesReader, StorageError, StorageResult};
use async_trait::async_trait;
use outbox_core::{Message, MessageId};
use outbox_database::AsyncDatabase;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Reads pending outbox rows.
///
/// Closing the reader only stops it from issuing reads. The database itself
/// is owned and closed by whoever opened it.
pub struct SqliteMessagesReader {
    db: AsyncDatabase,
    closed: AtomicBool,
}

impl SqliteMessagesReader {
    pub fn new(db: AsyncDatabase) -> Self {
        Self {
            db,
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessagesReader for SqliteMessagesReader {
    async fn read_messages(
        &self,
        cancel: &CancellationToken,
        limit: usize,
    ) -> StorageResult<Vec<Message>> {
        if self.is_closed() {
            return Err(StorageError::Closed);
        }

        let messages = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StorageError::Cancelled),
            result = self.db.pending_messages(limit) => result?,
        };

        if !messages.is_empty() {
            debug!(count = messages.len(), limit, "Read pending outbox messages");
        }
        Ok(messages)
    }

    async fn close(&self) -> StorageResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!(path = %self.db.path(), "Outbox reader closed");
        }
        Ok(())
    }
}

/// Marks delivered outbox rows.
pub struct SqliteDeliveryConfirmer {
    db: AsyncDatabase,
}

impl SqliteDeliveryConfirmer {
    pub fn new(db: AsyncDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MessageDeliveryConfirmer for SqliteDeliveryConfirmer {
    /// The update is not abandoned on cancellation: once the broker has
    /// acknowledged a batch, recording that is always worth finishing.
    async fn confirm_message_delivery(
        &self,
        _cancel: &CancellationToken,
        ids: &[MessageId],
    ) -> StorageResult<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let updated = self.db.mark_delivered(ids.to_vec()).await?;
        if updated < ids.len() {
            debug!(
                requested = ids.len(),
                updated,
                "Some messages were already confirmed"
            );
        }
        Ok(())
    }
}
