//! The relay loop: Reader → Sender → Confirmer.

use crate::{
    ConfirmerHandle, MessageDeliveryConfirmer, MessageSender, MessagesReader, ReaderHandle,
    RelayError, RelayResult, SendError, SenderHandle,
};
use outbox_core::{Message, MessageId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What to do when a delivered batch cannot be confirmed.
///
/// The batch stays pending either way and is sent again on a later poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfirmFailurePolicy {
    /// Log and keep relaying.
    #[default]
    Continue,
    /// Stop the relay with `RelayError::Confirm`.
    Terminate,
}

/// Relay loop settings, read once at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySettings {
    /// Maximum messages read and sent per batch.
    pub batch_limit: usize,
    /// Wait after an empty poll.
    pub poll_delay: Duration,
    /// Whether an unconfirmed batch stops the relay.
    pub confirm_failure: ConfirmFailurePolicy,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            batch_limit: 100,
            poll_delay: Duration::from_millis(100),
            confirm_failure: ConfirmFailurePolicy::Continue,
        }
    }
}

/// Live counters, shared with whoever wants to observe the relay.
#[derive(Debug, Default)]
pub struct RelayStats {
    polls: AtomicU64,
    empty_polls: AtomicU64,
    relayed_batches: AtomicU64,
    relayed_messages: AtomicU64,
    relayed_bytes: AtomicU64,
    undeliverable_batches: AtomicU64,
    confirm_failures: AtomicU64,
}

/// Point-in-time copy of [`RelayStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStatsSnapshot {
    pub polls: u64,
    pub empty_polls: u64,
    pub relayed_batches: u64,
    pub relayed_messages: u64,
    /// Sum of [`Message::payload_size`] over relayed messages.
    pub relayed_bytes: u64,
    pub undeliverable_batches: u64,
    pub confirm_failures: u64,
}

impl RelayStats {
    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            polls: self.polls.load(Ordering::Relaxed),
            empty_polls: self.empty_polls.load(Ordering::Relaxed),
            relayed_batches: self.relayed_batches.load(Ordering::Relaxed),
            relayed_messages: self.relayed_messages.load(Ordering::Relaxed),
            relayed_bytes: self.relayed_bytes.load(Ordering::Relaxed),
            undeliverable_batches: self.undeliverable_batches.load(Ordering::Relaxed),
            confirm_failures: self.confirm_failures.load(Ordering::Relaxed),
        }
    }

    fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Builder for [`MessagesRelay`].
#[derive(Default)]
pub struct MessagesRelayBuilder {
    reader: Option<ReaderHandle>,
    sender: Option<SenderHandle>,
    confirmer: Option<ConfirmerHandle>,
    settings: RelaySettings,
}

impl MessagesRelayBuilder {
    pub fn reader(mut self, reader: impl MessagesReader + 'static) -> Self {
        self.reader = Some(Arc::new(reader));
        self
    }

    pub fn reader_handle(mut self, reader: ReaderHandle) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn sender(mut self, sender: impl MessageSender + 'static) -> Self {
        self.sender = Some(Arc::new(sender));
        self
    }

    pub fn sender_handle(mut self, sender: SenderHandle) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn confirmer(mut self, confirmer: impl MessageDeliveryConfirmer + 'static) -> Self {
        self.confirmer = Some(Arc::new(confirmer));
        self
    }

    pub fn confirmer_handle(mut self, confirmer: ConfirmerHandle) -> Self {
        self.confirmer = Some(confirmer);
        self
    }

    pub fn settings(mut self, settings: RelaySettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> RelayResult<MessagesRelay> {
        let reader = self
            .reader
            .ok_or_else(|| RelayError::Configuration("reader is required".to_string()))?;
        let sender = self
            .sender
            .ok_or_else(|| RelayError::Configuration("sender is required".to_string()))?;
        let confirmer = self
            .confirmer
            .ok_or_else(|| RelayError::Configuration("confirmer is required".to_string()))?;

        if self.settings.batch_limit == 0 {
            return Err(RelayError::Configuration(
                "batch_limit must be greater than zero".to_string(),
            ));
        }

        Ok(MessagesRelay {
            reader,
            sender,
            confirmer,
            settings: self.settings,
            stats: Arc::new(RelayStats::default()),
        })
    }
}

/// Moves outbox messages to the broker until cancelled.
///
/// The relay is the only caller of its reader, sender and confirmer, and
/// processes one batch at a time.
pub struct MessagesRelay {
    reader: ReaderHandle,
    sender: SenderHandle,
    confirmer: ConfirmerHandle,
    settings: RelaySettings,
    stats: Arc<RelayStats>,
}

impl MessagesRelay {
    pub fn builder() -> MessagesRelayBuilder {
        MessagesRelayBuilder::default()
    }

    pub fn stats(&self) -> Arc<RelayStats> {
        self.stats.clone()
    }

    /// Run until `cancel` fires or a fatal error occurs.
    ///
    /// Returns `Ok(())` only after cancellation and a clean reader close.
    pub async fn relay_messages(&self, cancel: &CancellationToken) -> RelayResult<()> {
        info!(
            batch_limit = self.settings.batch_limit,
            poll_delay_ms = self.settings.poll_delay.as_millis() as u64,
            confirm_failure = ?self.settings.confirm_failure,
            "Outbox relay started"
        );

        loop {
            if cancel.is_cancelled() {
                return self.wind_down().await;
            }

            RelayStats::incr(&self.stats.polls);
            let batch = match self
                .reader
                .read_messages(cancel, self.settings.batch_limit)
                .await
            {
                Ok(batch) => batch,
                Err(e) if cancel.is_cancelled() => {
                    debug!(error = %e, "Read interrupted by shutdown");
                    return self.wind_down().await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to read outbox messages");
                    return Err(RelayError::Read(e));
                }
            };

            if batch.is_empty() {
                RelayStats::incr(&self.stats.empty_polls);
                tokio::select! {
                    _ = cancel.cancelled() => return self.wind_down().await,
                    _ = tokio::time::sleep(self.settings.poll_delay) => continue,
                }
            }

            let bytes: usize = batch.iter().map(Message::payload_size).sum();
            debug!(messages = batch.len(), bytes, "Relaying batch");

            match self.sender.send_message(cancel, &batch).await {
                Ok(()) => {}
                Err(SendError::Cancelled) => continue,
                Err(e) if e.is_undeliverable() => {
                    RelayStats::incr(&self.stats.undeliverable_batches);
                    warn!(messages = batch.len(), error = %e, "Unable to deliver batch, will retry");
                    // The next attempt may fail without ever suspending.
                    tokio::task::yield_now().await;
                    continue;
                }
                Err(e) => {
                    error!(messages = batch.len(), error = %e, "Failed to send outbox messages");
                    return Err(RelayError::Send(e));
                }
            }

            let ids: Vec<MessageId> = batch.iter().map(|m| m.id).collect();
            match self.confirmer.confirm_message_delivery(cancel, &ids).await {
                Ok(()) => {
                    RelayStats::incr(&self.stats.relayed_batches);
                    self.stats
                        .relayed_messages
                        .fetch_add(ids.len() as u64, Ordering::Relaxed);
                    self.stats
                        .relayed_bytes
                        .fetch_add(bytes as u64, Ordering::Relaxed);
                    debug!(messages = ids.len(), bytes, "Batch relayed");
                }
                Err(e) => {
                    RelayStats::incr(&self.stats.confirm_failures);
                    match self.settings.confirm_failure {
                        ConfirmFailurePolicy::Continue => {
                            warn!(messages = ids.len(), error = %e, "Failed to confirm delivered batch, it will be sent again");
                            tokio::task::yield_now().await;
                        }
                        ConfirmFailurePolicy::Terminate => {
                            error!(messages = ids.len(), error = %e, "Failed to confirm delivered batch");
                            return Err(RelayError::Confirm(e));
                        }
                    }
                }
            }
        }
    }

    async fn wind_down(&self) -> RelayResult<()> {
        let stats = self.stats.snapshot();
        match self.reader.close().await {
            Ok(()) => {
                info!(
                    relayed_batches = stats.relayed_batches,
                    relayed_messages = stats.relayed_messages,
                    relayed_bytes = stats.relayed_bytes,
                    undeliverable_batches = stats.undeliverable_batches,
                    confirm_failures = stats.confirm_failures,
                    "Outbox relay stopped"
                );
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to close message reader");
                Err(RelayError::ReaderClose(e))
            }
        }
    }
}
