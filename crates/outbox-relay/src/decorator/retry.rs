//! Retry while the circuit breaker is open.

use crate::{MessageSender, SendError, SendResult};
use async_trait::async_trait;
use outbox_core::Message;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Re-invokes the inner sender for as long as it reports
/// [`SendError::CircuitOpen`].
///
/// Every other outcome, success included, is returned unchanged. Real
/// delivery errors are never retried here. Between attempts the task yields
/// (or sleeps for `pause` when set) and checks the cancellation token.
pub struct RetrySender<S> {
    inner: S,
    pause: Duration,
}

impl<S> RetrySender<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            pause: Duration::ZERO,
        }
    }

    /// Sleep between attempts instead of only yielding.
    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: MessageSender> MessageSender for RetrySender<S> {
    async fn send_message(&self, cancel: &CancellationToken, batch: &[Message]) -> SendResult<()> {
        let mut rejected: u64 = 0;

        loop {
            match self.inner.send_message(cancel, batch).await {
                Err(SendError::CircuitOpen) => {
                    rejected += 1;
                    if rejected == 1 {
                        debug!(messages = batch.len(), "Circuit open, holding batch until it admits calls");
                    }
                }
                result => {
                    if rejected > 0 {
                        debug!(rejected, "Batch admitted after circuit open");
                    }
                    return result;
                }
            }

            if cancel.is_cancelled() {
                return Err(SendError::Cancelled);
            }

            if self.pause.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(SendError::Cancelled),
                    _ = tokio::time::sleep(self.pause) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outbox_core::MessageId;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Scripted {
        results: Mutex<VecDeque<SendResult<()>>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(results: Vec<SendResult<()>>) -> Self {
            Self {
                results: Mutex::new(results.into()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl MessageSender for Scripted {
        async fn send_message(&self, _: &CancellationToken, _: &[Message]) -> SendResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(SendError::CircuitOpen))
        }
    }

    fn batch() -> Vec<Message> {
        vec![Message {
            id: MessageId::new(1),
            topic: "t".into(),
            partition_key: Vec::new(),
            headers: Default::default(),
            value: b"v".to_vec(),
            idempotency_key: b"k".to_vec(),
        }]
    }

    #[tokio::test]
    async fn test_retries_until_admitted() {
        let sender = RetrySender::new(Scripted::new(vec![
            Err(SendError::CircuitOpen),
            Err(SendError::CircuitOpen),
            Ok(()),
        ]));

        let result = sender.send_message(&CancellationToken::new(), &batch()).await;
        assert_eq!(result, Ok(()));
        assert_eq!(sender.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_other_errors_not_retried() {
        for err in [
            SendError::DeliveryFailed("down".into()),
            SendError::TooManyRequests,
            SendError::Produce("bad".into()),
        ] {
            let sender = RetrySender::new(Scripted::new(vec![Err(err.clone()), Ok(())]));
            let result = sender.send_message(&CancellationToken::new(), &batch()).await;
            assert_eq!(result, Err(err));
            assert_eq!(sender.inner().calls.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn test_cancellation_stops_spin() {
        // Never admits: every call reports CircuitOpen.
        let sender = RetrySender::new(Scripted::new(Vec::new()));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            sender.send_message(&cancel, &batch()),
        )
        .await
        .expect("spin must observe cancellation");
        assert_eq!(result, Err(SendError::Cancelled));
        assert!(sender.inner().calls.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_between_attempts() {
        let sender = RetrySender::new(Scripted::new(vec![
            Err(SendError::CircuitOpen),
            Err(SendError::CircuitOpen),
            Ok(()),
        ]))
        .with_pause(Duration::from_millis(250));

        let started = tokio::time::Instant::now();
        let result = sender.send_message(&CancellationToken::new(), &batch()).await;
        assert_eq!(result, Ok(()));
        assert!(started.elapsed() >= Duration::from_millis(500));
    }
}
