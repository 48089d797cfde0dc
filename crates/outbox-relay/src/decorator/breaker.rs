//! Circuit breaker around a sender.

use crate::breaker::{BreakerError, CircuitBreaker};
use crate::{MessageSender, SendError, SendResult};
use async_trait::async_trait;
use outbox_core::Message;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

impl From<BreakerError> for SendError {
    fn from(err: BreakerError) -> Self {
        match err {
            BreakerError::Open => SendError::CircuitOpen,
            BreakerError::TooManyRequests => SendError::TooManyRequests,
        }
    }
}

/// Admits each send through a [`CircuitBreaker`] and reports its outcome.
///
/// While the breaker is open the inner sender is not called. A cancelled
/// send is released without counting as a success or a failure.
pub struct CircuitBreakerSender<S> {
    inner: S,
    breaker: Arc<CircuitBreaker>,
}

impl<S> CircuitBreakerSender<S> {
    pub fn new(inner: S, breaker: Arc<CircuitBreaker>) -> Self {
        Self { inner, breaker }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }
}

#[async_trait]
impl<S: MessageSender> MessageSender for CircuitBreakerSender<S> {
    async fn send_message(&self, cancel: &CancellationToken, batch: &[Message]) -> SendResult<()> {
        let admission = self.breaker.allow().map_err(|e| {
            trace!(breaker = %self.breaker.name(), error = %e, "Send rejected by circuit breaker");
            SendError::from(e)
        })?;

        let result = self.inner.send_message(cancel, batch).await;
        match result {
            // Shutdown cut the call short; the broker's health is unknown.
            Err(SendError::Cancelled) => self.breaker.release(admission),
            _ => self.breaker.record(admission, result.is_ok()),
        }
        result
    }
}
