//! `MessageSender` decorators.

mod breaker;
mod retry;

pub use breaker::CircuitBreakerSender;
pub use retry::RetrySender;
