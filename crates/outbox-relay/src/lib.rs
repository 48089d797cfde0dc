//! Transactional outbox relay.
//!
//! This crate provides:
//! - MessagesRelay: the loop that moves outbox rows to the broker and confirms them
//! - CircuitBreaker: closed / open / half-open state machine guarding the broker
//! - CircuitBreakerSender and RetrySender: decorators around any `MessageSender`
//! - BrokerSender: batch publish with per-message acknowledgement and a deadline
//! - SQLite reader and confirmer adapters over `outbox-database`
//!
//! The production chain is
//! `RetrySender(CircuitBreakerSender(BrokerSender(producer)))`.

mod breaker;
pub mod broker;
mod command;
pub mod decorator;
mod error;
mod ports;
mod relay;
mod storage;

#[cfg(test)]
mod tests;

pub use breaker::{
    Admission, BreakerError, BreakerSettings, CircuitBreaker, CircuitState, Counts, StateObserver,
};
pub use broker::{BrokerProducer, BrokerRecord, BrokerSender, DeliveryEvent, ProduceError};
pub use command::{relay_command, EXIT_FAILURE, EXIT_SUCCESS};
pub use decorator::{CircuitBreakerSender, RetrySender};
pub use error::{RelayError, RelayResult, SendError, SendResult, StorageError, StorageResult};
pub use ports::{
    ConfirmerHandle, MessageDeliveryConfirmer, MessageSender, MessagesReader, ReaderHandle,
    SenderHandle,
};
pub use relay::{
    ConfirmFailurePolicy, MessagesRelay, MessagesRelayBuilder, RelaySettings, RelayStats,
    RelayStatsSnapshot,
};
pub use storage::{SqliteDeliveryConfirmer, SqliteMessagesReader};
