//! Behaviour tests for the relay.
//!
//! - `harness.rs`  - mock store, sender and broker producer
//! - `delivery.rs` - batch delivery, confirmation and at-least-once guarantees
//! - `breaker.rs`  - breaker and retry decorators in front of a failing sender
//! - `shutdown.rs` - cancellation, wind-down and exit codes
//! - `broker.rs`   - BrokerSender acknowledgement protocol

mod broker;
pub(crate) mod harness;
