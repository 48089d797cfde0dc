//! Core types for the outbox relay.
//!
//! This crate provides:
//! - `Message`: an outbox row ready to be published to the broker
//! - `NewOutboxMessage`: the insert-side shape used by the business write path
//! - `Headers`: ordered string-to-bytes mapping with a compact binary encoding

mod error;
mod headers;
mod message;

pub use error::{HeadersError, HeadersResult};
pub use headers::Headers;
pub use message::{Message, MessageId, NewOutboxMessage};
