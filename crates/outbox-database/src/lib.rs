//! SQLite storage for the transactional outbox.
//!
//! This crate provides:
//! - Async SQLite executor with a dedicated thread
//! - Versioned migrations for the `outbox_messages` table
//! - Query helpers for the write path (enqueue, soft delete) and the relay
//!   path (pending reads, delivery confirmation)
//!
//! # Architecture
//!
//! The `AsyncDatabase` uses a single dedicated thread for all SQLite operations.
//! Queries are sent through a channel and executed in FIFO order.
//!
//! ```ignore
//! let db = AsyncDatabase::open(path).await?;
//! let pending = db.call(|conn| queries::select_pending_messages(conn, 100)).await?;
//! ```
//!
//! Business code that must commit an event atomically with its own write
//! uses [`queries::enqueue_in_transaction`] on its own transaction instead.

mod error;
mod executor;
mod migrations;
mod models;
pub mod queries;

pub use error::{DatabaseError, DatabaseResult};
pub use executor::AsyncDatabase;
pub use migrations::{run_migrations, CURRENT_VERSION};
pub use models::{OutboxStats, StoredMessage};
