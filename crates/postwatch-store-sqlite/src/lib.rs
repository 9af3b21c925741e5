//! SQLite backend for postwatch.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. [`SqliteStore`] answers every
//! [`ForumProvider`](postwatch_core::provider::ForumProvider) lookup and
//! spools outgoing mail into an outbox table.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::{ImportSummary, SqliteStore};
