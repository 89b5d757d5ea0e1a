//! SQLite backend for the Verity truth layer.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Every commit is one `BEGIN IMMEDIATE`
//! transaction covering the source, observation and snapshot writes.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;
