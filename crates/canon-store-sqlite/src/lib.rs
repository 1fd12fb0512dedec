//! SQLite backend for Canon.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Holds the canonical `customers` table,
//! both intake pipelines' sighting tables and the resolution queue in one
//! file, so a sighting and its queue entry commit together.

mod encode;
mod intake;
mod queue;
mod resolve;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;
