//! The Canon resolution worker.
//!
//! [`Worker`] drains the resolution queue of any
//! [`canon_core::store::IdentityStore`]; [`WorkerConfig`] carries its knobs.
//! The `resolver` binary wires both to a SQLite store and, optionally, the
//! JSON API.

pub mod config;
pub mod worker;

pub use config::WorkerConfig;
pub use worker::{TickSummary, Worker};

#[cfg(test)]
mod tests;
