//! Error types for `canon-core`.

use thiserror::Error;
use uuid::Uuid;

use crate::{contact::MatchKey, queue::QueueStatus, sighting::SourceTable};

#[derive(Debug, Error)]
pub enum Error {
  /// The contact tuple lacks a usable name or any qualifying contact key.
  #[error("invalid contact: {0}")]
  InvalidContact(String),

  /// Two resolutions for the same key raced and the loser could not attach
  /// to the winner's customer.
  #[error("concurrent create conflict on {0}")]
  ConcurrentCreateConflict(String),

  /// Direct creation refused because a key already identifies a customer.
  #[error("{key} already belongs to customer {customer_id}")]
  DuplicateKey {
    key:         MatchKey,
    customer_id: Uuid,
  },

  #[error("sighting not found: {table}/{sighting_id}")]
  SightingMissing {
    table:       SourceTable,
    sighting_id: Uuid,
  },

  #[error("queue entry not found: {0}")]
  EntryNotFound(i64),

  #[error("queue entry {entry_id} cannot move from {from} to {to}")]
  InvalidTransition {
    entry_id: i64,
    from:     QueueStatus,
    to:       QueueStatus,
  },

  /// The entry is no longer claimed by this worker; stale recovery handed it
  /// to another one.
  #[error("queue entry {entry_id} is no longer claimed by {worker_id}")]
  ClaimLost {
    entry_id:  i64,
    worker_id: String,
  },

  #[error("unknown source table: {0:?}")]
  UnknownSource(String),

  #[error("unknown queue status: {0:?}")]
  UnknownStatus(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

// ─── Classification ──────────────────────────────────────────────────────────

/// How the resolution worker should treat an error raised while processing a
/// single queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
  /// The sighting's data is insufficient; retrying cannot succeed.
  InvalidContact,
  /// The referenced sighting does not exist.
  SightingMissing,
  /// Connection or lock contention; the entry goes back to `pending`.
  Transient,
  /// Another worker owns the entry now. Leave it alone.
  ClaimLost,
  /// Anything else. The entry is marked `failed` for manual follow-up.
  Permanent,
}

impl FailureClass {
  pub fn is_transient(self) -> bool { matches!(self, Self::Transient) }
}

/// Implemented by store error types so callers can decide between retrying
/// and failing an entry without knowing the backend.
pub trait Classify {
  fn class(&self) -> FailureClass;
}

impl Classify for Error {
  fn class(&self) -> FailureClass {
    match self {
      Self::InvalidContact(_) => FailureClass::InvalidContact,
      Self::SightingMissing { .. } => FailureClass::SightingMissing,
      Self::ClaimLost { .. } => FailureClass::ClaimLost,
      _ => FailureClass::Permanent,
    }
  }
}
