//! Error type for `canon-store-sqlite`.

use canon_core::{Classify, FailureClass};
use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Core(#[from] canon_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Classify for Error {
  fn class(&self) -> FailureClass {
    match self {
      Error::Core(e) => e.class(),
      Error::Database(e) if is_transient(e) => FailureClass::Transient,
      _ => FailureClass::Permanent,
    }
  }
}

/// Lock contention and a closed connection clear up on their own; everything
/// else is treated as permanent.
fn is_transient(e: &tokio_rusqlite::Error) -> bool {
  match e {
    tokio_rusqlite::Error::ConnectionClosed => true,
    tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(f, _)) => {
      matches!(f.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    }
    _ => false,
  }
}

/// Whether `e` is a UNIQUE / CHECK / NOT NULL violation.
pub(crate) fn is_constraint_violation(e: &rusqlite::Error) -> bool {
  matches!(
    e,
    rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation
  )
}
