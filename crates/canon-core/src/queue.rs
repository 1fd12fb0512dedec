//! The resolution queue, a durable, FIFO list of sightings awaiting identity
//! resolution.
//!
//! ```text
//! pending ──claim──▶ processing ──▶ completed
//!    ▲                   │    └────▶ failed ──requeue──┐
//!    └──release/stale────┘                             │
//!    ▲─────────────────────────────────────────────────┘
//! ```

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, sighting::SourceTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
  Pending,
  Processing,
  Completed,
  Failed,
}

impl QueueStatus {
  pub const ALL: [QueueStatus; 4] =
    [Self::Pending, Self::Processing, Self::Completed, Self::Failed];

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Processing => "processing",
      Self::Completed => "completed",
      Self::Failed => "failed",
    }
  }

  /// Whether the state machine allows `self → to`.
  pub fn can_transition(self, to: QueueStatus) -> bool {
    use QueueStatus::*;
    matches!(
      (self, to),
      (Pending, Processing)
        | (Processing, Completed)
        | (Processing, Failed)
        | (Processing, Pending)
        | (Failed, Pending)
    )
  }
}

impl fmt::Display for QueueStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for QueueStatus {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "pending" => Ok(Self::Pending),
      "processing" => Ok(Self::Processing),
      "completed" => Ok(Self::Completed),
      "failed" => Ok(Self::Failed),
      other => Err(Error::UnknownStatus(other.to_owned())),
    }
  }
}

/// One unit of resolution work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
  pub entry_id:      i64,
  pub source:        SourceTable,
  pub sighting_id:   Uuid,
  pub status:        QueueStatus,
  /// Set only when `failed`.
  pub error_message: Option<String>,
  /// Set only when `completed`.
  pub customer_id:   Option<Uuid>,
  pub claimed_by:    Option<String>,
  pub claimed_at:    Option<DateTime<Utc>>,
  /// Enqueue time; FIFO order key.
  pub created_at:    DateTime<Utc>,
  pub updated_at:    DateTime<Utc>,
}

/// Backlog snapshot for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
  pub pending:        u64,
  pub processing:     u64,
  pub completed:      u64,
  pub failed:         u64,
  pub oldest_pending: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn status_round_trips_through_str() {
    for status in QueueStatus::ALL {
      assert_eq!(status.as_str().parse::<QueueStatus>().unwrap(), status);
    }
    assert!("done".parse::<QueueStatus>().is_err());
  }

  #[test]
  fn terminal_states_do_not_advance() {
    assert!(!QueueStatus::Completed.can_transition(QueueStatus::Pending));
    assert!(!QueueStatus::Completed.can_transition(QueueStatus::Failed));
    assert!(!QueueStatus::Pending.can_transition(QueueStatus::Completed));
    assert!(!QueueStatus::Failed.can_transition(QueueStatus::Processing));
  }

  #[test]
  fn happy_path_and_recovery_are_allowed() {
    assert!(QueueStatus::Pending.can_transition(QueueStatus::Processing));
    assert!(QueueStatus::Processing.can_transition(QueueStatus::Completed));
    assert!(QueueStatus::Processing.can_transition(QueueStatus::Failed));
    assert!(QueueStatus::Processing.can_transition(QueueStatus::Pending));
    assert!(QueueStatus::Failed.can_transition(QueueStatus::Pending));
  }
}
