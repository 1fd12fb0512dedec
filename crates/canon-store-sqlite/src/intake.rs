//! Intake listeners, one per pipeline table.
//!
//! A listener runs inside the transaction that writes a sighting and does
//! exactly one thing: insert a `pending` queue entry for it. It never reads
//! other tables and never matches. Its insert runs in a savepoint, so a
//! failure is logged and rolled back on its own while the sighting write
//! still commits; the reconciliation sweep picks the sighting up later.

use chrono::{DateTime, Utc};
use canon_core::sighting::SourceTable;
use rusqlite::Transaction;
use uuid::Uuid;

use crate::queue::insert_pending;

#[derive(Debug, Clone, Copy)]
pub struct IntakeListener {
  source: SourceTable,
}

impl IntakeListener {
  pub fn for_source(source: SourceTable) -> Self { Self { source } }

  /// Enqueue `sighting_id`. Returns the new entry id, or `None` if nothing
  /// was enqueued (already queued, or the insert failed).
  pub fn on_recorded(
    &self,
    tx: &mut Transaction<'_>,
    sighting_id: Uuid,
    now: DateTime<Utc>,
  ) -> Option<i64> {
    match enqueue_in_savepoint(tx, self.source, sighting_id, now) {
      Ok(entry_id) => {
        tracing::debug!(source = %self.source, %sighting_id, ?entry_id, "sighting enqueued");
        entry_id
      }
      Err(e) => {
        tracing::warn!(
          source = %self.source,
          %sighting_id,
          error = %e,
          "failed to enqueue sighting; reconciliation will pick it up"
        );
        None
      }
    }
  }
}

fn enqueue_in_savepoint(
  tx: &mut Transaction<'_>,
  source: SourceTable,
  sighting_id: Uuid,
  now: DateTime<Utc>,
) -> rusqlite::Result<Option<i64>> {
  let sp = tx.savepoint()?;
  let entry_id = insert_pending(&sp, source, sighting_id, now)?;
  sp.commit()?;
  Ok(entry_id)
}
