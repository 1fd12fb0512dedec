//! Synchronous SQL for the `resolution_queue` table.
//!
//! Every status change is a conditional `UPDATE … WHERE status = <from>`, so
//! two workers can never both win the same transition.

use chrono::{DateTime, Utc};
use canon_core::{
  queue::{QueueStats, QueueStatus},
  sighting::SourceTable,
};
use rusqlite::{Connection, OptionalExtension as _};
use uuid::Uuid;

use crate::encode::{ENTRY_COLUMNS, RawEntry, encode_dt, encode_uuid};

/// Insert a `pending` entry unless the sighting already has a live one.
pub fn insert_pending(
  conn: &Connection,
  source: SourceTable,
  sighting_id: Uuid,
  now: DateTime<Utc>,
) -> rusqlite::Result<Option<i64>> {
  let at = encode_dt(now);
  let inserted = conn.execute(
    "INSERT INTO resolution_queue (source_table, sighting_id, status, created_at, updated_at)
     VALUES (?1, ?2, 'pending', ?3, ?3)
     ON CONFLICT DO NOTHING",
    rusqlite::params![source.as_str(), encode_uuid(sighting_id), at],
  )?;
  Ok((inserted == 1).then(|| conn.last_insert_rowid()))
}

/// Flip up to `limit` of the oldest pending entries to `processing`.
///
/// Must run inside an immediate transaction. The outer `status = 'pending'`
/// guard keeps the update a compare-and-set even if the subquery's snapshot
/// is stale.
pub fn claim(
  conn: &Connection,
  worker_id: &str,
  limit: usize,
  now: DateTime<Utc>,
) -> rusqlite::Result<Vec<RawEntry>> {
  let sql = format!(
    "UPDATE resolution_queue
     SET status = 'processing', claimed_by = ?1, claimed_at = ?2, updated_at = ?2
     WHERE status = 'pending'
       AND entry_id IN (
         SELECT entry_id FROM resolution_queue
         WHERE status = 'pending'
         ORDER BY created_at, entry_id
         LIMIT ?3
       )
     RETURNING {ENTRY_COLUMNS}"
  );
  let mut stmt = conn.prepare(&sql)?;
  let mut rows = stmt
    .query_map(
      rusqlite::params![worker_id, encode_dt(now), limit as i64],
      RawEntry::from_row,
    )?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  // RETURNING order is unspecified; restore FIFO.
  rows.sort_by(|a, b| (&a.created_at, a.entry_id).cmp(&(&b.created_at, b.entry_id)));
  Ok(rows)
}

/// Apply `processing → to` to an entry claimed by `worker_id`. Leaving
/// `processing` for `pending` also drops the claim. Returns `false` if the
/// entry was not in `processing` or is claimed by someone else.
pub fn finish(
  conn: &Connection,
  entry_id: i64,
  worker_id: &str,
  to: QueueStatus,
  error_message: Option<&str>,
  customer_id: Option<Uuid>,
  now: DateTime<Utc>,
) -> rusqlite::Result<bool> {
  let changed = conn.execute(
    "UPDATE resolution_queue
     SET status = ?2,
         error_message = ?3,
         customer_id = ?4,
         claimed_by = CASE WHEN ?2 = 'pending' THEN NULL ELSE claimed_by END,
         claimed_at = CASE WHEN ?2 = 'pending' THEN NULL ELSE claimed_at END,
         updated_at = ?5
     WHERE entry_id = ?1 AND status = 'processing' AND claimed_by = ?6",
    rusqlite::params![
      entry_id,
      to.as_str(),
      error_message,
      customer_id.map(encode_uuid),
      encode_dt(now),
      worker_id,
    ],
  )?;
  Ok(changed == 1)
}

/// Current status and claimant of an entry, if it exists.
pub fn claim_of(
  conn: &Connection,
  entry_id: i64,
) -> rusqlite::Result<Option<(String, Option<String>)>> {
  conn
    .query_row(
      "SELECT status, claimed_by FROM resolution_queue WHERE entry_id = ?1",
      rusqlite::params![entry_id],
      |r| Ok((r.get(0)?, r.get(1)?)),
    )
    .optional()
}

pub fn recover_stale(
  conn: &Connection,
  claimed_before: DateTime<Utc>,
  now: DateTime<Utc>,
) -> rusqlite::Result<u64> {
  let n = conn.execute(
    "UPDATE resolution_queue
     SET status = 'pending', claimed_by = NULL, claimed_at = NULL, updated_at = ?2
     WHERE status = 'processing' AND claimed_at <= ?1",
    rusqlite::params![encode_dt(claimed_before), encode_dt(now)],
  )?;
  Ok(n as u64)
}

/// Enqueue unlinked sightings of `source` that have no live or failed entry.
pub fn reconcile_source(
  conn: &Connection,
  source: SourceTable,
  now: DateTime<Utc>,
) -> rusqlite::Result<u64> {
  let sql = format!(
    "INSERT INTO resolution_queue (source_table, sighting_id, status, created_at, updated_at)
     SELECT ?1, s.sighting_id, 'pending', ?2, ?2
     FROM {table} s
     WHERE s.customer_id IS NULL
       AND NOT EXISTS (
         SELECT 1 FROM resolution_queue q
         WHERE q.source_table = ?1
           AND q.sighting_id = s.sighting_id
           AND q.status IN ('pending', 'processing', 'failed')
       )
     ORDER BY s.recorded_at",
    table = source.table_name(),
  );
  let n = conn.execute(&sql, rusqlite::params![source.as_str(), encode_dt(now)])?;
  Ok(n as u64)
}

/// The live entry for the same sighting as the failed entry `entry_id`.
pub fn live_sibling(conn: &Connection, entry_id: i64) -> rusqlite::Result<Option<RawEntry>> {
  conn
    .query_row(
      &format!(
        "SELECT {ENTRY_COLUMNS} FROM resolution_queue
         WHERE status IN ('pending', 'processing')
           AND entry_id <> ?1
           AND (source_table, sighting_id) IN (
             SELECT source_table, sighting_id FROM resolution_queue
             WHERE entry_id = ?1 AND status = 'failed'
           )"
      ),
      rusqlite::params![entry_id],
      RawEntry::from_row,
    )
    .optional()
}

/// `failed → pending`. Returns `false` if the entry was not `failed` or its
/// sighting already has a live entry.
pub fn requeue(conn: &Connection, entry_id: i64, now: DateTime<Utc>) -> rusqlite::Result<bool> {
  let changed = conn.execute(
    "UPDATE resolution_queue
     SET status = 'pending', error_message = NULL, claimed_by = NULL,
         claimed_at = NULL, updated_at = ?2
     WHERE entry_id = ?1 AND status = 'failed'
       AND NOT EXISTS (
         SELECT 1 FROM resolution_queue q
         WHERE q.source_table = resolution_queue.source_table
           AND q.sighting_id = resolution_queue.sighting_id
           AND q.status IN ('pending', 'processing')
       )",
    rusqlite::params![entry_id, encode_dt(now)],
  )?;
  Ok(changed == 1)
}

pub fn prune_completed(conn: &Connection, before: DateTime<Utc>) -> rusqlite::Result<u64> {
  let n = conn.execute(
    "DELETE FROM resolution_queue WHERE status = 'completed' AND updated_at < ?1",
    rusqlite::params![encode_dt(before)],
  )?;
  Ok(n as u64)
}

pub fn get(conn: &Connection, entry_id: i64) -> rusqlite::Result<Option<RawEntry>> {
  conn
    .query_row(
      &format!("SELECT {ENTRY_COLUMNS} FROM resolution_queue WHERE entry_id = ?1"),
      rusqlite::params![entry_id],
      RawEntry::from_row,
    )
    .optional()
}

pub fn list(
  conn: &Connection,
  status: Option<QueueStatus>,
  limit: usize,
) -> rusqlite::Result<Vec<RawEntry>> {
  let sql = format!(
    "SELECT {ENTRY_COLUMNS} FROM resolution_queue
     WHERE (?1 IS NULL OR status = ?1)
     ORDER BY created_at, entry_id
     LIMIT ?2"
  );
  let mut stmt = conn.prepare(&sql)?;
  let rows = stmt
    .query_map(
      rusqlite::params![status.map(QueueStatus::as_str), limit as i64],
      RawEntry::from_row,
    )?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(rows)
}

/// Per-status counts and the oldest pending `created_at` (still encoded).
pub fn stats(conn: &Connection) -> rusqlite::Result<(QueueStats, Option<String>)> {
  let mut stats = QueueStats::default();
  let mut stmt =
    conn.prepare("SELECT status, COUNT(*) FROM resolution_queue GROUP BY status")?;
  let counts = stmt
    .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  for (status, n) in counts {
    let n = n as u64;
    match status.as_str() {
      "pending" => stats.pending = n,
      "processing" => stats.processing = n,
      "completed" => stats.completed = n,
      "failed" => stats.failed = n,
      _ => {}
    }
  }

  let oldest: Option<String> = conn.query_row(
    "SELECT MIN(created_at) FROM resolution_queue WHERE status = 'pending'",
    [],
    |r| r.get(0),
  )?;

  Ok((stats, oldest))
}
