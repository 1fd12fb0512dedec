//! [`SqliteStore`], the SQLite implementation of [`IdentityStore`].

use std::{path::Path, time::Duration};

use chrono::{DateTime, Utc};
use canon_core::{
  contact::{ContactKeys, ContactTuple},
  customer::{Customer, CustomerQuery, Resolution},
  matcher::Match,
  queue::{QueueEntry, QueueStats, QueueStatus},
  sighting::{LinkOutcome, NewSighting, Sighting, SourceTable},
  store::IdentityStore,
};
use rusqlite::{Connection, OptionalExtension as _, TransactionBehavior};
use uuid::Uuid;

use crate::{
  Error, Result,
  encode::{
    CUSTOMER_COLUMNS, RawCustomer, RawEntry, RawSighting, SIGHTING_COLUMNS, decode_dt,
    encode_dt, encode_uuid, now, truncate, uuid_column,
  },
  intake::IntakeListener,
  queue,
  resolve::{self, Resolved},
  schema::SCHEMA,
};

/// How long a connection waits on another writer's lock before giving up
/// with `SQLITE_BUSY`.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type CoreError = canon_core::Error;

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Canon identity store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted. Several
/// stores (in this or other processes) may open the same file; writes that
/// must not interleave run in `BEGIN IMMEDIATE` transactions.
#[derive(Clone)]
pub struct SqliteStore {
  pub(crate) conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Shared tail of `complete`, `fail` and `release`.
  async fn finish(
    &self,
    entry_id: i64,
    worker_id: String,
    to: QueueStatus,
    error_message: Option<String>,
    customer_id: Option<Uuid>,
  ) -> Result<()> {
    let at = now();
    let outcome = self
      .conn
      .call(move |conn| {
        let message = error_message.as_deref();
        if queue::finish(conn, entry_id, &worker_id, to, message, customer_id, at)? {
          return Ok(Ok(()));
        }
        Ok(Err(transition_error(conn, entry_id, Some(worker_id), to)?))
      })
      .await?;
    Ok(outcome?)
  }
}

/// Explain why a guarded transition to `to` matched no row. `worker_id` is
/// the claimant the transition required, if any.
fn transition_error(
  conn: &Connection,
  entry_id: i64,
  worker_id: Option<String>,
  to: QueueStatus,
) -> rusqlite::Result<CoreError> {
  let Some((raw, claimed_by)) = queue::claim_of(conn, entry_id)? else {
    return Ok(CoreError::EntryNotFound(entry_id));
  };
  let from = match raw.parse::<QueueStatus>() {
    Ok(from) => from,
    Err(e) => return Ok(e),
  };
  Ok(match worker_id {
    Some(worker_id)
      if from == QueueStatus::Processing && claimed_by.as_deref() != Some(worker_id.as_str()) =>
    {
      CoreError::ClaimLost { entry_id, worker_id }
    }
    _ => CoreError::InvalidTransition { entry_id, from, to },
  })
}

/// Make `%`, `_` and `\` match literally in a `LIKE … ESCAPE '\'` pattern.
fn escape_like(text: &str) -> String {
  let mut out = String::with_capacity(text.len());
  for c in text.chars() {
    if matches!(c, '%' | '_' | '\\') {
      out.push('\\');
    }
    out.push(c);
  }
  out
}

fn decode_entries(raws: Vec<RawEntry>) -> Result<Vec<QueueEntry>> {
  raws.into_iter().map(RawEntry::into_entry).collect()
}

// ─── IdentityStore impl ──────────────────────────────────────────────────────

impl IdentityStore for SqliteStore {
  type Error = Error;

  // ── Customers ─────────────────────────────────────────────────────────────

  async fn find_existing(&self, keys: ContactKeys) -> Result<Option<Match>> {
    let hit = self
      .conn
      .call(move |conn| Ok(resolve::find_existing(conn, &keys)?))
      .await?;
    Ok(hit)
  }

  async fn create_customer(
    &self,
    contact: ContactTuple,
    occurred_at: Option<DateTime<Utc>>,
  ) -> Result<Customer> {
    let normalized = contact.normalize()?;
    let created_at = occurred_at.map(truncate).unwrap_or_else(now);

    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if let Some(hit) = resolve::find_existing(&tx, &normalized.keys)? {
          return Ok(Err(CoreError::DuplicateKey { key: hit.by, customer_id: hit.customer_id }));
        }
        let customer = resolve::new_customer(&normalized, created_at);
        resolve::insert_customer(&tx, &customer)?;
        tx.commit()?;
        Ok(Ok(customer))
      })
      .await?;

    let customer = outcome?;
    tracing::info!(customer_id = %customer.customer_id, "customer created");
    Ok(customer)
  }

  async fn resolve(
    &self,
    contact: ContactTuple,
    occurred_at: Option<DateTime<Utc>>,
  ) -> Result<Resolution> {
    let normalized = contact.normalize()?;
    let at = now();
    let created_at = occurred_at.map(truncate).unwrap_or(at);

    let resolved = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = resolve::resolve_in_tx(&tx, &normalized, created_at, at)?;
        tx.commit()?;
        Ok(out)
      })
      .await?;

    match resolved {
      Resolved::Done(resolution, Some(created)) => {
        tracing::info!(customer_id = %created.customer_id, "customer created");
        Ok(resolution)
      }
      Resolved::Done(resolution, None) => {
        tracing::debug!(
          customer_id = %resolution.customer_id,
          outcome = ?resolution.outcome,
          "customer matched"
        );
        Ok(resolution)
      }
      Resolved::Conflict(detail) => Err(CoreError::ConcurrentCreateConflict(detail).into()),
    }
  }

  async fn get_customer(&self, customer_id: Uuid) -> Result<Option<Customer>> {
    let id_str = encode_uuid(customer_id);

    let raw: Option<RawCustomer> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {CUSTOMER_COLUMNS} FROM customers WHERE customer_id = ?1"),
              rusqlite::params![id_str],
              RawCustomer::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawCustomer::into_customer).transpose()
  }

  async fn list_customers(&self, query: &CustomerQuery) -> Result<Vec<Customer>> {
    let pattern    = query
      .text
      .as_deref()
      .map(|t| format!("%{}%", escape_like(&t.trim().to_lowercase())));
    let limit_val  = query.limit.unwrap_or(100) as i64;
    let offset_val = query.offset.unwrap_or(0) as i64;

    let raws: Vec<RawCustomer> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {CUSTOMER_COLUMNS} FROM customers
           WHERE ?1 IS NULL
              OR lower(name) LIKE ?1 ESCAPE '\\'
              OR phone LIKE ?1 ESCAPE '\\'
              OR lower(document) LIKE ?1 ESCAPE '\\'
              OR email LIKE ?1 ESCAPE '\\'
           ORDER BY created_at, customer_id
           LIMIT ?2 OFFSET ?3"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![pattern, limit_val, offset_val], RawCustomer::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawCustomer::into_customer).collect()
  }

  // ── Sightings ─────────────────────────────────────────────────────────────

  async fn record_sighting(&self, source: SourceTable, input: NewSighting) -> Result<Sighting> {
    let sighting = Sighting {
      sighting_id: Uuid::new_v4(),
      source,
      contact:     input.contact,
      occurred_at: input.occurred_at.map(truncate),
      recorded_at: now(),
      reference:   input.reference,
      customer_id: None,
    };

    let listener        = IntakeListener::for_source(source);
    let sighting_id     = sighting.sighting_id;
    let id_str          = encode_uuid(sighting_id);
    let contact         = sighting.contact.clone();
    let occurred_at_str = sighting.occurred_at.map(encode_dt);
    let recorded_at     = sighting.recorded_at;
    let reference       = sighting.reference.clone();

    self
      .conn
      .call(move |conn| {
        let mut tx = conn.transaction()?;
        tx.execute(
          &format!(
            "INSERT INTO {} (
               sighting_id, name, phone, document, email,
               occurred_at, recorded_at, reference
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            source.table_name()
          ),
          rusqlite::params![
            id_str,
            contact.name,
            contact.phone,
            contact.document,
            contact.email,
            occurred_at_str,
            encode_dt(recorded_at),
            reference,
          ],
        )?;
        listener.on_recorded(&mut tx, sighting_id, recorded_at);
        tx.commit()?;
        Ok(())
      })
      .await?;

    Ok(sighting)
  }

  async fn get_sighting(
    &self,
    source: SourceTable,
    sighting_id: Uuid,
  ) -> Result<Option<Sighting>> {
    let id_str = encode_uuid(sighting_id);

    let raw: Option<RawSighting> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {SIGHTING_COLUMNS} FROM {} WHERE sighting_id = ?1",
                source.table_name()
              ),
              rusqlite::params![id_str],
              RawSighting::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(|r| r.into_sighting(source)).transpose()
  }

  async fn link_sighting(
    &self,
    source: SourceTable,
    sighting_id: Uuid,
    customer_id: Uuid,
  ) -> Result<LinkOutcome> {
    let id_str       = encode_uuid(sighting_id);
    let customer_str = encode_uuid(customer_id);

    let outcome = self
      .conn
      .call(move |conn| {
        let table = source.table_name();
        let changed = conn.execute(
          &format!(
            "UPDATE {table} SET customer_id = ?1
             WHERE sighting_id = ?2 AND customer_id IS NULL"
          ),
          rusqlite::params![customer_str, id_str],
        )?;
        if changed == 1 {
          return Ok(Ok(LinkOutcome::Linked));
        }

        let existing: Option<Option<String>> = conn
          .query_row(
            &format!("SELECT customer_id FROM {table} WHERE sighting_id = ?1"),
            rusqlite::params![id_str],
            |r| r.get(0),
          )
          .optional()?;

        Ok(match existing {
          None => Err(CoreError::SightingMissing { table: source, sighting_id }),
          Some(Some(s)) => Ok(LinkOutcome::AlreadyLinked(uuid_column(0, &s)?)),
          // Unreachable under the guarded UPDATE above; report it plainly.
          Some(None) => Err(CoreError::SightingMissing { table: source, sighting_id }),
        })
      })
      .await?;

    Ok(outcome?)
  }

  // ── Queue ─────────────────────────────────────────────────────────────────

  async fn enqueue(&self, source: SourceTable, sighting_id: Uuid) -> Result<Option<QueueEntry>> {
    let at = now();
    let raw = self
      .conn
      .call(move |conn| {
        let Some(entry_id) = queue::insert_pending(conn, source, sighting_id, at)? else {
          return Ok(None);
        };
        Ok(queue::get(conn, entry_id)?)
      })
      .await?;

    raw.map(RawEntry::into_entry).transpose()
  }

  async fn claim_batch(
    &self,
    worker_id: String,
    limit: usize,
    now: DateTime<Utc>,
  ) -> Result<Vec<QueueEntry>> {
    if limit == 0 {
      return Ok(Vec::new());
    }
    let at = truncate(now);

    let raws = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let rows = queue::claim(&tx, &worker_id, limit, at)?;
        tx.commit()?;
        Ok(rows)
      })
      .await?;

    decode_entries(raws)
  }

  async fn complete(&self, entry_id: i64, worker_id: String, customer_id: Uuid) -> Result<()> {
    self
      .finish(entry_id, worker_id, QueueStatus::Completed, None, Some(customer_id))
      .await
  }

  async fn fail(&self, entry_id: i64, worker_id: String, reason: String) -> Result<()> {
    self.finish(entry_id, worker_id, QueueStatus::Failed, Some(reason), None).await
  }

  async fn release(&self, entry_id: i64, worker_id: String) -> Result<()> {
    self.finish(entry_id, worker_id, QueueStatus::Pending, None, None).await
  }

  async fn recover_stale(&self, claimed_before: DateTime<Utc>) -> Result<u64> {
    let at = now();
    let n = self
      .conn
      .call(move |conn| Ok(queue::recover_stale(conn, claimed_before, at)?))
      .await?;
    if n > 0 {
      tracing::warn!(recovered = n, "returned stale processing entries to pending");
    }
    Ok(n)
  }

  async fn reconcile(&self) -> Result<u64> {
    let at = now();
    let n = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut total = 0;
        for source in SourceTable::ALL {
          total += queue::reconcile_source(&tx, source, at)?;
        }
        tx.commit()?;
        Ok(total)
      })
      .await?;
    if n > 0 {
      tracing::info!(enqueued = n, "reconciliation enqueued unlinked sightings");
    }
    Ok(n)
  }

  async fn requeue_failed(&self, entry_id: i64) -> Result<QueueEntry> {
    let at = now();
    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let outcome = if queue::requeue(&tx, entry_id, at)? {
          queue::get(&tx, entry_id)?.ok_or(CoreError::EntryNotFound(entry_id))
        } else if let Some(live) = queue::live_sibling(&tx, entry_id)? {
          Ok(live)
        } else {
          Err(transition_error(&tx, entry_id, None, QueueStatus::Pending)?)
        };
        tx.commit()?;
        Ok(outcome)
      })
      .await?;

    let entry = outcome?.into_entry()?;
    if entry.entry_id != entry_id {
      tracing::info!(entry_id, live_entry_id = entry.entry_id, "sighting already queued; not requeued");
    }
    Ok(entry)
  }

  async fn prune_completed(&self, before: DateTime<Utc>) -> Result<u64> {
    let n = self
      .conn
      .call(move |conn| Ok(queue::prune_completed(conn, before)?))
      .await?;
    Ok(n)
  }

  async fn get_entry(&self, entry_id: i64) -> Result<Option<QueueEntry>> {
    let raw = self
      .conn
      .call(move |conn| Ok(queue::get(conn, entry_id)?))
      .await?;
    raw.map(RawEntry::into_entry).transpose()
  }

  async fn list_entries(&self, status: Option<QueueStatus>, limit: usize) -> Result<Vec<QueueEntry>> {
    let raws = self
      .conn
      .call(move |conn| Ok(queue::list(conn, status, limit)?))
      .await?;
    decode_entries(raws)
  }

  async fn queue_stats(&self) -> Result<QueueStats> {
    let (mut stats, oldest) = self
      .conn
      .call(|conn| Ok(queue::stats(conn)?))
      .await?;
    stats.oldest_pending = oldest.as_deref().map(decode_dt).transpose()?;
    Ok(stats)
  }
}
