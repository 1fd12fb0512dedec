//! The `IdentityStore` trait.
//!
//! Implemented by storage backends (e.g. `canon-store-sqlite`). The worker and
//! the API depend on this abstraction, not on a concrete backend.

use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
  contact::{ContactKeys, ContactTuple},
  customer::{Customer, CustomerQuery, Resolution},
  error::Classify,
  matcher::Match,
  queue::{QueueEntry, QueueStats, QueueStatus},
  sighting::{LinkOutcome, NewSighting, Sighting, SourceTable},
};

/// Abstraction over the canonical customer store, the intake pipelines'
/// sighting tables, and the resolution queue.
///
/// Customers are only ever written through [`resolve`](Self::resolve) and
/// [`create_customer`](Self::create_customer).
pub trait IdentityStore: Send + Sync {
  type Error: std::error::Error + Classify + From<crate::Error> + Send + Sync + 'static;

  // ── Customers ─────────────────────────────────────────────────────────

  /// Look up an existing customer by phone, then document, then email.
  fn find_existing(
    &self,
    keys: ContactKeys,
  ) -> impl Future<Output = Result<Option<Match>, Self::Error>> + Send + '_;

  /// Create a customer from a contact tuple.
  ///
  /// Fails with `InvalidContact` if the tuple does not validate, and with
  /// `DuplicateKey` if any of its keys is already taken. Does not merge; use
  /// [`resolve`](Self::resolve) for that.
  fn create_customer(
    &self,
    contact: ContactTuple,
    occurred_at: Option<DateTime<Utc>>,
  ) -> impl Future<Output = Result<Customer, Self::Error>> + Send + '_;

  /// Find-or-create, atomically with respect to other resolutions.
  ///
  /// Idempotent: the same tuple always yields the same customer id.
  fn resolve(
    &self,
    contact: ContactTuple,
    occurred_at: Option<DateTime<Utc>>,
  ) -> impl Future<Output = Result<Resolution, Self::Error>> + Send + '_;

  fn get_customer(
    &self,
    customer_id: Uuid,
  ) -> impl Future<Output = Result<Option<Customer>, Self::Error>> + Send + '_;

  fn list_customers<'a>(
    &'a self,
    query: &'a CustomerQuery,
  ) -> impl Future<Output = Result<Vec<Customer>, Self::Error>> + Send + 'a;

  // ── Sightings ─────────────────────────────────────────────────────────

  /// Persist a sighting for `source` and, in the same transaction, run that
  /// pipeline's intake listener. A listener failure never fails the write.
  fn record_sighting(
    &self,
    source: SourceTable,
    input: NewSighting,
  ) -> impl Future<Output = Result<Sighting, Self::Error>> + Send + '_;

  fn get_sighting(
    &self,
    source: SourceTable,
    sighting_id: Uuid,
  ) -> impl Future<Output = Result<Option<Sighting>, Self::Error>> + Send + '_;

  /// Set `customer_id` on a sighting that does not have one yet.
  ///
  /// Fails with `SightingMissing` if the sighting does not exist.
  fn link_sighting(
    &self,
    source: SourceTable,
    sighting_id: Uuid,
    customer_id: Uuid,
  ) -> impl Future<Output = Result<LinkOutcome, Self::Error>> + Send + '_;

  // ── Queue ─────────────────────────────────────────────────────────────

  /// Add a `pending` entry for a sighting. Returns `None` when the sighting
  /// already has a live (pending or processing) entry.
  fn enqueue(
    &self,
    source: SourceTable,
    sighting_id: Uuid,
  ) -> impl Future<Output = Result<Option<QueueEntry>, Self::Error>> + Send + '_;

  /// Atomically move up to `limit` of the oldest `pending` entries to
  /// `processing`, owned by `worker_id`. Entries are returned oldest first.
  fn claim_batch(
    &self,
    worker_id: String,
    limit: usize,
    now: DateTime<Utc>,
  ) -> impl Future<Output = Result<Vec<QueueEntry>, Self::Error>> + Send + '_;

  /// `processing → completed`, recording the resolved customer.
  ///
  /// `complete`, `fail` and `release` only act on an entry still claimed by
  /// `worker_id`. Once stale recovery has handed it elsewhere they fail with
  /// `ClaimLost` and leave the new claim untouched.
  fn complete(
    &self,
    entry_id: i64,
    worker_id: String,
    customer_id: Uuid,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// `processing → failed` with a reason.
  fn fail(
    &self,
    entry_id: i64,
    worker_id: String,
    reason: String,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// `processing → pending`, giving up the claim so a later tick retries.
  fn release(
    &self,
    entry_id: i64,
    worker_id: String,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Return entries claimed at or before `claimed_before` to `pending`.
  fn recover_stale(
    &self,
    claimed_before: DateTime<Utc>,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  /// Enqueue every unlinked sighting with no live and no failed entry.
  fn reconcile(&self) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  /// Administrative `failed → pending`.
  ///
  /// If the sighting has been queued again since the entry failed, the entry
  /// stays `failed` and the sighting's live entry is returned instead.
  fn requeue_failed(
    &self,
    entry_id: i64,
  ) -> impl Future<Output = Result<QueueEntry, Self::Error>> + Send + '_;

  /// Delete `completed` entries last updated before `before`.
  fn prune_completed(
    &self,
    before: DateTime<Utc>,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  fn get_entry(
    &self,
    entry_id: i64,
  ) -> impl Future<Output = Result<Option<QueueEntry>, Self::Error>> + Send + '_;

  /// Entries ordered oldest first, optionally filtered by status.
  fn list_entries(
    &self,
    status: Option<QueueStatus>,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<QueueEntry>, Self::Error>> + Send + '_;

  fn queue_stats(&self) -> impl Future<Output = Result<QueueStats, Self::Error>> + Send + '_;
}
