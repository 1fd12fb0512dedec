//! Worker ticks against an in-memory SQLite store.

use std::{
  sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  },
  time::Duration,
};

use canon_core::{
  contact::{ContactKeys, ContactTuple},
  customer::{Customer, CustomerQuery, Resolution},
  matcher::Match,
  queue::{QueueEntry, QueueStats, QueueStatus},
  sighting::{LinkOutcome, NewSighting, Sighting, SourceTable},
  store::IdentityStore,
};
use canon_store_sqlite::{Error, SqliteStore};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{TickSummary, Worker, WorkerConfig};

async fn setup(batch_size: usize) -> (Arc<SqliteStore>, Worker<SqliteStore>) {
  let store = Arc::new(SqliteStore::open_in_memory().await.expect("in-memory store"));
  let config = WorkerConfig {
    worker_id: "test-worker".into(),
    batch_size,
    stale_after_secs: 60,
    ..WorkerConfig::default()
  };
  let worker = Worker::new(store.clone(), config);
  (store, worker)
}

async fn customers(store: &SqliteStore) -> usize {
  store.list_customers(&CustomerQuery::default()).await.unwrap().len()
}

/// A SQLite store shared with a misbehaving neighbour. The first
/// `busy_resolves` resolutions fail with `SQLITE_BUSY`, as if another process
/// held the write lock. With `steal_claims`, every resolution first lets
/// `other-worker` recover and claim whatever is in flight.
struct ContendedStore {
  inner:         SqliteStore,
  busy_resolves: AtomicUsize,
  steal_claims:  bool,
}

impl ContendedStore {
  async fn new(busy_resolves: usize, steal_claims: bool) -> Self {
    Self {
      inner: SqliteStore::open_in_memory().await.unwrap(),
      busy_resolves: AtomicUsize::new(busy_resolves),
      steal_claims,
    }
  }
}

fn database_busy() -> Error {
  Error::Database(tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(
    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
    None,
  )))
}

impl IdentityStore for ContendedStore {
  type Error = Error;

  async fn find_existing(&self, keys: ContactKeys) -> Result<Option<Match>, Error> {
    self.inner.find_existing(keys).await
  }

  async fn create_customer(
    &self,
    contact: ContactTuple,
    occurred_at: Option<DateTime<Utc>>,
  ) -> Result<Customer, Error> {
    self.inner.create_customer(contact, occurred_at).await
  }

  async fn resolve(
    &self,
    contact: ContactTuple,
    occurred_at: Option<DateTime<Utc>>,
  ) -> Result<Resolution, Error> {
    let busy = self
      .busy_resolves
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
      .is_ok();
    if busy {
      return Err(database_busy());
    }
    if self.steal_claims {
      let later = Utc::now() + chrono::Duration::seconds(1);
      self.inner.recover_stale(later).await?;
      self.inner.claim_batch("other-worker".into(), 10, later).await?;
    }
    self.inner.resolve(contact, occurred_at).await
  }

  async fn get_customer(&self, customer_id: Uuid) -> Result<Option<Customer>, Error> {
    self.inner.get_customer(customer_id).await
  }

  async fn list_customers(&self, query: &CustomerQuery) -> Result<Vec<Customer>, Error> {
    self.inner.list_customers(query).await
  }

  async fn record_sighting(&self, source: SourceTable, input: NewSighting) -> Result<Sighting, Error> {
    self.inner.record_sighting(source, input).await
  }

  async fn get_sighting(
    &self,
    source: SourceTable,
    sighting_id: Uuid,
  ) -> Result<Option<Sighting>, Error> {
    self.inner.get_sighting(source, sighting_id).await
  }

  async fn link_sighting(
    &self,
    source: SourceTable,
    sighting_id: Uuid,
    customer_id: Uuid,
  ) -> Result<LinkOutcome, Error> {
    self.inner.link_sighting(source, sighting_id, customer_id).await
  }

  async fn enqueue(&self, source: SourceTable, sighting_id: Uuid) -> Result<Option<QueueEntry>, Error> {
    self.inner.enqueue(source, sighting_id).await
  }

  async fn claim_batch(
    &self,
    worker_id: String,
    limit: usize,
    now: DateTime<Utc>,
  ) -> Result<Vec<QueueEntry>, Error> {
    self.inner.claim_batch(worker_id, limit, now).await
  }

  async fn complete(&self, entry_id: i64, worker_id: String, customer_id: Uuid) -> Result<(), Error> {
    self.inner.complete(entry_id, worker_id, customer_id).await
  }

  async fn fail(&self, entry_id: i64, worker_id: String, reason: String) -> Result<(), Error> {
    self.inner.fail(entry_id, worker_id, reason).await
  }

  async fn release(&self, entry_id: i64, worker_id: String) -> Result<(), Error> {
    self.inner.release(entry_id, worker_id).await
  }

  async fn recover_stale(&self, claimed_before: DateTime<Utc>) -> Result<u64, Error> {
    self.inner.recover_stale(claimed_before).await
  }

  async fn reconcile(&self) -> Result<u64, Error> { self.inner.reconcile().await }

  async fn requeue_failed(&self, entry_id: i64) -> Result<QueueEntry, Error> {
    self.inner.requeue_failed(entry_id).await
  }

  async fn prune_completed(&self, before: DateTime<Utc>) -> Result<u64, Error> {
    self.inner.prune_completed(before).await
  }

  async fn get_entry(&self, entry_id: i64) -> Result<Option<QueueEntry>, Error> {
    self.inner.get_entry(entry_id).await
  }

  async fn list_entries(
    &self,
    status: Option<QueueStatus>,
    limit: usize,
  ) -> Result<Vec<QueueEntry>, Error> {
    self.inner.list_entries(status, limit).await
  }

  async fn queue_stats(&self) -> Result<QueueStats, Error> { self.inner.queue_stats().await }
}

// ─── Tick ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn tick_resolves_and_links_sightings() {
  let (store, worker) = setup(50).await;
  let sighting = store
    .record_sighting(
      SourceTable::Quotation,
      NewSighting::new(ContactTuple::new("Luis Soto").with_document("RUC20100047218")),
    )
    .await
    .unwrap();

  let summary = worker.tick().await.unwrap();
  assert_eq!(summary, TickSummary { claimed: 1, completed: 1, ..TickSummary::default() });

  let linked = store
    .get_sighting(SourceTable::Quotation, sighting.sighting_id)
    .await
    .unwrap()
    .unwrap();
  let customer_id = linked.customer_id.expect("sighting linked");

  let entry = store.list_entries(None, 10).await.unwrap().remove(0);
  assert_eq!(entry.status, QueueStatus::Completed);
  assert_eq!(entry.customer_id, Some(customer_id));
  assert_eq!(entry.claimed_by.as_deref(), Some("test-worker"));

  // Nothing left to do.
  assert_eq!(worker.tick().await.unwrap(), TickSummary::default());
}

#[tokio::test]
async fn one_bad_entry_does_not_sink_the_batch() {
  let (store, worker) = setup(50).await;
  for i in 0..9 {
    store
      .record_sighting(
        SourceTable::CourseOrder,
        NewSighting::new(ContactTuple::new(format!("Alumno {i}")).with_phone(format!("9000000{i:02}"))),
      )
      .await
      .unwrap();
  }
  let ghost = store
    .enqueue(SourceTable::CourseOrder, Uuid::new_v4())
    .await
    .unwrap()
    .unwrap();

  let summary = worker.tick().await.unwrap();
  assert_eq!(summary.claimed, 10);
  assert_eq!(summary.completed, 9);
  assert_eq!(summary.failed, 1);
  assert_eq!(customers(&store).await, 9);

  let failed = store.get_entry(ghost.entry_id).await.unwrap().unwrap();
  assert_eq!(failed.status, QueueStatus::Failed);
  assert!(
    failed.error_message.as_deref().unwrap_or_default().contains("sighting not found"),
    "reason: {:?}",
    failed.error_message
  );
  assert_eq!(store.queue_stats().await.unwrap().completed, 9);
}

#[tokio::test]
async fn unusable_contacts_fail_without_creating_customers() {
  let (store, worker) = setup(50).await;
  for contact in [
    ContactTuple::new(""),
    ContactTuple::new("J").with_email("j@x.com"),
    ContactTuple::new("Sin Datos").with_phone("123"),
  ] {
    store
      .record_sighting(SourceTable::Quotation, NewSighting::new(contact))
      .await
      .unwrap();
  }

  let summary = worker.tick().await.unwrap();
  assert_eq!(summary.failed, 3);
  assert_eq!(summary.completed, 0);
  assert_eq!(customers(&store).await, 0);

  let failed = store.list_entries(Some(QueueStatus::Failed), 10).await.unwrap();
  assert!(
    failed
      .iter()
      .all(|e| e.error_message.as_deref().unwrap_or_default().starts_with("invalid contact"))
  );
}

#[tokio::test]
async fn batches_are_bounded_and_fifo() {
  let (store, worker) = setup(2).await;
  let mut ids = Vec::new();
  for i in 0..5 {
    let s = store
      .record_sighting(
        SourceTable::Quotation,
        NewSighting::new(ContactTuple::new(format!("Cliente {i}")).with_email(format!("c{i}@x.com"))),
      )
      .await
      .unwrap();
    ids.push(s.sighting_id);
  }

  assert_eq!(worker.tick().await.unwrap().completed, 2);
  for id in &ids[..2] {
    let s = store.get_sighting(SourceTable::Quotation, *id).await.unwrap().unwrap();
    assert!(s.customer_id.is_some());
  }
  for id in &ids[2..] {
    let s = store.get_sighting(SourceTable::Quotation, *id).await.unwrap().unwrap();
    assert!(s.customer_id.is_none());
  }

  assert_eq!(worker.tick().await.unwrap().completed, 2);
  assert_eq!(worker.tick().await.unwrap().completed, 1);
  assert_eq!(worker.tick().await.unwrap().claimed, 0);
}

#[tokio::test]
async fn already_linked_sightings_complete_with_their_customer() {
  let (store, worker) = setup(50).await;
  let contact = ContactTuple::new("Marta Díaz").with_phone("944 555 123");
  let existing = store.resolve(contact.clone(), None).await.unwrap();
  let sighting = store
    .record_sighting(SourceTable::Quotation, NewSighting::new(contact))
    .await
    .unwrap();
  store
    .link_sighting(SourceTable::Quotation, sighting.sighting_id, existing.customer_id)
    .await
    .unwrap();

  let summary = worker.tick().await.unwrap();
  assert_eq!(summary.completed, 1);
  let entry = store.list_entries(None, 1).await.unwrap().remove(0);
  assert_eq!(entry.customer_id, Some(existing.customer_id));
  assert_eq!(customers(&store).await, 1);
}

#[tokio::test]
async fn tick_recovers_entries_from_dead_workers() {
  let (store, worker) = setup(50).await;
  store
    .record_sighting(
      SourceTable::CourseOrder,
      NewSighting::new(ContactTuple::new("Pedro Ríos").with_email("pedro@x.com")),
    )
    .await
    .unwrap();
  let long_ago = Utc::now() - chrono::Duration::minutes(30);
  let orphaned = store.claim_batch("crashed".into(), 10, long_ago).await.unwrap();
  assert_eq!(orphaned.len(), 1);

  let summary = worker.tick().await.unwrap();
  assert_eq!(summary.recovered, 1);
  assert_eq!(summary.completed, 1);
}

#[tokio::test]
async fn customer_created_at_follows_the_sighting() {
  let (store, worker) = setup(50).await;
  let occurred = Utc::now() - chrono::Duration::days(40);
  let mut input = NewSighting::new(ContactTuple::new("Rosa Lima").with_email("rosa@x.com"));
  input.occurred_at = Some(occurred);
  let sighting = store.record_sighting(SourceTable::Quotation, input).await.unwrap();

  worker.tick().await.unwrap();

  let linked = store
    .get_sighting(SourceTable::Quotation, sighting.sighting_id)
    .await
    .unwrap()
    .unwrap();
  let customer = store
    .get_customer(linked.customer_id.unwrap())
    .await
    .unwrap()
    .unwrap();
  assert_eq!(customer.created_at, linked.occurred_at.unwrap());
}

#[tokio::test]
async fn lock_contention_releases_the_entry_for_a_later_tick() {
  let store = Arc::new(ContendedStore::new(1, false).await);
  let config = WorkerConfig { worker_id: "test-worker".into(), ..WorkerConfig::default() };
  let worker = Worker::new(store.clone(), config);
  let sighting = store
    .record_sighting(
      SourceTable::Quotation,
      NewSighting::new(ContactTuple::new("Nora Gil").with_phone("955 111 222")),
    )
    .await
    .unwrap();

  let summary = worker.tick().await.unwrap();
  assert_eq!(summary, TickSummary { claimed: 1, released: 1, ..TickSummary::default() });

  let entry = store.list_entries(None, 10).await.unwrap().remove(0);
  assert_eq!(entry.status, QueueStatus::Pending);
  assert_eq!(entry.claimed_by, None);
  assert_eq!(entry.error_message, None);
  assert_eq!(store.list_customers(&CustomerQuery::default()).await.unwrap().len(), 0);

  let summary = worker.tick().await.unwrap();
  assert_eq!(summary, TickSummary { claimed: 1, completed: 1, ..TickSummary::default() });
  let linked = store
    .get_sighting(SourceTable::Quotation, sighting.sighting_id)
    .await
    .unwrap()
    .unwrap();
  assert!(linked.customer_id.is_some());
}

#[tokio::test]
async fn lost_claims_are_left_to_their_new_owner() {
  let store = Arc::new(ContendedStore::new(0, true).await);
  let config = WorkerConfig { worker_id: "test-worker".into(), ..WorkerConfig::default() };
  let worker = Worker::new(store.clone(), config);
  store
    .record_sighting(
      SourceTable::Quotation,
      NewSighting::new(ContactTuple::new("Olga Paz").with_email("olga@x.com")),
    )
    .await
    .unwrap();

  // Neither completed, failed nor released: the entry is someone else's now.
  let summary = worker.tick().await.unwrap();
  assert_eq!(summary, TickSummary { claimed: 1, ..TickSummary::default() });

  let entry = store.list_entries(None, 10).await.unwrap().remove(0);
  assert_eq!(entry.status, QueueStatus::Processing);
  assert_eq!(entry.claimed_by.as_deref(), Some("other-worker"));
  assert_eq!(entry.error_message, None);
}

#[tokio::test]
async fn oversized_durations_do_not_break_ticks_or_pruning() {
  let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
  let config = WorkerConfig {
    worker_id: "test-worker".into(),
    tick_interval_secs: 3600,
    stale_after_secs: 10_000_000_000_000,
    retain_completed_days: Some(u32::MAX),
    ..WorkerConfig::default()
  };
  let worker = Arc::new(Worker::new(store.clone(), config));

  // An hour-old claim is well inside the capped stale window.
  store
    .record_sighting(
      SourceTable::Quotation,
      NewSighting::new(ContactTuple::new("Hugo Vera").with_email("hugo@x.com")),
    )
    .await
    .unwrap();
  store
    .claim_batch("crashed".into(), 10, Utc::now() - chrono::Duration::hours(1))
    .await
    .unwrap();
  assert_eq!(worker.tick().await.unwrap(), TickSummary::default());

  let sighting = store
    .record_sighting(
      SourceTable::Quotation,
      NewSighting::new(ContactTuple::new("Iris Vera").with_email("iris@x.com")),
    )
    .await
    .unwrap();

  // Every pass of the run loop prunes after ticking.
  let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
  let handle = {
    let worker = worker.clone();
    tokio::spawn(async move {
      worker
        .run(async {
          let _ = stop_rx.await;
        })
        .await
    })
  };
  worker.signal().notify_one();

  let mut linked = None;
  for _ in 0..100 {
    linked = store
      .get_sighting(SourceTable::Quotation, sighting.sighting_id)
      .await
      .unwrap()
      .and_then(|s| s.customer_id);
    if linked.is_some() {
      break;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
  }
  assert!(linked.is_some(), "sighting was not resolved");

  stop_tx.send(()).unwrap();
  tokio::time::timeout(Duration::from_secs(5), handle)
    .await
    .expect("worker stopped")
    .unwrap();
  assert_eq!(store.queue_stats().await.unwrap().completed, 1);
}

// ─── End to end ──────────────────────────────────────────────────────────────

/// A bare national number and the same number with `+51` do not match: the
/// normaliser keeps country codes. A later sighting carrying the prefix does
/// find the first customer.
#[tokio::test]
async fn ana_ruiz_across_pipelines() {
  let (store, worker) = setup(50).await;

  let quote = store
    .record_sighting(
      SourceTable::Quotation,
      NewSighting::new(
        ContactTuple::new("Ana Ruiz")
          .with_phone("+51 987654321")
          .with_email("ana@x.com"),
      ),
    )
    .await
    .unwrap();
  worker.tick().await.unwrap();

  let all = store.list_customers(&CustomerQuery::default()).await.unwrap();
  assert_eq!(all.len(), 1);
  assert_eq!(all[0].phone.as_deref(), Some("51987654321"));
  let ana = all[0].customer_id;

  let order = store
    .record_sighting(
      SourceTable::CourseOrder,
      NewSighting::new(
        ContactTuple::new("Ana R.")
          .with_phone("987654321")
          .with_document("DNI12345678"),
      ),
    )
    .await
    .unwrap();
  worker.tick().await.unwrap();

  let order = store
    .get_sighting(SourceTable::CourseOrder, order.sighting_id)
    .await
    .unwrap()
    .unwrap();
  assert_ne!(order.customer_id, Some(ana));
  assert_eq!(customers(&store).await, 2);

  let again = store
    .record_sighting(
      SourceTable::CourseOrder,
      NewSighting::new(ContactTuple::new("Ana Ruiz").with_phone("+51 (987) 654-321")),
    )
    .await
    .unwrap();
  worker.tick().await.unwrap();

  let again = store
    .get_sighting(SourceTable::CourseOrder, again.sighting_id)
    .await
    .unwrap()
    .unwrap();
  let quote = store
    .get_sighting(SourceTable::Quotation, quote.sighting_id)
    .await
    .unwrap()
    .unwrap();
  assert_eq!(again.customer_id, Some(ana));
  assert_eq!(quote.customer_id, Some(ana));
  assert_eq!(customers(&store).await, 2);
}

// ─── Run loop ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn run_drains_on_signal_and_stops_on_shutdown() {
  let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
  let config = WorkerConfig { tick_interval_secs: 3600, ..WorkerConfig::default() };
  let worker = Arc::new(Worker::new(store.clone(), config));
  let signal = worker.signal();

  let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
  let handle = {
    let worker = worker.clone();
    tokio::spawn(async move {
      worker
        .run(async {
          let _ = stop_rx.await;
        })
        .await
    })
  };

  let sighting = store
    .record_sighting(
      SourceTable::Quotation,
      NewSighting::new(ContactTuple::new("Eva Paz").with_email("eva@x.com")),
    )
    .await
    .unwrap();
  signal.notify_one();

  let mut linked = None;
  for _ in 0..100 {
    linked = store
      .get_sighting(SourceTable::Quotation, sighting.sighting_id)
      .await
      .unwrap()
      .and_then(|s| s.customer_id);
    if linked.is_some() {
      break;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
  }
  assert!(linked.is_some(), "sighting was not resolved");

  stop_tx.send(()).unwrap();
  tokio::time::timeout(Duration::from_secs(5), handle)
    .await
    .expect("worker stopped")
    .unwrap();
}
