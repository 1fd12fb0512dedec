//! JSON REST API for Canon.
//!
//! Exposes an axum [`Router`] backed by any
//! [`canon_core::store::IdentityStore`]: intake endpoints for the pipelines,
//! read-only customer lookups for reporting, and queue operations. Auth, TLS,
//! and transport concerns are the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", canon_api::api_router(store.clone(), Some(worker.signal())))
//! ```

pub mod customers;
pub mod error;
pub mod intake;
pub mod queue;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post},
};
use canon_core::store::IdentityStore;
use tokio::sync::Notify;

pub use error::ApiError;

/// Shared state threaded through all handlers.
pub struct AppState<S> {
  pub store:  Arc<S>,
  /// Notified after every recorded sighting so a worker in the same process
  /// can resolve it without waiting for its next tick.
  pub signal: Option<Arc<Notify>>,
}

impl<S> Clone for AppState<S> {
  fn clone(&self) -> Self {
    Self { store: self.store.clone(), signal: self.signal.clone() }
  }
}

/// Build a fully-materialised API router for `store`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S>(store: Arc<S>, signal: Option<Arc<Notify>>) -> Router<()>
where
  S: IdentityStore + 'static,
{
  Router::new()
    // Intake
    .route("/quotations", post(intake::record_quotation::<S>))
    .route("/course-orders", post(intake::record_course_order::<S>))
    .route("/sightings/{source}/{id}", get(intake::get_one::<S>))
    // Customers
    .route("/customers", get(customers::list::<S>))
    .route("/customers/{id}", get(customers::get_one::<S>))
    // Queue
    .route("/queue/stats", get(queue::stats::<S>))
    .route("/queue/entries", get(queue::list::<S>))
    .route("/queue/entries/{id}/requeue", post(queue::requeue::<S>))
    .with_state(AppState { store, signal })
}

#[cfg(test)]
mod tests {
  use super::*;

  use axum::{
    body::Body,
    http::{Request, StatusCode, header},
    response::Response,
  };
  use canon_core::{
    contact::ContactTuple,
    queue::QueueStatus,
    sighting::{NewSighting, SourceTable},
  };
  use canon_store_sqlite::SqliteStore;
  use chrono::Utc;
  use serde_json::{Value, json};
  use tower::ServiceExt as _;
  use uuid::Uuid;

  async fn make_store() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::open_in_memory().await.unwrap())
  }

  async fn send(
    store:  Arc<SqliteStore>,
    signal: Option<Arc<Notify>>,
    method: &str,
    uri:    &str,
    body:   Option<Value>,
  ) -> Response {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
      Some(v) => builder
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(v.to_string()))
        .unwrap(),
      None => builder.body(Body::empty()).unwrap(),
    };
    api_router(store, signal).oneshot(req).await.unwrap()
  }

  async fn json_body(resp: Response) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
  }

  // ── Intake ──────────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn recording_a_quotation_returns_201_and_signals() {
    let store  = make_store().await;
    let signal = Arc::new(Notify::new());
    let resp   = send(
      store.clone(),
      Some(signal.clone()),
      "POST",
      "/quotations",
      Some(json!({
        "contact": { "name": "Ana Ruiz", "phone": "+51 987654321", "email": "ana@x.com" },
        "reference": "COT-0042"
      })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let body = json_body(resp).await;
    assert_eq!(body["source"], "quotation");
    assert_eq!(body["reference"], "COT-0042");
    assert!(body["customer_id"].is_null());

    // The permit left by `notify_one` is consumed immediately.
    tokio::time::timeout(std::time::Duration::from_secs(1), signal.notified())
      .await
      .expect("intake should wake the worker");

    let stats = store.queue_stats().await.unwrap();
    assert_eq!(stats.pending, 1);
  }

  #[tokio::test]
  async fn course_orders_land_in_their_own_table() {
    let store = make_store().await;
    let resp  = send(
      store.clone(),
      None,
      "POST",
      "/course-orders",
      Some(json!({ "contact": { "name": "Ana R.", "document": "DNI12345678" } })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let id = json_body(resp).await["sighting_id"].as_str().unwrap().to_owned();

    let resp = send(store.clone(), None, "GET", &format!("/sightings/course_order/{id}"), None).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = send(store.clone(), None, "GET", &format!("/sightings/quotation/{id}"), None).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = send(store, None, "GET", &format!("/sightings/invoice/{id}"), None).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
  }

  #[tokio::test]
  async fn malformed_intake_body_is_rejected() {
    let store = make_store().await;
    let resp  = send(store, None, "POST", "/quotations", Some(json!({ "phone": "987654321" }))).await;
    assert!(resp.status().is_client_error());
  }

  // ── Customers ───────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn customers_can_be_listed_and_fetched() {
    let store = make_store().await;
    let res = store
      .resolve(ContactTuple::new("Ana Ruiz").with_email("ana@x.com"), None)
      .await
      .unwrap();
    store
      .resolve(ContactTuple::new("Beto Paz").with_phone("912345678"), None)
      .await
      .unwrap();

    let resp = send(store.clone(), None, "GET", "/customers?q=ruiz", None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["email"], "ana@x.com");

    let resp = send(store.clone(), None, "GET", &format!("/customers/{}", res.customer_id), None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await["name"], "Ana Ruiz");

    let resp = send(store, None, "GET", &format!("/customers/{}", Uuid::new_v4()), None).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert!(json_body(resp).await["error"].as_str().unwrap().contains("not found"));
  }

  // ── Queue ───────────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn requeue_only_accepts_failed_entries() {
    let store = make_store().await;
    let entry = store
      .enqueue(SourceTable::Quotation, Uuid::new_v4())
      .await
      .unwrap()
      .unwrap();
    let uri = format!("/queue/entries/{}/requeue", entry.entry_id);

    let resp = send(store.clone(), None, "POST", &uri, None).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    store.claim_batch("w".into(), 1, Utc::now()).await.unwrap();
    store.fail(entry.entry_id, "w".into(), "sighting not found".into()).await.unwrap();

    let resp = send(store.clone(), None, "POST", &uri, None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["status"], "pending");
    assert!(body["error_message"].is_null());

    let resp = send(store, None, "POST", "/queue/entries/9999/requeue", None).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
  }

  #[tokio::test]
  async fn requeue_conflicts_when_the_sighting_is_queued_again() {
    let store       = make_store().await;
    let sighting_id = Uuid::new_v4();
    let old = store
      .enqueue(SourceTable::CourseOrder, sighting_id)
      .await
      .unwrap()
      .unwrap();
    store.claim_batch("w".into(), 1, Utc::now()).await.unwrap();
    store.fail(old.entry_id, "w".into(), "sighting not found".into()).await.unwrap();
    let live = store
      .enqueue(SourceTable::CourseOrder, sighting_id)
      .await
      .unwrap()
      .unwrap();

    let uri  = format!("/queue/entries/{}/requeue", old.entry_id);
    let resp = send(store.clone(), None, "POST", &uri, None).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body = json_body(resp).await;
    assert!(body["error"].as_str().unwrap().contains(&live.entry_id.to_string()));

    let old = store.get_entry(old.entry_id).await.unwrap().unwrap();
    assert_eq!(old.status, QueueStatus::Failed);
  }

  #[tokio::test]
  async fn queue_stats_and_entries_reflect_the_backlog() {
    let store = make_store().await;
    for name in ["Uno Uno", "Dos Dos"] {
      store
        .record_sighting(
          SourceTable::Quotation,
          NewSighting::new(ContactTuple::new(name).with_email(format!("{}@x.com", &name[..3]))),
        )
        .await
        .unwrap();
    }
    let claimed = store.claim_batch("w".into(), 1, Utc::now()).await.unwrap();
    store.fail(claimed[0].entry_id, "w".into(), "manual".into()).await.unwrap();

    let resp = send(store.clone(), None, "GET", "/queue/stats", None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let stats = json_body(resp).await;
    assert_eq!(stats["pending"], 1);
    assert_eq!(stats["failed"], 1);

    let resp = send(store.clone(), None, "GET", "/queue/entries?status=failed", None).await;
    let body = json_body(resp).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["status"], QueueStatus::Failed.as_str());

    let resp = send(store, None, "GET", "/queue/entries?limit=10", None).await;
    assert_eq!(json_body(resp).await.as_array().unwrap().len(), 2);
  }
}
