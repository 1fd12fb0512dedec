//! Operational handlers for the resolution queue.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/queue/stats` | Counts per status and oldest pending timestamp |
//! | `GET`  | `/queue/entries` | Optional `?status=<status>&limit=<n>`; oldest first |
//! | `POST` | `/queue/entries/:id/requeue` | `failed → pending`; 409 for any other status, or if the sighting is queued again |

use axum::{
  Json,
  extract::{Path, Query, State},
};
use canon_core::{
  queue::{QueueEntry, QueueStats, QueueStatus},
  store::IdentityStore,
};
use serde::Deserialize;

use crate::{AppState, error::ApiError};

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;

/// `GET /queue/stats`
pub async fn stats<S: IdentityStore>(
  State(state): State<AppState<S>>,
) -> Result<Json<QueueStats>, ApiError> {
  let stats = state.store.queue_stats().await.map_err(ApiError::store)?;
  Ok(Json(stats))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub status: Option<QueueStatus>,
  pub limit:  Option<usize>,
}

/// `GET /queue/entries[?status=failed][&limit=...]`
pub async fn list<S: IdentityStore>(
  State(state): State<AppState<S>>,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<QueueEntry>>, ApiError> {
  let limit = params.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
  let entries = state
    .store
    .list_entries(params.status, limit)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(entries))
}

/// `POST /queue/entries/:id/requeue`
pub async fn requeue<S: IdentityStore>(
  State(state): State<AppState<S>>,
  Path(id): Path<i64>,
) -> Result<Json<QueueEntry>, ApiError> {
  let entry = state
    .store
    .get_entry(id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("queue entry {id} not found")))?;

  if entry.status != QueueStatus::Failed {
    return Err(ApiError::Conflict(format!(
      "queue entry {id} is {}, only failed entries can be requeued",
      entry.status
    )));
  }

  let entry = state.store.requeue_failed(id).await.map_err(ApiError::store)?;
  if entry.entry_id != id {
    return Err(ApiError::Conflict(format!(
      "queue entry {id} not requeued, its sighting already has live entry {}",
      entry.entry_id
    )));
  }
  tracing::info!(entry_id = id, "failed entry requeued");
  if let Some(signal) = &state.signal {
    signal.notify_one();
  }
  Ok(Json(entry))
}
