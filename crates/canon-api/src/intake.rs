//! Intake endpoints: the pipelines record sightings here.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/quotations` | Body: [`NewSighting`]; returns 201 + stored sighting |
//! | `POST` | `/course-orders` | Body: [`NewSighting`]; returns 201 + stored sighting |
//! | `GET`  | `/sightings/:source/:id` | `source` is `quotation` or `course_order`; 404 if not found |

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use canon_core::{
  sighting::{NewSighting, Sighting, SourceTable},
  store::IdentityStore,
};
use uuid::Uuid;

use crate::{AppState, error::ApiError};

// ─── Record ──────────────────────────────────────────────────────────────────

/// `POST /quotations`
pub async fn record_quotation<S: IdentityStore>(
  State(state): State<AppState<S>>,
  Json(body): Json<NewSighting>,
) -> Result<impl IntoResponse, ApiError> {
  record(state, SourceTable::Quotation, body).await
}

/// `POST /course-orders`
pub async fn record_course_order<S: IdentityStore>(
  State(state): State<AppState<S>>,
  Json(body): Json<NewSighting>,
) -> Result<impl IntoResponse, ApiError> {
  record(state, SourceTable::CourseOrder, body).await
}

async fn record<S: IdentityStore>(
  state: AppState<S>,
  source: SourceTable,
  body: NewSighting,
) -> Result<(StatusCode, Json<Sighting>), ApiError> {
  let sighting = state
    .store
    .record_sighting(source, body)
    .await
    .map_err(ApiError::store)?;

  if let Some(signal) = &state.signal {
    signal.notify_one();
  }
  Ok((StatusCode::CREATED, Json(sighting)))
}

// ─── Get one ─────────────────────────────────────────────────────────────────

/// `GET /sightings/:source/:id`
pub async fn get_one<S: IdentityStore>(
  State(state): State<AppState<S>>,
  Path((source, id)): Path<(String, Uuid)>,
) -> Result<Json<Sighting>, ApiError> {
  let source: SourceTable = source
    .parse()
    .map_err(|e: canon_core::Error| ApiError::BadRequest(e.to_string()))?;

  let sighting = state
    .store
    .get_sighting(source, id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("sighting {source}/{id} not found")))?;
  Ok(Json(sighting))
}
