//! Read-only handlers for `/customers`.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/customers` | Optional `?q=<text>&limit=<n>&offset=<n>` |
//! | `GET`  | `/customers/:id` | 404 if not found |

use axum::{
  Json,
  extract::{Path, Query, State},
};
use canon_core::{
  customer::{Customer, CustomerQuery},
  store::IdentityStore,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{AppState, error::ApiError};

const MAX_PAGE: usize = 500;

#[derive(Debug, Deserialize)]
pub struct ListParams {
  /// Substring over name, phone, document and email.
  pub q:      Option<String>,
  pub limit:  Option<usize>,
  pub offset: Option<usize>,
}

/// `GET /customers[?q=...][&limit=...][&offset=...]`
pub async fn list<S: IdentityStore>(
  State(state): State<AppState<S>>,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<Customer>>, ApiError> {
  let query = CustomerQuery {
    text:   params.q.filter(|q| !q.trim().is_empty()),
    limit:  params.limit.map(|l| l.min(MAX_PAGE)),
    offset: params.offset,
  };
  let customers = state
    .store
    .list_customers(&query)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(customers))
}

/// `GET /customers/:id`
pub async fn get_one<S: IdentityStore>(
  State(state): State<AppState<S>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Customer>, ApiError> {
  let customer = state
    .store
    .get_customer(id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("customer {id} not found")))?;
  Ok(Json(customer))
}
