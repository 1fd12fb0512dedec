//! Customer: the canonical, deduplicated identity record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::contact::MatchKey;

/// One real-world person or entity. Every present key is unique across the
/// store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
  pub customer_id: Uuid,
  pub name:        String,
  /// Digits only.
  pub phone:       Option<String>,
  pub document:    Option<String>,
  /// Lower-cased.
  pub email:       Option<String>,
  /// Taken from the sighting that first produced this customer.
  pub created_at:  DateTime<Utc>,
  /// Last time a missing key was filled in from a later sighting.
  pub updated_at:  DateTime<Utc>,
}

/// What [`crate::store::IdentityStore::resolve`] did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ResolutionOutcome {
  Created,
  Matched {
    by:       MatchKey,
    /// Keys copied onto the existing customer because it lacked them.
    enriched: Vec<MatchKey>,
  },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
  pub customer_id: Uuid,
  #[serde(flatten)]
  pub outcome:     ResolutionOutcome,
}

impl Resolution {
  pub fn created(&self) -> bool { matches!(self.outcome, ResolutionOutcome::Created) }
}

/// Parameters for [`crate::store::IdentityStore::list_customers`].
#[derive(Debug, Clone, Default)]
pub struct CustomerQuery {
  /// Case-insensitive substring over name, phone, document and email.
  pub text:   Option<String>,
  pub limit:  Option<usize>,
  pub offset: Option<usize>,
}
