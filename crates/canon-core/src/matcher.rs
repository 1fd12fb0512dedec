//! Fixed-priority identity matching.
//!
//! A phone number is the strongest signal, a tax/identity document the next,
//! and email the weakest (households and small firms often share one). The
//! first key that hits wins; later keys are not consulted.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::contact::{ContactKeys, MatchKey};

/// Exact-equality lookup of a single normalised key.
///
/// Implemented by storage backends over whatever handle they hold while a
/// resolution is in progress (typically an open transaction), which is why
/// it is synchronous.
pub trait KeyLookup {
  type Error;

  fn lookup(&self, key: MatchKey, value: &str) -> Result<Option<Uuid>, Self::Error>;
}

/// An existing customer found for a set of keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
  pub customer_id: Uuid,
  pub by:          MatchKey,
}

/// Look `keys` up in priority order and return the first hit.
pub fn find_existing<L: KeyLookup>(
  lookup: &L,
  keys: &ContactKeys,
) -> Result<Option<Match>, L::Error> {
  for (key, value) in keys.iter() {
    if let Some(customer_id) = lookup.lookup(key, value)? {
      return Ok(Some(Match { customer_id, by: key }));
    }
  }
  Ok(None)
}
