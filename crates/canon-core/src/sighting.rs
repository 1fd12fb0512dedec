//! Sightings: contact observations recorded by the intake pipelines.
//!
//! Each pipeline owns its own table. This crate only ever reads a sighting's
//! contact fields and sets its `customer_id` once.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, contact::ContactTuple};

/// The intake pipeline a sighting came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTable {
  /// Price-quotation requests.
  Quotation,
  /// Course-enrollment orders.
  CourseOrder,
}

impl SourceTable {
  pub const ALL: [SourceTable; 2] = [Self::Quotation, Self::CourseOrder];

  /// Discriminant stored in `resolution_queue.source_table`.
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Quotation => "quotation",
      Self::CourseOrder => "course_order",
    }
  }

  /// Name of the pipeline's own table.
  pub fn table_name(self) -> &'static str {
    match self {
      Self::Quotation => "quotations",
      Self::CourseOrder => "course_orders",
    }
  }
}

impl fmt::Display for SourceTable {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for SourceTable {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "quotation" => Ok(Self::Quotation),
      "course_order" => Ok(Self::CourseOrder),
      other => Err(Error::UnknownSource(other.to_owned())),
    }
  }
}

/// A stored sighting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sighting {
  pub sighting_id: Uuid,
  pub source:      SourceTable,
  pub contact:     ContactTuple,
  /// When the pipeline says the contact was captured.
  pub occurred_at: Option<DateTime<Utc>>,
  /// Server-assigned.
  pub recorded_at: DateTime<Utc>,
  /// The pipeline's own reference (quotation number, course code, ...).
  pub reference:   Option<String>,
  /// Unset until the resolution worker links it.
  pub customer_id: Option<Uuid>,
}

/// Input to [`crate::store::IdentityStore::record_sighting`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewSighting {
  pub contact:     ContactTuple,
  #[serde(default)]
  pub occurred_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub reference:   Option<String>,
}

impl NewSighting {
  pub fn new(contact: ContactTuple) -> Self {
    Self { contact, occurred_at: None, reference: None }
  }
}

/// Result of [`crate::store::IdentityStore::link_sighting`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
  Linked,
  /// The sighting was already linked; carries the existing id.
  AlreadyLinked(Uuid),
}
