//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings (microseconds, `Z`
//! suffix) so that lexical comparison in SQL matches chronological order.
//! UUIDs are stored as hyphenated lowercase strings.

use chrono::{DateTime, SecondsFormat, SubsecRound as _, Utc};
use canon_core::{
  contact::ContactTuple,
  customer::Customer,
  queue::QueueEntry,
  sighting::{Sighting, SourceTable},
};
use rusqlite::{Row, types::Type};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ─────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

/// Decode a UUID column while still inside a rusqlite callback.
pub fn uuid_column(idx: usize, s: &str) -> rusqlite::Result<Uuid> {
  Uuid::parse_str(s)
    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

// ─── DateTime<Utc> ────────────────────────────────────────────────────────────

/// The current time at the precision the store keeps.
pub fn now() -> DateTime<Utc> { Utc::now().trunc_subsecs(6) }

/// Drop sub-microsecond precision so values read back compare equal.
pub fn truncate(dt: DateTime<Utc>) -> DateTime<Utc> { dt.trunc_subsecs(6) }

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

fn decode_opt_dt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
  s.as_deref().map(decode_dt).transpose()
}

fn decode_opt_uuid(s: Option<String>) -> Result<Option<Uuid>> {
  s.as_deref().map(decode_uuid).transpose()
}

// ─── Row types ───────────────────────────────────────────────────────────────

pub const CUSTOMER_COLUMNS: &str =
  "customer_id, name, phone, document, email, created_at, updated_at";

/// Raw strings read directly from a `customers` row.
pub struct RawCustomer {
  pub customer_id: String,
  pub name:        String,
  pub phone:       Option<String>,
  pub document:    Option<String>,
  pub email:       Option<String>,
  pub created_at:  String,
  pub updated_at:  String,
}

impl RawCustomer {
  /// Read a row selected with [`CUSTOMER_COLUMNS`].
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      customer_id: row.get(0)?,
      name:        row.get(1)?,
      phone:       row.get(2)?,
      document:    row.get(3)?,
      email:       row.get(4)?,
      created_at:  row.get(5)?,
      updated_at:  row.get(6)?,
    })
  }

  pub fn into_customer(self) -> Result<Customer> {
    Ok(Customer {
      customer_id: decode_uuid(&self.customer_id)?,
      name:        self.name,
      phone:       self.phone,
      document:    self.document,
      email:       self.email,
      created_at:  decode_dt(&self.created_at)?,
      updated_at:  decode_dt(&self.updated_at)?,
    })
  }
}

pub const SIGHTING_COLUMNS: &str =
  "sighting_id, name, phone, document, email, occurred_at, recorded_at, reference, customer_id";

/// Raw strings read directly from a `quotations` or `course_orders` row.
pub struct RawSighting {
  pub sighting_id: String,
  pub name:        String,
  pub phone:       Option<String>,
  pub document:    Option<String>,
  pub email:       Option<String>,
  pub occurred_at: Option<String>,
  pub recorded_at: String,
  pub reference:   Option<String>,
  pub customer_id: Option<String>,
}

impl RawSighting {
  /// Read a row selected with [`SIGHTING_COLUMNS`].
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      sighting_id: row.get(0)?,
      name:        row.get(1)?,
      phone:       row.get(2)?,
      document:    row.get(3)?,
      email:       row.get(4)?,
      occurred_at: row.get(5)?,
      recorded_at: row.get(6)?,
      reference:   row.get(7)?,
      customer_id: row.get(8)?,
    })
  }

  pub fn into_sighting(self, source: SourceTable) -> Result<Sighting> {
    Ok(Sighting {
      sighting_id: decode_uuid(&self.sighting_id)?,
      source,
      contact: ContactTuple {
        name:     self.name,
        phone:    self.phone,
        document: self.document,
        email:    self.email,
      },
      occurred_at: decode_opt_dt(self.occurred_at)?,
      recorded_at: decode_dt(&self.recorded_at)?,
      reference:   self.reference,
      customer_id: decode_opt_uuid(self.customer_id)?,
    })
  }
}

pub const ENTRY_COLUMNS: &str = "entry_id, source_table, sighting_id, status, error_message, \
                                 customer_id, claimed_by, claimed_at, created_at, updated_at";

/// Raw values read directly from a `resolution_queue` row.
pub struct RawEntry {
  pub entry_id:      i64,
  pub source_table:  String,
  pub sighting_id:   String,
  pub status:        String,
  pub error_message: Option<String>,
  pub customer_id:   Option<String>,
  pub claimed_by:    Option<String>,
  pub claimed_at:    Option<String>,
  pub created_at:    String,
  pub updated_at:    String,
}

impl RawEntry {
  /// Read a row selected (or returned) with [`ENTRY_COLUMNS`].
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      entry_id:      row.get(0)?,
      source_table:  row.get(1)?,
      sighting_id:   row.get(2)?,
      status:        row.get(3)?,
      error_message: row.get(4)?,
      customer_id:   row.get(5)?,
      claimed_by:    row.get(6)?,
      claimed_at:    row.get(7)?,
      created_at:    row.get(8)?,
      updated_at:    row.get(9)?,
    })
  }

  pub fn into_entry(self) -> Result<QueueEntry> {
    Ok(QueueEntry {
      entry_id:      self.entry_id,
      source:        self.source_table.parse()?,
      sighting_id:   decode_uuid(&self.sighting_id)?,
      status:        self.status.parse()?,
      error_message: self.error_message,
      customer_id:   decode_opt_uuid(self.customer_id)?,
      claimed_by:    self.claimed_by,
      claimed_at:    decode_opt_dt(self.claimed_at)?,
      created_at:    decode_dt(&self.created_at)?,
      updated_at:    decode_dt(&self.updated_at)?,
    })
  }
}
