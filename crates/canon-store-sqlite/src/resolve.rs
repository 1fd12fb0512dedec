//! Find-or-create of customers, run synchronously inside a write transaction.
//!
//! Callers open the transaction with `BEGIN IMMEDIATE`, which takes SQLite's
//! write lock up front. Two resolutions racing on the same key (from this
//! process or another one sharing the file) therefore serialise, and the
//! second sees the first's freshly inserted row.

use chrono::{DateTime, Utc};
use canon_core::{
  contact::{ContactKeys, MatchKey, NormalizedContact},
  customer::{Customer, Resolution, ResolutionOutcome},
  matcher::{self, KeyLookup, Match},
};
use rusqlite::{Connection, OptionalExtension as _};
use uuid::Uuid;

use crate::{
  encode::{encode_dt, encode_uuid, uuid_column},
  error::is_constraint_violation,
};

/// [`KeyLookup`] over an open connection or transaction.
pub struct ConnLookup<'c>(pub &'c Connection);

impl KeyLookup for ConnLookup<'_> {
  type Error = rusqlite::Error;

  fn lookup(&self, key: MatchKey, value: &str) -> rusqlite::Result<Option<Uuid>> {
    // `column()` comes from a closed enum, never from input.
    let sql = format!("SELECT customer_id FROM customers WHERE {} = ?1", key.column());
    let id: Option<String> = self
      .0
      .query_row(&sql, rusqlite::params![value], |r| r.get(0))
      .optional()?;
    id.map(|s| uuid_column(0, &s)).transpose()
  }
}

pub fn find_existing(conn: &Connection, keys: &ContactKeys) -> rusqlite::Result<Option<Match>> {
  matcher::find_existing(&ConnLookup(conn), keys)
}

/// Outcome of [`resolve_in_tx`] and [`create_or_attach`] when the database
/// itself did not fail.
pub enum Resolved {
  Done(Resolution, Option<Customer>),
  /// A constraint rejected the insert and re-reading found no owner.
  Conflict(String),
}

/// Match `contact` against existing customers, or create one.
///
/// `created_at` is the timestamp recorded on a newly created customer; `now`
/// stamps enrichment updates. Returns the created row alongside the
/// resolution so callers can log it.
pub fn resolve_in_tx(
  conn: &Connection,
  contact: &NormalizedContact,
  created_at: DateTime<Utc>,
  now: DateTime<Utc>,
) -> rusqlite::Result<Resolved> {
  if let Some(hit) = find_existing(conn, &contact.keys)? {
    let enriched = enrich(conn, hit.customer_id, &contact.keys, now)?;
    return Ok(Resolved::Done(
      Resolution {
        customer_id: hit.customer_id,
        outcome:     ResolutionOutcome::Matched { by: hit.by, enriched },
      },
      None,
    ));
  }

  create_or_attach(conn, contact, created_at)
}

/// Insert a customer for `contact`. If a unique index rejects the row,
/// another writer slipped one in despite the lock (e.g. a caller that did not
/// open an immediate transaction); attach to it instead.
pub fn create_or_attach(
  conn: &Connection,
  contact: &NormalizedContact,
  created_at: DateTime<Utc>,
) -> rusqlite::Result<Resolved> {
  let customer = new_customer(contact, created_at);
  match insert_customer(conn, &customer) {
    Ok(()) => Ok(Resolved::Done(
      Resolution {
        customer_id: customer.customer_id,
        outcome:     ResolutionOutcome::Created,
      },
      Some(customer),
    )),
    Err(e) if is_constraint_violation(&e) => match find_existing(conn, &contact.keys)? {
      Some(hit) => Ok(Resolved::Done(
        Resolution {
          customer_id: hit.customer_id,
          outcome:     ResolutionOutcome::Matched { by: hit.by, enriched: Vec::new() },
        },
        None,
      )),
      None => Ok(Resolved::Conflict(e.to_string())),
    },
    Err(e) => Err(e),
  }
}

pub fn new_customer(contact: &NormalizedContact, created_at: DateTime<Utc>) -> Customer {
  Customer {
    customer_id: Uuid::new_v4(),
    name:        contact.name.clone(),
    phone:       contact.keys.phone.clone(),
    document:    contact.keys.document.clone(),
    email:       contact.keys.email.clone(),
    created_at,
    updated_at:  created_at,
  }
}

pub fn insert_customer(conn: &Connection, customer: &Customer) -> rusqlite::Result<()> {
  conn.execute(
    "INSERT INTO customers (customer_id, name, phone, document, email, created_at, updated_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    rusqlite::params![
      encode_uuid(customer.customer_id),
      customer.name,
      customer.phone,
      customer.document,
      customer.email,
      encode_dt(customer.created_at),
      encode_dt(customer.updated_at),
    ],
  )?;
  Ok(())
}

/// Copy keys the matched customer lacks, skipping any already owned by a
/// different customer. Never touches the name.
fn enrich(
  conn: &Connection,
  customer_id: Uuid,
  keys: &ContactKeys,
  now: DateTime<Utc>,
) -> rusqlite::Result<Vec<MatchKey>> {
  let id_str = encode_uuid(customer_id);
  let at_str = encode_dt(now);
  let mut filled = Vec::new();

  for (key, value) in keys.iter() {
    let col = key.column();
    let sql = format!(
      "UPDATE customers SET {col} = ?1, updated_at = ?3
       WHERE customer_id = ?2
         AND {col} IS NULL
         AND NOT EXISTS (SELECT 1 FROM customers WHERE {col} = ?1)"
    );
    if conn.execute(&sql, rusqlite::params![value, id_str, at_str])? == 1 {
      filled.push(key);
    }
  }

  Ok(filled)
}
