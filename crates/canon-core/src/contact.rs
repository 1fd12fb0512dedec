//! Contact tuples as they arrive from intake pipelines, and their normalised
//! form used for matching and storage.

use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  normalize::{
    self, document_qualifies, is_valid_email, is_valid_name, phone_qualifies,
  },
};

// ─── Raw ─────────────────────────────────────────────────────────────────────

/// A denormalised contact tuple exactly as a pipeline captured it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactTuple {
  pub name:     String,
  #[serde(default)]
  pub phone:    Option<String>,
  #[serde(default)]
  pub document: Option<String>,
  #[serde(default)]
  pub email:    Option<String>,
}

impl ContactTuple {
  pub fn new(name: impl Into<String>) -> Self {
    Self { name: name.into(), ..Self::default() }
  }

  pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
    self.phone = Some(phone.into());
    self
  }

  pub fn with_document(mut self, document: impl Into<String>) -> Self {
    self.document = Some(document.into());
    self
  }

  pub fn with_email(mut self, email: impl Into<String>) -> Self {
    self.email = Some(email.into());
    self
  }

  pub fn is_valid(&self) -> bool {
    normalize::is_valid_contact(
      &self.name,
      self.phone.as_deref(),
      self.document.as_deref(),
      self.email.as_deref(),
    )
  }

  /// Canonicalise into comparable keys.
  ///
  /// Keys that do not qualify on their own (a 5-digit phone, a 3-character
  /// document, a malformed email) are dropped rather than stored, so they can
  /// never link two unrelated people.
  pub fn normalize(&self) -> Result<NormalizedContact> {
    if !is_valid_name(&self.name) {
      return Err(Error::InvalidContact(format!(
        "name must have at least {} characters",
        normalize::MIN_NAME_CHARS
      )));
    }

    let phone = self
      .phone
      .as_deref()
      .filter(|p| phone_qualifies(p))
      .and_then(normalize::normalize_phone);
    let document = self
      .document
      .as_deref()
      .filter(|d| document_qualifies(d))
      .and_then(normalize::normalize_document);
    let email = self
      .email
      .as_deref()
      .filter(|e| is_valid_email(e))
      .and_then(normalize::normalize_email);

    let keys = ContactKeys { phone, document, email };
    if keys.is_empty() {
      return Err(Error::InvalidContact(
        "no usable phone, document or email".to_owned(),
      ));
    }

    Ok(NormalizedContact { name: self.name.trim().to_owned(), keys })
  }
}

// ─── Normalised ──────────────────────────────────────────────────────────────

/// The identity keys of a contact. Every present key has already qualified.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContactKeys {
  pub phone:    Option<String>,
  pub document: Option<String>,
  pub email:    Option<String>,
}

impl ContactKeys {
  pub fn is_empty(&self) -> bool {
    self.phone.is_none() && self.document.is_none() && self.email.is_none()
  }

  /// Present keys in matching priority order.
  pub fn iter(&self) -> impl Iterator<Item = (MatchKey, &str)> {
    [
      (MatchKey::Phone, self.phone.as_deref()),
      (MatchKey::Document, self.document.as_deref()),
      (MatchKey::Email, self.email.as_deref()),
    ]
    .into_iter()
    .filter_map(|(k, v)| v.map(|v| (k, v)))
  }
}

/// A contact that passed validation, ready for matching or creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedContact {
  /// Trimmed display name.
  pub name: String,
  pub keys: ContactKeys,
}

/// The identity key that produced a match, in priority order.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum MatchKey {
  Phone,
  Document,
  Email,
}

impl MatchKey {
  /// The `customers` column holding this key.
  pub fn column(self) -> &'static str {
    match self {
      Self::Phone => "phone",
      Self::Document => "document",
      Self::Email => "email",
    }
  }
}

impl std::fmt::Display for MatchKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.column())
  }
}
