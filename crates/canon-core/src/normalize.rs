//! Pure canonicalisation of raw contact fields into comparable keys.
//!
//! Nothing here touches a store. Country prefixes are deliberately left in
//! place: `+51 987654321` and `987654321` normalise to different keys.

use std::sync::LazyLock;

use regex::Regex;

/// Minimum trimmed length of a display name.
pub const MIN_NAME_CHARS: usize = 2;
/// Minimum digit count for a phone to count as an identity key.
pub const MIN_PHONE_DIGITS: usize = 7;
/// Minimum trimmed length for a document number to count as an identity key.
pub const MIN_DOCUMENT_CHARS: usize = 5;

static RE_EMAIL: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(?:\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}$")
    .expect("email pattern compiles")
});

/// Strip everything except ASCII digits. Returns `None` when nothing is left.
pub fn normalize_phone(raw: &str) -> Option<String> {
  let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
  (!digits.is_empty()).then_some(digits)
}

/// Trimmed document number, or `None` when blank.
pub fn normalize_document(raw: &str) -> Option<String> {
  let trimmed = raw.trim();
  (!trimmed.is_empty()).then(|| trimmed.to_owned())
}

/// Trimmed, lower-cased email, or `None` when blank. Does not validate.
pub fn normalize_email(raw: &str) -> Option<String> {
  let trimmed = raw.trim();
  (!trimmed.is_empty()).then(|| trimmed.to_lowercase())
}

/// Whether `raw` (after trimming) has the shape `local@domain.tld`.
pub fn is_valid_email(raw: &str) -> bool { RE_EMAIL.is_match(raw.trim()) }

pub fn is_valid_name(raw: &str) -> bool {
  raw.trim().chars().count() >= MIN_NAME_CHARS
}

pub fn phone_qualifies(raw: &str) -> bool {
  normalize_phone(raw).is_some_and(|p| p.len() >= MIN_PHONE_DIGITS)
}

pub fn document_qualifies(raw: &str) -> bool {
  raw.trim().chars().count() >= MIN_DOCUMENT_CHARS
}

/// A contact is valid when it has a name and at least one usable identity
/// signal: a phone with 7+ digits, a document with 5+ characters, or a
/// syntactically valid email.
pub fn is_valid_contact(
  name: &str,
  phone: Option<&str>,
  document: Option<&str>,
  email: Option<&str>,
) -> bool {
  is_valid_name(name)
    && (phone.is_some_and(phone_qualifies)
      || document.is_some_and(document_qualifies)
      || email.is_some_and(is_valid_email))
}
