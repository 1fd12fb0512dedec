//! Runtime configuration for the resolver, deserialised from `canon.toml` and
//! `CANON_*` environment variables.

use std::{path::PathBuf, time::Duration};

use chrono::TimeDelta;
use serde::Deserialize;
use uuid::Uuid;

/// Largest batch a single tick may claim.
pub const MAX_BATCH_SIZE: usize = 500;

/// Longest honoured `stale_after_secs`: thirty days.
pub const MAX_STALE_AFTER_SECS: u64 = 30 * 24 * 60 * 60;

/// Longest honoured `retain_completed_days`: ten years.
pub const MAX_RETAIN_COMPLETED_DAYS: u32 = 3650;

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
  #[serde(default = "default_store_path")]
  pub store_path:            PathBuf,
  /// Recorded as `claimed_by` on every entry this process claims.
  #[serde(default = "default_worker_id")]
  pub worker_id:             String,
  #[serde(default = "default_batch_size")]
  pub batch_size:            usize,
  #[serde(default = "default_tick_interval_secs")]
  pub tick_interval_secs:    u64,
  /// A `processing` entry claimed longer ago than this is presumed orphaned.
  #[serde(default = "default_stale_after_secs")]
  pub stale_after_secs:      u64,
  /// Run the reconciliation sweep every N ticks. `0` disables it after the
  /// startup sweep.
  #[serde(default = "default_reconcile_every")]
  pub reconcile_every:       u64,
  /// Delete completed entries older than this many days. Kept forever when
  /// unset.
  #[serde(default)]
  pub retain_completed_days: Option<u32>,
  /// `host:port` to serve the JSON API on. No API when unset.
  #[serde(default)]
  pub listen:                Option<String>,
}

fn default_store_path() -> PathBuf { PathBuf::from("canon.db") }
fn default_worker_id() -> String { format!("resolver-{}", Uuid::new_v4()) }
fn default_batch_size() -> usize { 50 }
fn default_tick_interval_secs() -> u64 { 5 }
fn default_stale_after_secs() -> u64 { 300 }
fn default_reconcile_every() -> u64 { 60 }

impl Default for WorkerConfig {
  fn default() -> Self {
    Self {
      store_path:            default_store_path(),
      worker_id:             default_worker_id(),
      batch_size:            default_batch_size(),
      tick_interval_secs:    default_tick_interval_secs(),
      stale_after_secs:      default_stale_after_secs(),
      reconcile_every:       default_reconcile_every(),
      retain_completed_days: None,
      listen:                None,
    }
  }
}

impl WorkerConfig {
  /// `batch_size` clamped to `1..=MAX_BATCH_SIZE`.
  pub fn batch_size(&self) -> usize { self.batch_size.clamp(1, MAX_BATCH_SIZE) }

  pub fn tick_interval(&self) -> Duration {
    Duration::from_secs(self.tick_interval_secs.max(1))
  }

  /// `stale_after_secs` capped at [`MAX_STALE_AFTER_SECS`].
  pub fn stale_after(&self) -> TimeDelta {
    let secs = self.stale_after_secs.min(MAX_STALE_AFTER_SECS) as i64;
    TimeDelta::try_seconds(secs).unwrap_or(TimeDelta::MAX)
  }

  /// `retain_completed_days` capped at [`MAX_RETAIN_COMPLETED_DAYS`].
  pub fn retain_completed(&self) -> Option<TimeDelta> {
    self.retain_completed_days.map(|days| {
      let days = i64::from(days.min(MAX_RETAIN_COMPLETED_DAYS));
      TimeDelta::try_days(days).unwrap_or(TimeDelta::MAX)
    })
  }
}
