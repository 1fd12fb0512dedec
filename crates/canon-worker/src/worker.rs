//! The resolution worker: drains the queue in bounded batches and links each
//! sighting to its canonical customer.
//!
//! One tick recovers stale claims, claims a batch, and settles every claimed
//! entry on its own. A bad entry is failed or released and the rest of the
//! batch carries on; nothing is rolled back.

use std::{future::Future, sync::Arc};

use canon_core::{
  Classify as _,
  FailureClass,
  queue::QueueEntry,
  sighting::LinkOutcome,
  store::IdentityStore,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::{
  sync::Notify,
  time::{MissedTickBehavior, interval},
};
use uuid::Uuid;

use crate::config::WorkerConfig;

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickSummary {
  /// Stale `processing` entries returned to `pending` before claiming.
  pub recovered: u64,
  pub claimed:   usize,
  pub completed: usize,
  pub failed:    usize,
  /// Entries handed back to `pending` after a transient error.
  pub released:  usize,
}

impl TickSummary {
  fn is_idle(&self) -> bool { self.recovered == 0 && self.claimed == 0 }
}

enum Settled {
  Completed,
  Failed,
  Released,
  /// Settling itself failed, or the claim went to another worker. Stale
  /// recovery returns the entry later if nobody settles it.
  Abandoned,
}

// ─── Worker ──────────────────────────────────────────────────────────────────

pub struct Worker<S> {
  store:  Arc<S>,
  config: WorkerConfig,
  signal: Arc<Notify>,
}

impl<S: IdentityStore> Worker<S> {
  pub fn new(store: Arc<S>, config: WorkerConfig) -> Self {
    Self { store, config, signal: Arc::new(Notify::new()) }
  }

  pub fn config(&self) -> &WorkerConfig { &self.config }

  /// Wakes the run loop before its next scheduled tick. Intake handlers hold
  /// a clone and notify it after recording a sighting.
  pub fn signal(&self) -> Arc<Notify> { self.signal.clone() }

  /// Drain up to `batch_size` pending entries.
  ///
  /// Fails only if stale recovery or the claim itself fails; per-entry errors
  /// are absorbed into the summary.
  pub async fn tick(&self) -> Result<TickSummary, S::Error> {
    let now = Utc::now();
    let cutoff = now
      .checked_sub_signed(self.config.stale_after())
      .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let recovered = self.store.recover_stale(cutoff).await?;
    let batch = self
      .store
      .claim_batch(self.config.worker_id.clone(), self.config.batch_size(), now)
      .await?;

    let mut summary = TickSummary { recovered, claimed: batch.len(), ..TickSummary::default() };
    for entry in &batch {
      match self.settle(entry).await {
        Settled::Completed => summary.completed += 1,
        Settled::Failed => summary.failed += 1,
        Settled::Released => summary.released += 1,
        Settled::Abandoned => {}
      }
    }

    if summary.is_idle() {
      tracing::debug!("resolution queue idle");
    } else {
      tracing::info!(
        recovered = summary.recovered,
        claimed = summary.claimed,
        completed = summary.completed,
        failed = summary.failed,
        released = summary.released,
        "resolution tick"
      );
    }
    Ok(summary)
  }

  /// Enqueue unlinked sightings the intake listeners missed.
  pub async fn reconcile(&self) -> Result<u64, S::Error> { self.store.reconcile().await }

  /// Tick on an interval until `shutdown` resolves.
  ///
  /// Reconciles once at startup and then every `reconcile_every` ticks. A
  /// full batch wakes the loop again immediately so a backlog drains without
  /// waiting out the interval. Errors are logged and the loop carries on.
  pub async fn run(&self, shutdown: impl Future<Output = ()>) {
    tokio::pin!(shutdown);

    let mut ticker = interval(self.config.tick_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(
      worker_id = %self.config.worker_id,
      batch_size = self.config.batch_size(),
      interval_secs = self.config.tick_interval().as_secs(),
      "resolution worker started"
    );
    self.sweep().await;

    let mut ticks: u64 = 0;
    loop {
      tokio::select! {
        _ = &mut shutdown => break,
        _ = ticker.tick() => {}
        _ = self.signal.notified() => tracing::debug!("woken by intake"),
      }

      ticks += 1;
      if self.config.reconcile_every > 0 && ticks % self.config.reconcile_every == 0 {
        self.sweep().await;
      }

      match self.tick().await {
        Ok(summary) if summary.claimed >= self.config.batch_size() => self.signal.notify_one(),
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "resolution tick failed"),
      }

      self.prune().await;
    }

    tracing::info!(worker_id = %self.config.worker_id, "resolution worker stopped");
  }

  async fn sweep(&self) {
    if let Err(e) = self.reconcile().await {
      tracing::warn!(error = %e, "reconciliation sweep failed");
    }
  }

  async fn prune(&self) {
    let Some(retain) = self.config.retain_completed() else { return };
    let Some(before) = Utc::now().checked_sub_signed(retain) else { return };
    match self.store.prune_completed(before).await {
      Ok(0) => {}
      Ok(n) => tracing::info!(pruned = n, "pruned completed queue entries"),
      Err(e) => tracing::warn!(error = %e, "pruning completed entries failed"),
    }
  }

  // ─── Per-entry ─────────────────────────────────────────────────────────────

  async fn settle(&self, entry: &QueueEntry) -> Settled {
    let worker_id = &self.config.worker_id;
    let err = match self.process(entry).await {
      Ok(customer_id) => {
        match self.store.complete(entry.entry_id, worker_id.clone(), customer_id).await {
          Ok(()) => {
            tracing::debug!(entry_id = entry.entry_id, %customer_id, "entry completed");
            return Settled::Completed;
          }
          Err(e) => e,
        }
      }
      Err(e) => e,
    };

    let class = err.class();
    if class == FailureClass::ClaimLost {
      tracing::warn!(entry_id = entry.entry_id, error = %err, "claim lost; leaving entry alone");
      return Settled::Abandoned;
    }
    if class.is_transient() {
      tracing::warn!(entry_id = entry.entry_id, error = %err, "transient failure; releasing entry");
      return match self.store.release(entry.entry_id, worker_id.clone()).await {
        Ok(()) => Settled::Released,
        Err(e) => {
          tracing::warn!(entry_id = entry.entry_id, error = %e, "failed to release entry");
          Settled::Abandoned
        }
      };
    }

    tracing::warn!(
      entry_id = entry.entry_id,
      source = %entry.source,
      sighting_id = %entry.sighting_id,
      ?class,
      error = %err,
      "resolution failed"
    );
    match self.store.fail(entry.entry_id, worker_id.clone(), err.to_string()).await {
      Ok(()) => Settled::Failed,
      Err(e) => {
        tracing::warn!(entry_id = entry.entry_id, error = %e, "failed to mark entry failed");
        Settled::Abandoned
      }
    }
  }

  /// Resolve the entry's sighting and link it. Returns the customer id the
  /// sighting ends up linked to.
  async fn process(&self, entry: &QueueEntry) -> Result<Uuid, S::Error> {
    let sighting = self
      .store
      .get_sighting(entry.source, entry.sighting_id)
      .await?
      .ok_or(canon_core::Error::SightingMissing {
        table:       entry.source,
        sighting_id: entry.sighting_id,
      })?;

    // Linked already, by an earlier attempt that died before completing.
    if let Some(customer_id) = sighting.customer_id {
      return Ok(customer_id);
    }

    let seen_at = sighting.occurred_at.unwrap_or(sighting.recorded_at);
    let resolution = self.store.resolve(sighting.contact, Some(seen_at)).await?;

    let linked = self
      .store
      .link_sighting(entry.source, entry.sighting_id, resolution.customer_id)
      .await?;
    Ok(match linked {
      LinkOutcome::Linked => resolution.customer_id,
      LinkOutcome::AlreadyLinked(existing) => existing,
    })
  }
}
