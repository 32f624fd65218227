//! Replays the pending action log against the remote system.
//!
//! The reconciler cycles `Idle -> Draining -> Idle`. A pass works on the
//! batch captured when it starts; anything appended meanwhile waits for the
//! next pass. Within a pass each entry is tried once, in insertion order:
//! confirmed entries are removed, rejected or unreadable ones stay queued.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::applier::{apply, ActionApplier};
use crate::queue::PendingActionLog;
use crate::store::{Blob, DurableStore};

/// Blob key under which the latest report is kept.
pub const LAST_SYNC_KEY: &str = "last_sync";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilerState {
  Idle,
  Draining,
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
  /// Entries in the captured batch
  pub attempted: usize,
  /// Confirmed by the remote system and removed
  pub applied: usize,
  /// Rejected by the remote system, still queued
  pub failed: usize,
  /// Unknown type or malformed payload, still queued
  pub unknown: usize,
  pub finished_at: Option<DateTime<Utc>>,
}

impl DrainReport {
  pub fn retained(&self) -> usize {
    self.failed + self.unknown
  }
}

struct Inner<A> {
  log: PendingActionLog,
  store: DurableStore,
  applier: A,
  draining: AtomicBool,
  reports: watch::Sender<Option<DrainReport>>,
}

pub struct Reconciler<A: ActionApplier> {
  inner: Arc<Inner<A>>,
}

impl<A: ActionApplier> Reconciler<A> {
  pub fn new(log: PendingActionLog, store: DurableStore, applier: A) -> Self {
    let (reports, _) = watch::channel(None);
    Self {
      inner: Arc::new(Inner {
        log,
        store,
        applier,
        draining: AtomicBool::new(false),
        reports,
      }),
    }
  }

  pub fn state(&self) -> ReconcilerState {
    if self.inner.draining.load(Ordering::Acquire) {
      ReconcilerState::Draining
    } else {
      ReconcilerState::Idle
    }
  }

  /// Receives the report of every finished pass.
  pub fn reports(&self) -> watch::Receiver<Option<DrainReport>> {
    self.inner.reports.subscribe()
  }

  /// Run one pass over the log.
  ///
  /// Returns `None` without doing anything if a pass is already running.
  pub async fn run(&self) -> Option<DrainReport> {
    if self
      .inner
      .draining
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      debug!("drain already in progress, ignoring trigger");
      return None;
    }
    let _guard = DrainGuard(&self.inner.draining);

    let mut report = self.drain_batch().await;
    report.finished_at = Some(Utc::now());

    info!(
      attempted = report.attempted,
      applied = report.applied,
      failed = report.failed,
      unknown = report.unknown,
      "reconciliation finished"
    );

    self.save_report(&report).await;
    self.inner.reports.send_replace(Some(report.clone()));
    Some(report)
  }

  async fn drain_batch(&self) -> DrainReport {
    let mut report = DrainReport::default();

    let batch = match self.inner.log.drain().await {
      Ok(batch) => batch,
      Err(e) => {
        warn!("failed to read pending actions: {}", e);
        return report;
      }
    };
    if batch.is_empty() {
      return report;
    }
    info!(entries = batch.len(), "replaying pending actions");

    for entry in batch {
      report.attempted += 1;

      let action = match entry.action() {
        Ok(action) => action,
        Err(e) => {
          warn!(id = entry.id, kind = %entry.kind, "retaining unreadable pending action: {}", e);
          report.unknown += 1;
          continue;
        }
      };

      match apply(&self.inner.applier, &action).await {
        Ok(()) => {
          report.applied += 1;
          if let Err(e) = self.inner.log.remove(entry.id).await {
            // It will be replayed again on the next pass.
            warn!(id = entry.id, "applied action could not be removed: {}", e);
          }
        }
        Err(e) => {
          warn!(
            id = entry.id,
            kind = %entry.kind,
            product_id = action.product_id(),
            "remote rejected pending action: {}", e
          );
          report.failed += 1;
        }
      }
    }

    match self.inner.log.clear_mirrors_if_settled().await {
      Ok(true) => debug!("offline mirrors cleared"),
      Ok(false) => {}
      Err(e) => warn!("failed to clear offline mirrors: {}", e),
    }

    report
  }

  async fn save_report(&self, report: &DrainReport) {
    let value = match serde_json::to_value(report) {
      Ok(value) => value,
      Err(e) => {
        warn!("failed to serialize drain report: {}", e);
        return;
      }
    };

    let blob = Blob {
      key: LAST_SYNC_KEY.to_string(),
      value,
    };
    if let Err(e) = self.inner.store.put(&blob).await {
      warn!("failed to store drain report: {}", e);
    }
  }
}

impl<A: ActionApplier + 'static> Reconciler<A> {
  /// Start a pass in the background. A no-op if one is already running.
  pub fn trigger(&self) {
    let this = self.clone();
    tokio::spawn(async move {
      this.run().await;
    });
  }
}

impl<A: ActionApplier> Clone for Reconciler<A> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

/// Returns the reconciler to `Idle` however the pass ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::applier::testing::RecordingApplier;
  use crate::config::QueueConfig;
  use crate::queue::{CartLine, PendingAction, ProductRef};
  use crate::store::StoreLocation;
  use std::time::Duration;

  fn add(product_id: &str, quantity: u32) -> PendingAction {
    PendingAction::AddToCart(CartLine {
      product_id: product_id.to_string(),
      quantity,
      selected_size: None,
      selected_color: None,
    })
  }

  fn setup(
    applier: RecordingApplier,
  ) -> (
    Arc<RecordingApplier>,
    DurableStore,
    PendingActionLog,
    Reconciler<Arc<RecordingApplier>>,
  ) {
    let applier = Arc::new(applier);
    let store = DurableStore::open_at(&StoreLocation::Memory).unwrap();
    let log = PendingActionLog::new(store.clone(), QueueConfig::default());
    let reconciler = Reconciler::new(log.clone(), store.clone(), Arc::clone(&applier));
    (applier, store, log, reconciler)
  }

  fn products(calls: &[PendingAction]) -> Vec<&str> {
    calls.iter().map(|a| a.product_id()).collect()
  }

  #[tokio::test]
  async fn test_replays_in_insertion_order() {
    let (applier, _store, log, reconciler) = setup(RecordingApplier::new());
    for id in ["a1", "a2", "a3"] {
      log.append(&add(id, 1)).await.unwrap();
    }

    let report = reconciler.run().await.unwrap();

    assert_eq!(products(&applier.calls()), ["a1", "a2", "a3"]);
    assert_eq!(report.applied, 3);
    assert_eq!(reconciler.state(), ReconcilerState::Idle);
  }

  #[tokio::test]
  async fn test_failed_entry_does_not_block_later_ones() {
    let (applier, _store, log, reconciler) = setup(RecordingApplier::new());
    applier.reject("a2");
    for id in ["a1", "a2", "a3"] {
      log.append(&add(id, 1)).await.unwrap();
    }

    let report = reconciler.run().await.unwrap();

    assert_eq!(report.applied, 2);
    assert_eq!(report.failed, 1);
    let remaining = log.drain().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].action().unwrap().product_id(), "a2");

    // Retained entry is retried on the next pass, not within the same one.
    assert_eq!(applier.calls().len(), 3);
    applier.accept("a2");
    let second = reconciler.run().await.unwrap();
    assert_eq!(second.applied, 1);
    assert!(log.drain().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_concurrent_triggers_drain_once() {
    let (applier, _store, log, reconciler) =
      setup(RecordingApplier::new().with_delay(Duration::from_millis(20)));
    for id in ["a1", "a2", "a3"] {
      log.append(&add(id, 1)).await.unwrap();
    }

    let (first, second) = tokio::join!(reconciler.run(), reconciler.run());

    assert_eq!(first.is_some() as u8 + second.is_some() as u8, 1);
    assert_eq!(products(&applier.calls()), ["a1", "a2", "a3"]);
    assert!(log.drain().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_entries_appended_mid_drain_wait_for_next_pass() {
    let (applier, _store, log, reconciler) =
      setup(RecordingApplier::new().with_delay(Duration::from_millis(100)));
    log.append(&add("early", 1)).await.unwrap();

    let running = {
      let reconciler = reconciler.clone();
      tokio::spawn(async move { reconciler.run().await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(reconciler.state(), ReconcilerState::Draining);
    log.append(&add("late", 1)).await.unwrap();

    let report = running.await.unwrap().unwrap();

    assert_eq!(report.attempted, 1);
    assert_eq!(products(&applier.calls()), ["early"]);
    let remaining = log.drain().await.unwrap();
    assert_eq!(remaining[0].action().unwrap().product_id(), "late");
  }

  #[tokio::test]
  async fn test_unknown_action_type_is_retained() {
    let (applier, store, log, reconciler) = setup(RecordingApplier::new());
    store
      .append_action("APPLY_COUPON".to_string(), br#"{"code":"SAVE10"}"#.to_vec())
      .await
      .unwrap();
    log.append(&add("p1", 1)).await.unwrap();

    let report = reconciler.run().await.unwrap();

    assert_eq!(report.unknown, 1);
    assert_eq!(report.applied, 1);
    assert_eq!(products(&applier.calls()), ["p1"]);
    let remaining = log.drain().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].kind, "APPLY_COUPON");
  }

  #[tokio::test]
  async fn test_successful_replay_empties_log_and_mirrors() {
    let (applier, _store, log, reconciler) = setup(RecordingApplier::new());
    log.record_offline(&add("p1", 2)).await.unwrap();
    log
      .record_offline(&PendingAction::AddToWishlist(ProductRef {
        product_id: "p2".to_string(),
      }))
      .await
      .unwrap();

    reconciler.run().await.unwrap();

    assert_eq!(applier.calls()[0], add("p1", 2));
    assert_eq!(log.len().await.unwrap(), 0);
    assert!(log.cart().await.unwrap().is_empty());
    assert!(log.wishlist().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_report_is_stored_and_broadcast() {
    let (_applier, store, log, reconciler) = setup(RecordingApplier::new());
    let mut reports = reconciler.reports();
    log.append(&add("p1", 1)).await.unwrap();

    let report = reconciler.run().await.unwrap();

    reports.changed().await.unwrap();
    assert_eq!(reports.borrow().as_ref(), Some(&report));
    let stored = store.get::<Blob>(LAST_SYNC_KEY).await.unwrap().unwrap();
    let stored: DrainReport = serde_json::from_value(stored.record.value).unwrap();
    assert_eq!(stored, report);
  }
}
