//! Append/delete-only log of mutations awaiting confirmation.

use color_eyre::Result;
use tracing::{debug, warn};

use crate::config::QueueConfig;
use crate::store::{DurableStore, Partition};

use super::action::{PendingAction, QueuedAction};
use super::mirror::{self, OfflineCartEntry, OfflineWishlistEntry};

/// The pending action log.
///
/// Entries are never updated in place, so id order is always insertion
/// order and is the replay order. Only the reconciler removes entries.
#[derive(Clone)]
pub struct PendingActionLog {
  store: DurableStore,
  warn_threshold: usize,
}

impl PendingActionLog {
  pub fn new(store: DurableStore, config: QueueConfig) -> Self {
    Self {
      store,
      warn_threshold: config.warn_threshold,
    }
  }

  /// Append an action. Touches only local storage.
  pub async fn append(&self, action: &PendingAction) -> Result<i64> {
    let (kind, payload) = action.encode()?;
    let id = self.store.append_action(kind, payload).await?;
    debug!(id, product_id = action.product_id(), "pending action appended");
    self.check_growth().await;
    Ok(id)
  }

  /// Record an action taken offline: mirror update plus log append in one
  /// transaction, so the mirror and the log cannot drift apart.
  pub async fn record_offline(&self, action: &PendingAction) -> Result<i64> {
    let (kind, payload) = action.encode()?;
    let action = action.clone();

    let id = self
      .store
      .transaction(move |tx| {
        mirror::apply(tx, &action)?;
        tx.append_action(&kind, &payload)
      })
      .await?;

    debug!(id, "offline action recorded");
    self.check_growth().await;
    Ok(id)
  }

  /// All entries in insertion order. Nothing is removed.
  pub async fn drain(&self) -> Result<Vec<QueuedAction>> {
    let rows = self.store.actions().await?;
    Ok(
      rows
        .into_iter()
        .map(|row| QueuedAction {
          id: row.id,
          kind: row.kind,
          payload: row.payload,
          created_at: row.created_at,
        })
        .collect(),
    )
  }

  /// Remove one entry. Removing an absent id is not an error.
  pub async fn remove(&self, id: i64) -> Result<()> {
    if !self.store.remove_action(id).await? {
      debug!(id, "pending action already removed");
    }
    Ok(())
  }

  /// Wipe every entry.
  pub async fn clear(&self) -> Result<usize> {
    self.store.clear(Partition::PendingActions).await
  }

  pub async fn len(&self) -> Result<usize> {
    self.store.count(Partition::PendingActions).await
  }

  pub async fn cart(&self) -> Result<Vec<OfflineCartEntry>> {
    let entries = self.store.get_all::<OfflineCartEntry>().await?;
    Ok(entries.into_iter().map(|s| s.record).collect())
  }

  pub async fn wishlist(&self) -> Result<Vec<OfflineWishlistEntry>> {
    let entries = self.store.get_all::<OfflineWishlistEntry>().await?;
    Ok(entries.into_iter().map(|s| s.record).collect())
  }

  /// Drop the cart and wishlist mirrors once nothing is left to replay.
  ///
  /// Checked inside the transaction so an action recorded concurrently
  /// keeps its mirror entry. Returns whether the mirrors were cleared.
  pub async fn clear_mirrors_if_settled(&self) -> Result<bool> {
    self
      .store
      .transaction(|tx| {
        if tx.count(Partition::PendingActions)? > 0 {
          return Ok(false);
        }
        tx.clear(Partition::Cart)?;
        tx.clear(Partition::Wishlist)?;
        Ok(true)
      })
      .await
  }

  async fn check_growth(&self) {
    match self.len().await {
      Ok(len) if len > self.warn_threshold => warn!(
        len,
        threshold = self.warn_threshold,
        "pending action log keeps growing; entries may be persistently rejected"
      ),
      Ok(_) => {}
      Err(e) => warn!("failed to count pending actions: {}", e),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::queue::{CartLine, ProductRef, QuantityChange};
  use crate::store::{Record, StoreLocation};
  use serde::{Deserialize, Serialize};

  fn log() -> PendingActionLog {
    let store = DurableStore::open_at(&StoreLocation::Memory).unwrap();
    PendingActionLog::new(store, QueueConfig::default())
  }

  fn add(product_id: &str, quantity: u32) -> PendingAction {
    PendingAction::AddToCart(CartLine {
      product_id: product_id.to_string(),
      quantity,
      selected_size: None,
      selected_color: None,
    })
  }

  fn wish(product_id: &str) -> PendingAction {
    PendingAction::AddToWishlist(ProductRef {
      product_id: product_id.to_string(),
    })
  }

  #[tokio::test]
  async fn test_drain_returns_insertion_order_without_deleting() {
    let log = log();
    for id in ["a1", "a2", "a3"] {
      log.append(&add(id, 1)).await.unwrap();
    }

    let first = log.drain().await.unwrap();
    let products: Vec<String> = first
      .iter()
      .map(|e| e.action().unwrap().product_id().to_string())
      .collect();

    assert_eq!(products, ["a1", "a2", "a3"]);
    assert_eq!(log.drain().await.unwrap().len(), 3);
  }

  #[tokio::test]
  async fn test_remove_is_idempotent_and_clear_wipes() {
    let log = log();
    let id = log.append(&add("p1", 1)).await.unwrap();
    log.append(&add("p2", 1)).await.unwrap();

    log.remove(id).await.unwrap();
    log.remove(id).await.unwrap();
    assert_eq!(log.len().await.unwrap(), 1);

    assert_eq!(log.clear().await.unwrap(), 1);
    assert!(log.drain().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_record_offline_merges_cart_by_product() {
    let log = log();
    log.record_offline(&add("p1", 2)).await.unwrap();
    log.record_offline(&add("p1", 3)).await.unwrap();

    let cart = log.cart().await.unwrap();
    assert_eq!(cart.len(), 1);
    assert_eq!(cart[0].quantity, 5);
    assert_eq!(log.len().await.unwrap(), 2);
  }

  #[tokio::test]
  async fn test_record_offline_quantity_and_removal() {
    let log = log();
    log.record_offline(&add("p1", 2)).await.unwrap();
    log
      .record_offline(&PendingAction::UpdateCartQuantity(QuantityChange {
        product_id: "p1".to_string(),
        quantity: 7,
      }))
      .await
      .unwrap();
    assert_eq!(log.cart().await.unwrap()[0].quantity, 7);

    log
      .record_offline(&PendingAction::RemoveFromCart(ProductRef {
        product_id: "p1".to_string(),
      }))
      .await
      .unwrap();
    assert!(log.cart().await.unwrap().is_empty());
    assert_eq!(log.len().await.unwrap(), 3);
  }

  #[tokio::test]
  async fn test_wishlist_add_is_not_duplicated() {
    let log = log();
    log.record_offline(&wish("p1")).await.unwrap();
    log.record_offline(&wish("p1")).await.unwrap();

    assert_eq!(log.wishlist().await.unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_mirrors_cleared_only_when_log_is_empty() {
    let log = log();
    let id = log.record_offline(&add("p1", 1)).await.unwrap();

    assert!(!log.clear_mirrors_if_settled().await.unwrap());
    assert_eq!(log.cart().await.unwrap().len(), 1);

    log.remove(id).await.unwrap();
    assert!(log.clear_mirrors_if_settled().await.unwrap());
    assert!(log.cart().await.unwrap().is_empty());
  }

  #[derive(Clone, Serialize, Deserialize)]
  struct Junk {
    junk: String,
  }

  impl Record for Junk {
    fn record_key(&self) -> String {
      "p1".to_string()
    }

    fn partition() -> Partition {
      Partition::Cart
    }
  }

  #[tokio::test]
  async fn test_unreadable_mirror_entry_does_not_lose_the_action() {
    let store = DurableStore::open_at(&StoreLocation::Memory).unwrap();
    let log = PendingActionLog::new(store.clone(), QueueConfig::default());
    store
      .put(&Junk {
        junk: "left by an older build".to_string(),
      })
      .await
      .unwrap();

    assert!(log.record_offline(&add("p1", 2)).await.is_ok());

    assert_eq!(log.len().await.unwrap(), 1);
    let cart = log.cart().await.unwrap();
    assert_eq!(cart.len(), 1);
    assert_eq!(cart[0].quantity, 2);
  }
}
