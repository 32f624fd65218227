//! Local mirrors of cart and wishlist intent recorded while offline.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::store::{Partition, Record, Stored, Tx};

use super::action::PendingAction;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineCartEntry {
  pub product_id: String,
  pub quantity: u32,
  pub selected_size: Option<String>,
  pub selected_color: Option<String>,
  pub added_at: DateTime<Utc>,
}

impl Record for OfflineCartEntry {
  fn record_key(&self) -> String {
    self.product_id.clone()
  }

  fn partition() -> Partition {
    Partition::Cart
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineWishlistEntry {
  pub product_id: String,
  pub added_at: DateTime<Utc>,
}

impl Record for OfflineWishlistEntry {
  fn record_key(&self) -> String {
    self.product_id.clone()
  }

  fn partition() -> Partition {
    Partition::Wishlist
  }
}

/// Current mirror entry for `key`. An unreadable entry counts as absent and
/// is overwritten, so the action itself still gets logged.
fn existing<R: Record>(tx: &Tx<'_>, key: &str) -> Option<Stored<R>> {
  match tx.get::<R>(key) {
    Ok(stored) => stored,
    Err(e) => {
      warn!(partition = R::partition().name(), key, "replacing unreadable mirror entry: {}", e);
      None
    }
  }
}

/// Reflect `action` in the mirrors.
///
/// Entries are merged by product id: adding a product already in the cart
/// increases its quantity instead of adding a second line.
pub(crate) fn apply(tx: &Tx<'_>, action: &PendingAction) -> Result<()> {
  match action {
    PendingAction::AddToCart(line) => {
      let entry = match existing::<OfflineCartEntry>(tx, &line.product_id) {
        Some(existing) => {
          let mut entry = existing.record;
          entry.quantity = entry.quantity.saturating_add(line.quantity);
          if line.selected_size.is_some() {
            entry.selected_size = line.selected_size.clone();
          }
          if line.selected_color.is_some() {
            entry.selected_color = line.selected_color.clone();
          }
          entry
        }
        None => OfflineCartEntry {
          product_id: line.product_id.clone(),
          quantity: line.quantity,
          selected_size: line.selected_size.clone(),
          selected_color: line.selected_color.clone(),
          added_at: Utc::now(),
        },
      };
      tx.put(&entry)
    }
    PendingAction::UpdateCartQuantity(change) => {
      if change.quantity == 0 {
        tx.delete::<OfflineCartEntry>(&change.product_id)?;
        return Ok(());
      }
      let entry = match existing::<OfflineCartEntry>(tx, &change.product_id) {
        Some(existing) => OfflineCartEntry {
          quantity: change.quantity,
          ..existing.record
        },
        None => OfflineCartEntry {
          product_id: change.product_id.clone(),
          quantity: change.quantity,
          selected_size: None,
          selected_color: None,
          added_at: Utc::now(),
        },
      };
      tx.put(&entry)
    }
    PendingAction::RemoveFromCart(item) => {
      tx.delete::<OfflineCartEntry>(&item.product_id)?;
      Ok(())
    }
    PendingAction::AddToWishlist(item) => {
      if existing::<OfflineWishlistEntry>(tx, &item.product_id).is_none() {
        tx.put(&OfflineWishlistEntry {
          product_id: item.product_id.clone(),
          added_at: Utc::now(),
        })?;
      }
      Ok(())
    }
    PendingAction::RemoveFromWishlist(item) => {
      tx.delete::<OfflineWishlistEntry>(&item.product_id)?;
      Ok(())
    }
  }
}
