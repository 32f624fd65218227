//! Seam between the offline layer and the storefront API.

use async_trait::async_trait;
use color_eyre::Result;
use std::sync::Arc;

use crate::queue::{CartLine, PendingAction, ProductRef, QuantityChange};

/// Performs the remote call for each kind of pending action.
///
/// One method per action kind, so adding a kind is a compile error until
/// every applier handles it. An `Err` means the remote system did not
/// confirm the change; the action stays queued.
#[async_trait]
pub trait ActionApplier: Send + Sync {
  async fn add_to_cart(&self, line: &CartLine) -> Result<()>;

  async fn update_cart_quantity(&self, change: &QuantityChange) -> Result<()>;

  async fn remove_from_cart(&self, item: &ProductRef) -> Result<()>;

  async fn add_to_wishlist(&self, item: &ProductRef) -> Result<()>;

  async fn remove_from_wishlist(&self, item: &ProductRef) -> Result<()>;
}

#[async_trait]
impl<T: ActionApplier + ?Sized> ActionApplier for Arc<T> {
  async fn add_to_cart(&self, line: &CartLine) -> Result<()> {
    (**self).add_to_cart(line).await
  }

  async fn update_cart_quantity(&self, change: &QuantityChange) -> Result<()> {
    (**self).update_cart_quantity(change).await
  }

  async fn remove_from_cart(&self, item: &ProductRef) -> Result<()> {
    (**self).remove_from_cart(item).await
  }

  async fn add_to_wishlist(&self, item: &ProductRef) -> Result<()> {
    (**self).add_to_wishlist(item).await
  }

  async fn remove_from_wishlist(&self, item: &ProductRef) -> Result<()> {
    (**self).remove_from_wishlist(item).await
  }
}

/// Dispatch an action to the matching applier method.
pub async fn apply<A: ActionApplier + ?Sized>(applier: &A, action: &PendingAction) -> Result<()> {
  match action {
    PendingAction::AddToCart(line) => applier.add_to_cart(line).await,
    PendingAction::UpdateCartQuantity(change) => applier.update_cart_quantity(change).await,
    PendingAction::RemoveFromCart(item) => applier.remove_from_cart(item).await,
    PendingAction::AddToWishlist(item) => applier.add_to_wishlist(item).await,
    PendingAction::RemoveFromWishlist(item) => applier.remove_from_wishlist(item).await,
  }
}

#[cfg(test)]
pub mod testing {
  //! Recording applier for tests.

  use super::*;
  use color_eyre::eyre::eyre;
  use std::collections::HashSet;
  use std::sync::Mutex;
  use std::time::Duration;

  /// Records every call in order and rejects actions for chosen products.
  #[derive(Default)]
  pub struct RecordingApplier {
    calls: Mutex<Vec<PendingAction>>,
    rejected: Mutex<HashSet<String>>,
    delay: Option<Duration>,
  }

  impl RecordingApplier {
    pub fn new() -> Self {
      Self::default()
    }

    /// Sleep before answering each call, to hold a drain open.
    pub fn with_delay(mut self, delay: Duration) -> Self {
      self.delay = Some(delay);
      self
    }

    pub fn reject(&self, product_id: &str) {
      self.rejected.lock().unwrap().insert(product_id.to_string());
    }

    pub fn accept(&self, product_id: &str) {
      self.rejected.lock().unwrap().remove(product_id);
    }

    pub fn calls(&self) -> Vec<PendingAction> {
      self.calls.lock().unwrap().clone()
    }

    async fn record(&self, action: PendingAction) -> Result<()> {
      if let Some(delay) = self.delay {
        tokio::time::sleep(delay).await;
      }
      let product_id = action.product_id().to_string();
      self.calls.lock().unwrap().push(action);
      if self.rejected.lock().unwrap().contains(&product_id) {
        return Err(eyre!("remote rejected {}", product_id));
      }
      Ok(())
    }
  }

  #[async_trait]
  impl ActionApplier for RecordingApplier {
    async fn add_to_cart(&self, line: &CartLine) -> Result<()> {
      self.record(PendingAction::AddToCart(line.clone())).await
    }

    async fn update_cart_quantity(&self, change: &QuantityChange) -> Result<()> {
      self
        .record(PendingAction::UpdateCartQuantity(change.clone()))
        .await
    }

    async fn remove_from_cart(&self, item: &ProductRef) -> Result<()> {
      self.record(PendingAction::RemoveFromCart(item.clone())).await
    }

    async fn add_to_wishlist(&self, item: &ProductRef) -> Result<()> {
      self.record(PendingAction::AddToWishlist(item.clone())).await
    }

    async fn remove_from_wishlist(&self, item: &ProductRef) -> Result<()> {
      self
        .record(PendingAction::RemoveFromWishlist(item.clone()))
        .await
    }
  }
}
