//! Core traits and types for the durable store.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Named, independently keyed regions of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
  /// Product and category snapshots for offline browsing
  Catalog,
  /// Offline mirror of the cart
  Cart,
  /// Offline mirror of the wishlist
  Wishlist,
  /// Arbitrary JSON values
  Blobs,
  /// Mutations waiting to be replayed
  PendingActions,
  /// Cached network responses
  Responses,
}

impl Partition {
  pub const ALL: [Partition; 6] = [
    Partition::Catalog,
    Partition::Cart,
    Partition::Wishlist,
    Partition::Blobs,
    Partition::PendingActions,
    Partition::Responses,
  ];

  pub fn name(self) -> &'static str {
    match self {
      Partition::Catalog => "catalog",
      Partition::Cart => "cart",
      Partition::Wishlist => "wishlist",
      Partition::Blobs => "blobs",
      Partition::PendingActions => "pending_actions",
      Partition::Responses => "responses",
    }
  }

  /// Whether the partition lives in the generic keyed record table.
  pub(crate) fn is_keyed(self) -> bool {
    matches!(
      self,
      Partition::Catalog | Partition::Cart | Partition::Wishlist | Partition::Blobs
    )
  }
}

/// Trait for values persisted in one of the keyed partitions.
///
/// Implementors provide their own unique key; storing a record with an
/// existing key overwrites it.
pub trait Record: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Unique key within the partition (e.g. product id)
  fn record_key(&self) -> String;

  /// Partition the record belongs to
  fn partition() -> Partition;
}

/// A record together with the time it was last written.
#[derive(Debug, Clone)]
pub struct Stored<T> {
  pub record: T,
  pub stored_at: DateTime<Utc>,
}

/// Raw row from the pending action table.
#[derive(Debug, Clone)]
pub struct ActionRow {
  pub id: i64,
  pub kind: String,
  pub payload: Vec<u8>,
  pub created_at: DateTime<Utc>,
}

/// A cached network response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
  /// Stable hash of method + absolute URL
  pub request_key: String,
  pub method: String,
  pub url: String,
  pub status: u16,
  pub content_type: Option<String>,
  pub body: Vec<u8>,
  pub stored_at: DateTime<Utc>,
}

/// Arbitrary JSON value in the blob partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blob {
  pub key: String,
  pub value: serde_json::Value,
}

impl Record for Blob {
  fn record_key(&self) -> String {
    self.key.clone()
  }

  fn partition() -> Partition {
    Partition::Blobs
  }
}
