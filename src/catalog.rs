//! Product and category snapshots for offline browsing.
//!
//! Catalog API responses are decomposed into one record per item, keyed by
//! the remote identifier, so a product page can still be rendered from the
//! snapshot after the list response itself has been evicted.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::net::Response;
use crate::store::{DurableStore, Partition, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogKind {
  Product,
  Category,
}

impl CatalogKind {
  pub fn as_str(self) -> &'static str {
    match self {
      CatalogKind::Product => "product",
      CatalogKind::Category => "category",
    }
  }

  /// Field names a list response may wrap its items in.
  fn envelope_keys(self) -> &'static [&'static str] {
    match self {
      CatalogKind::Product => &["products", "items", "data"],
      CatalogKind::Category => &["categories", "items", "data"],
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogItem {
  pub kind: CatalogKind,
  pub id: String,
  pub data: Value,
}

impl Record for CatalogItem {
  fn record_key(&self) -> String {
    item_key(self.kind, &self.id)
  }

  fn partition() -> Partition {
    Partition::Catalog
  }
}

fn item_key(kind: CatalogKind, id: &str) -> String {
  format!("{}:{}", kind.as_str(), id)
}

#[derive(Clone)]
pub struct CatalogCache {
  store: DurableStore,
}

impl CatalogCache {
  pub fn new(store: DurableStore) -> Self {
    Self { store }
  }

  /// Store every identifiable item of a JSON catalog response.
  pub async fn snapshot(&self, kind: CatalogKind, response: &Response) -> Result<usize> {
    let value: Value = response
      .json()
      .map_err(|e| eyre!("Catalog response is not JSON: {}", e))?;
    self.save_items(kind, extract_items(kind, value)).await
  }

  /// Upsert items in one transaction; items without an id are skipped.
  pub async fn save_items(&self, kind: CatalogKind, items: Vec<Value>) -> Result<usize> {
    let records: Vec<CatalogItem> = items
      .into_iter()
      .filter_map(|data| {
        let id = item_id(&data)?;
        Some(CatalogItem { kind, id, data })
      })
      .collect();

    let saved = records.len();
    self
      .store
      .transaction(move |tx| records.iter().try_for_each(|record| tx.put(record)))
      .await?;

    debug!(kind = kind.as_str(), saved, "catalog snapshot stored");
    Ok(saved)
  }

  pub async fn get(&self, kind: CatalogKind, id: &str) -> Option<CatalogItem> {
    match self.store.get::<CatalogItem>(&item_key(kind, id)).await {
      Ok(stored) => stored.map(|s| s.record),
      Err(e) => {
        warn!(kind = kind.as_str(), id, "failed to read catalog item: {}", e);
        None
      }
    }
  }

  pub async fn list(&self, kind: CatalogKind) -> Vec<CatalogItem> {
    match self.store.get_all::<CatalogItem>().await {
      Ok(all) => all
        .into_iter()
        .map(|s| s.record)
        .filter(|item| item.kind == kind)
        .collect(),
      Err(e) => {
        warn!(kind = kind.as_str(), "failed to read catalog: {}", e);
        Vec::new()
      }
    }
  }
}

/// Pull the item list out of a response body.
///
/// Accepts a bare array, an object wrapping the array under a known key,
/// or a single item object.
fn extract_items(kind: CatalogKind, value: Value) -> Vec<Value> {
  match value {
    Value::Array(items) => items,
    Value::Object(mut obj) => {
      for key in kind.envelope_keys() {
        if let Some(Value::Array(items)) = obj.remove(*key) {
          return items;
        }
      }
      if item_id(&Value::Object(obj.clone())).is_some() {
        vec![Value::Object(obj)]
      } else {
        Vec::new()
      }
    }
    _ => Vec::new(),
  }
}

/// Remote identifier: document-store `_id` first, then `id`.
fn item_id(value: &Value) -> Option<String> {
  ["_id", "id"]
    .iter()
    .filter_map(|key| value.get(*key))
    .find_map(|id| match id {
      Value::String(s) if !s.is_empty() => Some(s.clone()),
      Value::Number(n) => Some(n.to_string()),
      _ => None,
    })
}
