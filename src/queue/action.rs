//! User mutations that can be queued for replay.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A cart line as the storefront API expects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
  pub product_id: String,
  pub quantity: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub selected_size: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub selected_color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuantityChange {
  pub product_id: String,
  pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRef {
  pub product_id: String,
}

/// One queued mutation. Persisted as its type tag plus JSON payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PendingAction {
  AddToCart(CartLine),
  UpdateCartQuantity(QuantityChange),
  RemoveFromCart(ProductRef),
  AddToWishlist(ProductRef),
  RemoveFromWishlist(ProductRef),
}

impl PendingAction {
  pub fn product_id(&self) -> &str {
    match self {
      PendingAction::AddToCart(line) => &line.product_id,
      PendingAction::UpdateCartQuantity(change) => &change.product_id,
      PendingAction::RemoveFromCart(item)
      | PendingAction::AddToWishlist(item)
      | PendingAction::RemoveFromWishlist(item) => &item.product_id,
    }
  }

  /// Split into the stored type tag and payload bytes.
  pub(crate) fn encode(&self) -> Result<(String, Vec<u8>)> {
    let value = serde_json::to_value(self)
      .map_err(|e| eyre!("Failed to serialize pending action: {}", e))?;

    let kind = value
      .get("type")
      .and_then(Value::as_str)
      .ok_or_else(|| eyre!("Pending action has no type tag"))?
      .to_string();
    let payload = value.get("payload").cloned().unwrap_or(Value::Null);
    let payload = serde_json::to_vec(&payload)
      .map_err(|e| eyre!("Failed to serialize action payload: {}", e))?;

    Ok((kind, payload))
  }

  pub(crate) fn decode(kind: &str, payload: &[u8]) -> Result<Self> {
    let payload: Value = serde_json::from_slice(payload)
      .map_err(|e| eyre!("Payload of {} action is not JSON: {}", kind, e))?;

    serde_json::from_value(json!({ "type": kind, "payload": payload }))
      .map_err(|e| eyre!("Unknown or malformed {} action: {}", kind, e))
  }
}

/// An entry read back from the log.
///
/// The raw tag and payload are kept so entries written by a different
/// version, or corrupted on disk, can still be listed and retained.
#[derive(Debug, Clone)]
pub struct QueuedAction {
  pub id: i64,
  pub kind: String,
  pub payload: Vec<u8>,
  pub created_at: DateTime<Utc>,
}

impl QueuedAction {
  pub fn action(&self) -> Result<PendingAction> {
    PendingAction::decode(&self.kind, &self.payload)
  }

  pub fn payload_text(&self) -> String {
    String::from_utf8_lossy(&self.payload).into_owned()
  }
}
