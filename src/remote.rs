//! Storefront REST calls for each pending action kind.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde::Serialize;
use url::Url;

use crate::applier::ActionApplier;
use crate::net::{Fetcher, Request};
use crate::queue::{CartLine, ProductRef, QuantityChange};

#[derive(Serialize)]
struct QuantityBody {
  quantity: u32,
}

/// Applier that talks to the storefront API through a [`Fetcher`].
pub struct RemoteApplier<F: Fetcher> {
  fetcher: F,
  base_url: Url,
}

impl<F: Fetcher> RemoteApplier<F> {
  pub fn new(fetcher: F, base_url: &str) -> Result<Self> {
    let base_url =
      Url::parse(base_url).map_err(|e| eyre!("Invalid base URL '{}': {}", base_url, e))?;
    if base_url.cannot_be_a_base() {
      return Err(eyre!("Base URL cannot have paths: {}", base_url));
    }
    Ok(Self { fetcher, base_url })
  }

  /// Build `<base>/<segments...>`, escaping each segment.
  fn endpoint(&self, segments: &[&str]) -> Url {
    let mut url = self.base_url.clone();
    if let Ok(mut path) = url.path_segments_mut() {
      path.pop_if_empty().extend(segments);
    }
    url
  }

  async fn send(&self, method: Method, url: Url, body: Option<serde_json::Value>) -> Result<()> {
    let mut request = Request::new(method.clone(), url.clone());
    if let Some(body) = body {
      request = request.with_json(body);
    }

    let response = self.fetcher.fetch(&request).await?;
    if response.is_success() {
      return Ok(());
    }

    Err(eyre!(
      "{} {} rejected with status {}: {}",
      method,
      url,
      response.status,
      response.text()
    ))
  }

  fn json<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| eyre!("Failed to serialize request body: {}", e))
  }
}

#[async_trait]
impl<F: Fetcher> ActionApplier for RemoteApplier<F> {
  async fn add_to_cart(&self, line: &CartLine) -> Result<()> {
    let url = self.endpoint(&["api", "cart"]);
    self.send(Method::POST, url, Some(Self::json(line)?)).await
  }

  async fn update_cart_quantity(&self, change: &QuantityChange) -> Result<()> {
    let url = self.endpoint(&["api", "cart", &change.product_id]);
    let body = Self::json(&QuantityBody {
      quantity: change.quantity,
    })?;
    self.send(Method::PUT, url, Some(body)).await
  }

  async fn remove_from_cart(&self, item: &ProductRef) -> Result<()> {
    let url = self.endpoint(&["api", "cart", &item.product_id]);
    self.send(Method::DELETE, url, None).await
  }

  async fn add_to_wishlist(&self, item: &ProductRef) -> Result<()> {
    let url = self.endpoint(&["api", "wishlist"]);
    self.send(Method::POST, url, Some(Self::json(item)?)).await
  }

  async fn remove_from_wishlist(&self, item: &ProductRef) -> Result<()> {
    let url = self.endpoint(&["api", "wishlist", &item.product_id]);
    self.send(Method::DELETE, url, None).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::testing::FakeFetcher;
  use std::sync::Arc;

  fn applier(fetcher: &Arc<FakeFetcher>) -> RemoteApplier<Arc<FakeFetcher>> {
    RemoteApplier::new(Arc::clone(fetcher), "https://shop.test").unwrap()
  }

  fn line(product_id: &str) -> CartLine {
    CartLine {
      product_id: product_id.to_string(),
      quantity: 1,
      selected_size: None,
      selected_color: None,
    }
  }

  #[test]
  fn test_endpoint_escapes_product_ids() {
    let fetcher = Arc::new(FakeFetcher::new());
    let applier = RemoteApplier::new(Arc::clone(&fetcher), "https://shop.test/store/").unwrap();

    assert_eq!(
      applier.endpoint(&["api", "cart", "a/b c"]).as_str(),
      "https://shop.test/store/api/cart/a%2Fb%20c"
    );
  }

  #[tokio::test]
  async fn test_success_status_confirms() {
    let fetcher = Arc::new(FakeFetcher::new());
    fetcher.respond("https://shop.test/api/cart", 201, "application/json", "{}");

    assert!(applier(&fetcher).add_to_cart(&line("p1")).await.is_ok());
  }

  #[tokio::test]
  async fn test_error_status_is_a_rejection() {
    let fetcher = Arc::new(FakeFetcher::new());
    fetcher.respond(
      "https://shop.test/api/cart",
      409,
      "application/json",
      r#"{"error":"out of stock"}"#,
    );

    let error = applier(&fetcher)
      .add_to_cart(&line("p1"))
      .await
      .unwrap_err();
    assert!(error.to_string().contains("409"));
  }

  #[tokio::test]
  async fn test_transport_failure_is_an_error() {
    let fetcher = Arc::new(FakeFetcher::new());
    fetcher.set_offline(true);

    let item = ProductRef {
      product_id: "p1".to_string(),
    };
    assert!(applier(&fetcher).remove_from_wishlist(&item).await.is_err());
  }
}
