//! Request router that applies per-route caching policy.

use chrono::Utc;
use color_eyre::Result;
use reqwest::Method;
use tracing::{debug, warn};

use crate::catalog::CatalogCache;
use crate::config::Config;
use crate::net::{Destination, Fetcher, Request, Response, ResponseSource};
use crate::store::{CacheEntry, DurableStore};

use super::fallback;
use super::policy::{RouteClass, RoutePolicy};

/// Router that sits between the application and the network.
///
/// For GET requests it never fails: when both network and cache come up
/// empty it answers with a synthesized fallback instead.
pub struct CacheRouter<F: Fetcher> {
  fetcher: F,
  /// `None` when the store could not be opened (online-only mode)
  store: Option<DurableStore>,
  policy: RoutePolicy,
  max_entries: Option<usize>,
}

impl<F: Fetcher> CacheRouter<F> {
  /// Create a router with the given store backend.
  pub fn new(fetcher: F, store: DurableStore, config: &Config) -> Self {
    Self {
      fetcher,
      store: Some(store),
      policy: RoutePolicy::new(config.routes.clone()),
      max_entries: config.cache.max_entries,
    }
  }

  /// Router that never reads or writes the cache.
  pub fn online_only(fetcher: F, config: &Config) -> Self {
    Self {
      fetcher,
      store: None,
      policy: RoutePolicy::new(config.routes.clone()),
      max_entries: None,
    }
  }

  /// Route one request.
  ///
  /// Non-GET requests bypass the cache entirely and are forwarded as-is, so
  /// a transport failure is returned to the caller, who is expected to
  /// record the mutation offline. GET requests always yield `Ok`.
  pub async fn handle(&self, request: &Request) -> Result<Response> {
    if request.method != Method::GET {
      debug!(method = %request.method, url = %request.url, "bypassing cache");
      return self.fetcher.fetch(request).await;
    }

    Ok(self.route(request).await)
  }

  async fn route(&self, request: &Request) -> Response {
    let class = self.policy.classify(request);
    debug!(url = %request.url, ?class, "routing request");

    match class {
      RouteClass::StaticAsset => self
        .cache_first(request)
        .await
        .unwrap_or_else(|| fallback_for(request)),
      RouteClass::CacheableApi => self
        .network_first(request, true)
        .await
        .unwrap_or_else(fallback::unavailable),
      RouteClass::UncachedApi => self
        .network_first(request, false)
        .await
        .unwrap_or_else(fallback::unavailable),
      RouteClass::Navigation => self
        .network_first(request, true)
        .await
        .unwrap_or_else(fallback::offline_document),
      RouteClass::Resource => self
        .cache_first(request)
        .await
        .unwrap_or_else(|| fallback_for(request)),
    }
  }

  /// 1. Serve from cache if present (no network call)
  /// 2. Otherwise fetch and populate the cache
  ///
  /// Returns `None` only when the cache misses and the network fails.
  async fn cache_first(&self, request: &Request) -> Option<Response> {
    if let Some(cached) = self.cached(request).await {
      return Some(cached);
    }

    match self.fetcher.fetch(request).await {
      Ok(response) => {
        self.store_response(request, &response).await;
        Some(response)
      }
      Err(e) => {
        debug!(url = %request.url, "network failed with no cached copy: {}", e);
        None
      }
    }
  }

  /// 1. Try the network; on success overwrite the cache
  /// 2. On network failure fall back to the last cached copy
  ///
  /// With `use_cache` unset the cache is neither read nor written.
  async fn network_first(&self, request: &Request, use_cache: bool) -> Option<Response> {
    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if use_cache {
          self.store_response(request, &response).await;
          self.snapshot_catalog(request, &response).await;
        }
        Some(response)
      }
      Err(e) => {
        debug!(url = %request.url, "network failed: {}", e);
        if use_cache {
          self.cached(request).await
        } else {
          None
        }
      }
    }
  }

  async fn cached(&self, request: &Request) -> Option<Response> {
    let store = self.store.as_ref()?;

    match store.get_response(&request.cache_key()).await {
      Ok(Some(entry)) => {
        debug!(url = %request.url, stored_at = %entry.stored_at, "serving from cache");
        Some(Response {
          status: entry.status,
          content_type: entry.content_type,
          body: entry.body,
          source: ResponseSource::Cache,
        })
      }
      Ok(None) => None,
      Err(e) => {
        warn!(url = %request.url, "failed to read cached response: {}", e);
        None
      }
    }
  }

  /// Cache successful responses only; error statuses pass through uncached.
  async fn store_response(&self, request: &Request, response: &Response) {
    let Some(store) = &self.store else {
      return;
    };
    if !response.is_success() {
      return;
    }

    let entry = CacheEntry {
      request_key: request.cache_key(),
      method: request.method.to_string(),
      url: request.url.to_string(),
      status: response.status,
      content_type: response.content_type.clone(),
      body: response.body.clone(),
      stored_at: Utc::now(),
    };

    if let Err(e) = store.put_response(entry, self.max_entries).await {
      warn!(url = %request.url, "failed to cache response: {}", e);
    }
  }

  async fn snapshot_catalog(&self, request: &Request, response: &Response) {
    let (Some(store), Some(kind)) = (&self.store, self.policy.catalog_kind(&request.url)) else {
      return;
    };
    if !response.is_success() {
      return;
    }

    if let Err(e) = CatalogCache::new(store.clone())
      .snapshot(kind, response)
      .await
    {
      warn!(url = %request.url, "failed to snapshot catalog: {}", e);
    }
  }
}

/// Last resort for cache-first routes: images get a placeholder so a page
/// still renders, anything else the structured unavailable answer.
fn fallback_for(request: &Request) -> Response {
  if request.destination == Destination::Image {
    fallback::placeholder_image()
  } else {
    fallback::unavailable()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::catalog::CatalogKind;
  use crate::net::testing::FakeFetcher;
  use crate::store::StoreLocation;
  use std::sync::Arc;
  use url::Url;

  const ORIGIN: &str = "https://shop.test";

  fn config() -> Config {
    Config::parse("remote:\n  base_url: https://shop.test\n").unwrap()
  }

  fn setup() -> (Arc<FakeFetcher>, DurableStore, CacheRouter<Arc<FakeFetcher>>) {
    let fetcher = Arc::new(FakeFetcher::new());
    let store = DurableStore::open_at(&StoreLocation::Memory).unwrap();
    let router = CacheRouter::new(Arc::clone(&fetcher), store.clone(), &config());
    (fetcher, store, router)
  }

  fn url(path: &str) -> String {
    format!("{}{}", ORIGIN, path)
  }

  fn get(path: &str) -> Request {
    Request::get(Url::parse(&url(path)).unwrap())
  }

  #[tokio::test]
  async fn test_static_asset_hit_never_touches_network() {
    let (fetcher, _store, router) = setup();
    fetcher.respond(&url("/static/app.css"), 200, "text/css", "body{}");

    let first = router.handle(&get("/static/app.css")).await.unwrap();
    assert_eq!(first.source, ResponseSource::Network);
    assert_eq!(fetcher.calls(), 1);

    fetcher.respond(&url("/static/app.css"), 200, "text/css", "changed");
    let second = router.handle(&get("/static/app.css")).await.unwrap();

    assert_eq!(second.source, ResponseSource::Cache);
    assert_eq!(second.text(), "body{}");
    assert_eq!(fetcher.calls(), 1);
  }

  #[tokio::test]
  async fn test_cacheable_api_falls_back_to_last_cached_body() {
    let (fetcher, _store, router) = setup();
    let body = r#"[{"_id":"p1","name":"Sneaker"}]"#;
    fetcher.respond(&url("/api/products"), 200, "application/json", body);

    let online = router.handle(&get("/api/products")).await.unwrap();
    assert_eq!(online.source, ResponseSource::Network);

    fetcher.set_offline(true);
    let offline = router.handle(&get("/api/products")).await.unwrap();

    assert_eq!(offline.source, ResponseSource::Cache);
    assert_eq!(offline.status, 200);
    assert_eq!(offline.body, body.as_bytes());
    assert_eq!(offline.content_type.as_deref(), Some("application/json"));
  }

  #[tokio::test]
  async fn test_cacheable_api_overwrites_cache_on_success() {
    let (fetcher, _store, router) = setup();
    fetcher.respond(&url("/api/reviews/p1"), 200, "application/json", "[1]");
    router.handle(&get("/api/reviews/p1")).await.unwrap();

    fetcher.respond(&url("/api/reviews/p1"), 200, "application/json", "[1,2]");
    router.handle(&get("/api/reviews/p1")).await.unwrap();

    fetcher.set_offline(true);
    let offline = router.handle(&get("/api/reviews/p1")).await.unwrap();
    assert_eq!(offline.text(), "[1,2]");
  }

  #[tokio::test]
  async fn test_cacheable_api_without_cache_returns_structured_unavailable() {
    let (fetcher, _store, router) = setup();
    fetcher.set_offline(true);

    let response = router.handle(&get("/api/categories")).await.unwrap();
    let body: serde_json::Value = response.json().unwrap();

    assert_eq!(response.status, 503);
    assert_eq!(response.source, ResponseSource::Fallback);
    assert_eq!(body["offline"], true);
  }

  #[tokio::test]
  async fn test_uncached_api_is_never_cached() {
    let (fetcher, store, router) = setup();
    fetcher.respond(&url("/api/flash-sales"), 200, "application/json", "[]");

    router.handle(&get("/api/flash-sales")).await.unwrap();
    assert!(store
      .get_response(&get("/api/flash-sales").cache_key())
      .await
      .unwrap()
      .is_none());

    fetcher.set_offline(true);
    let response = router.handle(&get("/api/flash-sales")).await.unwrap();
    assert_eq!(response.source, ResponseSource::Fallback);
    assert_eq!(response.status, 503);
  }

  #[tokio::test]
  async fn test_navigation_serves_cached_copy_then_offline_document() {
    let (fetcher, _store, router) = setup();
    fetcher.respond(&url("/products/p1"), 200, "text/html", "<h1>Sneaker</h1>");
    let page = get("/products/p1").with_destination(Destination::Document);
    router.handle(&page).await.unwrap();

    fetcher.set_offline(true);
    let cached = router.handle(&page).await.unwrap();
    assert_eq!(cached.text(), "<h1>Sneaker</h1>");

    let unknown = get("/checkout").with_destination(Destination::Document);
    let offline = router.handle(&unknown).await.unwrap();
    assert_eq!(offline.status, 200);
    assert_eq!(offline.source, ResponseSource::Fallback);
    assert!(offline.text().contains("offline"));
  }

  #[tokio::test]
  async fn test_missing_image_gets_placeholder() {
    let (fetcher, _store, router) = setup();
    fetcher.set_offline(true);

    let image = get("/uploads/p1.jpg").with_destination(Destination::Image);
    let response = router.handle(&image).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.content_type.as_deref(), Some("image/svg+xml"));
    assert!(response.text().starts_with("<svg"));
  }

  #[tokio::test]
  async fn test_missing_static_image_gets_placeholder() {
    let (fetcher, _store, router) = setup();
    fetcher.set_offline(true);

    let logo = get("/static/logo.png").with_destination(Destination::Image);
    let response = router.handle(&logo).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.content_type.as_deref(), Some("image/svg+xml"));
    assert_eq!(response.source, ResponseSource::Fallback);

    let script = get("/static/app.js").with_destination(Destination::Script);
    assert_eq!(router.handle(&script).await.unwrap().status, 503);
  }

  #[tokio::test]
  async fn test_error_status_is_returned_but_not_cached() {
    let (fetcher, _store, router) = setup();
    fetcher.respond(&url("/api/products/gone"), 404, "application/json", "{}");

    let response = router.handle(&get("/api/products/gone")).await.unwrap();
    assert_eq!(response.status, 404);

    fetcher.set_offline(true);
    let offline = router.handle(&get("/api/products/gone")).await.unwrap();
    assert_eq!(offline.source, ResponseSource::Fallback);
  }

  #[tokio::test]
  async fn test_mutations_bypass_cache() {
    let (fetcher, store, router) = setup();
    fetcher.set_offline(true);

    let post = Request::new(Method::POST, Url::parse(&url("/api/cart")).unwrap());
    assert!(router.handle(&post).await.is_err());
    assert_eq!(
      store
        .count(crate::store::Partition::Responses)
        .await
        .unwrap(),
      0
    );
  }

  #[tokio::test]
  async fn test_product_list_is_snapshotted_into_catalog() {
    let (fetcher, store, router) = setup();
    fetcher.respond(
      &url("/api/products"),
      200,
      "application/json",
      r#"{"products":[{"_id":"p1","name":"Sneaker"}]}"#,
    );

    router.handle(&get("/api/products")).await.unwrap();

    let item = CatalogCache::new(store)
      .get(CatalogKind::Product, "p1")
      .await
      .unwrap();
    assert_eq!(item.data["name"], "Sneaker");
  }

  #[tokio::test]
  async fn test_online_only_router_still_falls_back() {
    let fetcher = Arc::new(FakeFetcher::new());
    fetcher.set_offline(true);
    let router = CacheRouter::online_only(Arc::clone(&fetcher), &config());

    let response = router.handle(&get("/api/products")).await.unwrap();
    assert_eq!(response.source, ResponseSource::Fallback);
  }
}
