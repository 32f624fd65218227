//! Route classification.

use url::Url;

use crate::catalog::CatalogKind;
use crate::config::RoutesConfig;
use crate::net::{Destination, Request};

/// Caching policy class of a GET request. Exactly one applies per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
  /// Cache-first, no revalidation on hit
  StaticAsset,
  /// Network-first with cache fallback
  CacheableApi,
  /// Network-only; staleness is unacceptable
  UncachedApi,
  /// Network-first, offline document as last resort
  Navigation,
  /// Images, scripts and other subresources: cache-first
  Resource,
}

#[derive(Debug, Clone)]
pub struct RoutePolicy {
  routes: RoutesConfig,
}

impl RoutePolicy {
  pub fn new(routes: RoutesConfig) -> Self {
    Self { routes }
  }

  pub fn classify(&self, request: &Request) -> RouteClass {
    let path = request.url.path();

    if request.destination == Destination::Document {
      return RouteClass::Navigation;
    }

    if path.starts_with(&self.routes.api_prefix) {
      return if self
        .routes
        .cacheable
        .iter()
        .any(|prefix| path_matches(path, prefix))
      {
        RouteClass::CacheableApi
      } else {
        RouteClass::UncachedApi
      };
    }

    if self.is_static(path) {
      return RouteClass::StaticAsset;
    }

    RouteClass::Resource
  }

  /// Which catalog partition a successful response for `url` feeds, if any.
  pub fn catalog_kind(&self, url: &Url) -> Option<CatalogKind> {
    let path = url.path().trim_end_matches('/');
    if path == self.routes.products_path.trim_end_matches('/') {
      Some(CatalogKind::Product)
    } else if path == self.routes.categories_path.trim_end_matches('/') {
      Some(CatalogKind::Category)
    } else {
      None
    }
  }

  fn is_static(&self, path: &str) -> bool {
    if self
      .routes
      .static_prefixes
      .iter()
      .any(|prefix| path.starts_with(prefix.as_str()))
    {
      return true;
    }

    let file = path.rsplit('/').next().unwrap_or_default();
    file
      .rsplit_once('.')
      .map(|(_, ext)| self.routes.static_extensions.contains(&ext.to_lowercase()))
      .unwrap_or(false)
  }
}

/// `prefix` matches itself and anything below it, but not siblings
/// sharing a name prefix (`/api/products` vs `/api/products-admin`).
fn path_matches(path: &str, prefix: &str) -> bool {
  let prefix = prefix.trim_end_matches('/');
  match path.strip_prefix(prefix) {
    Some(rest) => rest.is_empty() || rest.starts_with('/'),
    None => false,
  }
}
