use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use std::sync::Arc;
use tracing::debug;
use url::Url;

use crate::config::Config;

use super::types::{Request, Response};

/// The network fetch capability.
///
/// Returns `Err` only for transport failures (DNS, refused connection,
/// timeout). Any HTTP status, including 4xx/5xx, is an `Ok` response.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response>;
}

#[async_trait]
impl<T: Fetcher + ?Sized> Fetcher for Arc<T> {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    (**self).fetch(request).await
  }
}

/// Fetcher backed by reqwest
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new(config: &Config) -> Result<Self> {
    let mut headers = HeaderMap::new();
    if let Some(token) = Config::api_token() {
      let value = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|e| eyre!("Invalid API token: {}", e))?;
      headers.insert(AUTHORIZATION, value);
    }

    let client = reqwest::Client::builder()
      .default_headers(headers)
      .timeout(config.remote.timeout())
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());
    if let Some(body) = &request.body {
      builder = builder.json(body);
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {} {}: {}", request.method, request.url, e))?;

    let status = response.status().as_u16();
    let content_type = response
      .headers()
      .get(CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .map(String::from);
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?;

    debug!(method = %request.method, url = %request.url, status, "network response");

    Ok(Response::network(status, content_type, body.to_vec()))
  }
}

/// Resolve a path or absolute URL against the storefront origin.
pub fn resolve(base_url: &str, target: &str) -> Result<Url> {
  if let Ok(url) = Url::parse(target) {
    return Ok(url);
  }

  let base = Url::parse(base_url).map_err(|e| eyre!("Invalid base URL '{}': {}", base_url, e))?;
  base
    .join(target)
    .map_err(|e| eyre!("Invalid URL '{}': {}", target, e))
}
