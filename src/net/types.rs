//! Request and response types at the fetch boundary.

use reqwest::Method;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use url::Url;

/// What kind of resource a request is for, as a browser would report it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Destination {
  /// Top-level navigation
  Document,
  Image,
  Script,
  Style,
  Font,
  /// Programmatic fetch (API calls)
  #[default]
  Fetch,
}

/// An outgoing request.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub destination: Destination,
  pub body: Option<serde_json::Value>,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      destination: Destination::default(),
      body: None,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn with_json(mut self, body: serde_json::Value) -> Self {
    self.body = Some(body);
    self
  }

  /// Stable cache key for method + absolute URL.
  pub fn cache_key(&self) -> String {
    let input = format!("{} {}", self.method.as_str(), self.url.as_str());

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh from the network
  Network,
  /// Served from the response cache
  Cache,
  /// Synthesized locally because neither network nor cache could answer
  Fallback,
}

/// A response handed back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub content_type: Option<String>,
  pub body: Vec<u8>,
  pub source: ResponseSource,
}

impl Response {
  pub fn network(status: u16, content_type: Option<String>, body: Vec<u8>) -> Self {
    Self {
      status,
      content_type,
      body,
      source: ResponseSource::Network,
    }
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }

  pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
    serde_json::from_slice(&self.body)
  }
}
