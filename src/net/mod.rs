//! Fetch boundary: request/response types and the network capability.

mod client;
mod types;

pub use client::{resolve, Fetcher, HttpFetcher};
pub use types::{Destination, Request, Response, ResponseSource};

#[cfg(test)]
pub mod testing {
  //! Scriptable fetcher for tests.

  use super::*;
  use async_trait::async_trait;
  use color_eyre::{eyre::eyre, Result};
  use std::collections::HashMap;
  use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
  use std::sync::Mutex;

  /// Serves canned responses by URL and counts calls.
  ///
  /// While `offline` is set every fetch fails like a dropped connection.
  #[derive(Default)]
  pub struct FakeFetcher {
    responses: Mutex<HashMap<String, Response>>,
    calls: AtomicUsize,
    offline: AtomicBool,
  }

  impl FakeFetcher {
    pub fn new() -> Self {
      Self::default()
    }

    pub fn respond(&self, url: &str, status: u16, content_type: &str, body: &str) {
      self.responses.lock().unwrap().insert(
        url.to_string(),
        Response::network(
          status,
          Some(content_type.to_string()),
          body.as_bytes().to_vec(),
        ),
      );
    }

    pub fn set_offline(&self, offline: bool) {
      self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
      self.calls.load(Ordering::SeqCst)
    }
  }

  #[async_trait]
  impl Fetcher for FakeFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      if self.offline.load(Ordering::SeqCst) {
        return Err(eyre!("network unreachable"));
      }
      self
        .responses
        .lock()
        .unwrap()
        .get(request.url.as_str())
        .cloned()
        .ok_or_else(|| eyre!("connection refused: {}", request.url))
    }
  }
}
