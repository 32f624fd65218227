//! Responses synthesized when neither network nor cache can answer.

use serde_json::json;

use crate::net::{Response, ResponseSource};

const OFFLINE_DOCUMENT: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>Offline</title>
</head>
<body>
  <main>
    <h1>You are offline</h1>
    <p>This page is not available offline. Items you add to your cart or wishlist are saved and will sync when you reconnect.</p>
  </main>
</body>
</html>
"#;

const PLACEHOLDER_IMAGE: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="200" height="200" viewBox="0 0 200 200"><rect width="200" height="200" fill="#e5e7eb"/><text x="100" y="105" font-family="sans-serif" font-size="14" fill="#9ca3af" text-anchor="middle">Image unavailable</text></svg>"##;

/// Structured "data unavailable" answer for API callers.
pub fn unavailable() -> Response {
  let body = json!({
    "error": "unavailable",
    "message": "You are offline and this data is not cached.",
    "offline": true,
  });

  Response {
    status: 503,
    content_type: Some("application/json".to_string()),
    body: body.to_string().into_bytes(),
    source: ResponseSource::Fallback,
  }
}

/// Generic page for navigations with no cached copy.
pub fn offline_document() -> Response {
  Response {
    status: 200,
    content_type: Some("text/html; charset=utf-8".to_string()),
    body: OFFLINE_DOCUMENT.as_bytes().to_vec(),
    source: ResponseSource::Fallback,
  }
}

/// Grey placeholder so a missing image never blocks rendering.
pub fn placeholder_image() -> Response {
  Response {
    status: 200,
    content_type: Some("image/svg+xml".to_string()),
    body: PLACEHOLDER_IMAGE.as_bytes().to_vec(),
    source: ResponseSource::Fallback,
  }
}
