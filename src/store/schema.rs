/// Schema for every partition of the offline store.
pub const SCHEMA: &str = r#"
-- Keyed partitions (catalog, cart, wishlist, blobs); stores serialized JSON
CREATE TABLE IF NOT EXISTS records (
    partition TEXT NOT NULL,
    record_key TEXT NOT NULL,
    data BLOB NOT NULL,
    stored_at TEXT NOT NULL,
    PRIMARY KEY (partition, record_key)
);

-- Append/delete-only mutation log; id order is replay order
CREATE TABLE IF NOT EXISTS pending_actions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    payload BLOB NOT NULL,
    created_at TEXT NOT NULL
);

-- Cached GET responses keyed by hashed method + URL
CREATE TABLE IF NOT EXISTS response_cache (
    request_key TEXT PRIMARY KEY,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    content_type TEXT,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_response_cache_stored
    ON response_cache(stored_at);
"#;
