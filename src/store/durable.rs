//! SQLite-backed durable store with an async facade.

use chrono::{DateTime, SecondsFormat, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::schema::SCHEMA;
use super::traits::{ActionRow, CacheEntry, Partition, Record, Stored};

/// Where the database lives.
#[derive(Debug, Clone)]
pub enum StoreLocation {
  File(PathBuf),
  /// Private in-memory database; gone when the handle is dropped
  Memory,
}

/// Handle to the opened store.
///
/// Cloning is cheap; all clones share one connection, which serializes
/// operations and therefore preserves per-partition program order.
#[derive(Clone)]
pub struct DurableStore {
  conn: Arc<Mutex<Connection>>,
}

impl DurableStore {
  /// Open the database at `location` and create all partitions.
  pub fn open_at(location: &StoreLocation) -> Result<Self> {
    let conn = match location {
      StoreLocation::File(path) => {
        if let Some(parent) = path.parent() {
          std::fs::create_dir_all(parent)
            .map_err(|e| eyre!("Failed to create store directory: {}", e))?;
        }
        Connection::open(path)
          .map_err(|e| eyre!("Failed to open store at {}: {}", path.display(), e))?
      }
      StoreLocation::Memory => Connection::open_in_memory()
        .map_err(|e| eyre!("Failed to open in-memory store: {}", e))?,
    };

    conn
      .busy_timeout(Duration::from_secs(5))
      .map_err(|e| eyre!("Failed to configure store: {}", e))?;
    conn
      .execute_batch(SCHEMA)
      .map_err(|e| eyre!("Failed to run store migrations: {}", e))?;

    info!(?location, "offline store opened");

    Ok(Self {
      conn: Arc::new(Mutex::new(conn)),
    })
  }

  /// Whether two handles refer to the same underlying connection.
  pub fn same_handle(&self, other: &Self) -> bool {
    Arc::ptr_eq(&self.conn, &other.conn)
  }

  /// Run `f` inside one SQLite transaction on the blocking pool.
  ///
  /// The transaction commits only if `f` returns `Ok`; any error rolls back
  /// every write `f` made, across all partitions.
  pub async fn transaction<T, F>(&self, f: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&Tx<'_>) -> Result<T> + Send + 'static,
  {
    let conn = Arc::clone(&self.conn);
    tokio::task::spawn_blocking(move || {
      let mut conn = conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
      let tx = conn
        .transaction()
        .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
      let out = f(&Tx { conn: &tx })?;
      tx.commit()
        .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
      Ok(out)
    })
    .await
    .map_err(|e| eyre!("Store task failed: {}", e))?
  }

  pub async fn put<R: Record>(&self, record: &R) -> Result<()> {
    let record = record.clone();
    self.transaction(move |tx| tx.put(&record)).await
  }

  pub async fn get<R: Record>(&self, key: &str) -> Result<Option<Stored<R>>> {
    let key = key.to_string();
    self.transaction(move |tx| tx.get::<R>(&key)).await
  }

  pub async fn get_all<R: Record>(&self) -> Result<Vec<Stored<R>>> {
    self.transaction(|tx| tx.get_all::<R>()).await
  }

  /// Delete a record. Returns whether anything was removed.
  pub async fn delete<R: Record>(&self, key: &str) -> Result<bool> {
    let key = key.to_string();
    self.transaction(move |tx| tx.delete::<R>(&key)).await
  }

  /// Remove every entry in one partition. Returns the number removed.
  pub async fn clear(&self, partition: Partition) -> Result<usize> {
    self.transaction(move |tx| tx.clear(partition)).await
  }

  pub async fn count(&self, partition: Partition) -> Result<usize> {
    self.transaction(move |tx| tx.count(partition)).await
  }

  pub async fn append_action(&self, kind: String, payload: Vec<u8>) -> Result<i64> {
    self
      .transaction(move |tx| tx.append_action(&kind, &payload))
      .await
  }

  pub async fn actions(&self) -> Result<Vec<ActionRow>> {
    self.transaction(|tx| tx.actions()).await
  }

  pub async fn remove_action(&self, id: i64) -> Result<bool> {
    self.transaction(move |tx| tx.remove_action(id)).await
  }

  pub async fn put_response(&self, entry: CacheEntry, max_entries: Option<usize>) -> Result<()> {
    self
      .transaction(move |tx| tx.put_response(&entry, max_entries))
      .await
  }

  pub async fn get_response(&self, request_key: &str) -> Result<Option<CacheEntry>> {
    let key = request_key.to_string();
    self.transaction(move |tx| tx.get_response(&key)).await
  }
}

/// Idempotent, concurrency-safe opener.
///
/// Every call to [`StoreOpener::open`] returns a clone of the same handle;
/// the schema is created by whichever caller gets there first.
pub struct StoreOpener {
  location: StoreLocation,
  cell: OnceCell<DurableStore>,
}

impl StoreOpener {
  pub fn new(location: StoreLocation) -> Self {
    Self {
      location,
      cell: OnceCell::new(),
    }
  }

  pub async fn open(&self) -> Result<DurableStore> {
    let store = self
      .cell
      .get_or_try_init(|| async {
        let location = self.location.clone();
        tokio::task::spawn_blocking(move || DurableStore::open_at(&location))
          .await
          .map_err(|e| eyre!("Store task failed: {}", e))?
      })
      .await?;

    Ok(store.clone())
  }
}

/// Synchronous view of the store inside a transaction.
pub struct Tx<'a> {
  conn: &'a Connection,
}

impl Tx<'_> {
  pub fn put<R: Record>(&self, record: &R) -> Result<()> {
    let partition = keyed(R::partition())?;
    let data =
      serde_json::to_vec(record).map_err(|e| eyre!("Failed to serialize record: {}", e))?;

    self
      .conn
      .execute(
        "INSERT OR REPLACE INTO records (partition, record_key, data, stored_at)
         VALUES (?, ?, ?, ?)",
        params![partition.name(), record.record_key(), data, now()],
      )
      .map_err(|e| eyre!("Failed to store record: {}", e))?;

    Ok(())
  }

  pub fn get<R: Record>(&self, key: &str) -> Result<Option<Stored<R>>> {
    let partition = keyed(R::partition())?;

    let row: Option<(Vec<u8>, String)> = self
      .conn
      .query_row(
        "SELECT data, stored_at FROM records WHERE partition = ? AND record_key = ?",
        params![partition.name(), key],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read record {}: {}", key, e))?;

    match row {
      Some((data, stored_at)) => {
        let record: R = serde_json::from_slice(&data)
          .map_err(|e| eyre!("Failed to deserialize record {}: {}", key, e))?;
        Ok(Some(Stored {
          record,
          stored_at: parse_datetime(&stored_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  /// All records of a partition in key order. Rows that fail to decode are skipped.
  pub fn get_all<R: Record>(&self) -> Result<Vec<Stored<R>>> {
    let partition = keyed(R::partition())?;

    let mut stmt = self
      .conn
      .prepare(
        "SELECT record_key, data, stored_at FROM records
         WHERE partition = ? ORDER BY record_key",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<(String, Vec<u8>, String)> = stmt
      .query_map(params![partition.name()], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
      })
      .map_err(|e| eyre!("Failed to query records: {}", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read records: {}", e))?;

    let mut records = Vec::with_capacity(rows.len());
    for (key, data, stored_at) in rows {
      let decoded = serde_json::from_slice::<R>(&data)
        .map_err(|e| eyre!("{}", e))
        .and_then(|record| Ok((record, parse_datetime(&stored_at)?)));
      match decoded {
        Ok((record, stored_at)) => records.push(Stored { record, stored_at }),
        Err(e) => warn!(partition = partition.name(), %key, "skipping unreadable record: {}", e),
      }
    }

    Ok(records)
  }

  pub fn delete<R: Record>(&self, key: &str) -> Result<bool> {
    let partition = keyed(R::partition())?;
    let removed = self
      .conn
      .execute(
        "DELETE FROM records WHERE partition = ? AND record_key = ?",
        params![partition.name(), key],
      )
      .map_err(|e| eyre!("Failed to delete record {}: {}", key, e))?;
    Ok(removed > 0)
  }

  pub fn clear(&self, partition: Partition) -> Result<usize> {
    let removed = match partition {
      Partition::PendingActions => self.conn.execute("DELETE FROM pending_actions", []),
      Partition::Responses => self.conn.execute("DELETE FROM response_cache", []),
      other => self.conn.execute(
        "DELETE FROM records WHERE partition = ?",
        params![other.name()],
      ),
    }
    .map_err(|e| eyre!("Failed to clear {}: {}", partition.name(), e))?;

    debug!(partition = partition.name(), removed, "partition cleared");
    Ok(removed)
  }

  pub fn count(&self, partition: Partition) -> Result<usize> {
    let count: i64 = match partition {
      Partition::PendingActions => {
        self
          .conn
          .query_row("SELECT COUNT(*) FROM pending_actions", [], |row| row.get(0))
      }
      Partition::Responses => {
        self
          .conn
          .query_row("SELECT COUNT(*) FROM response_cache", [], |row| row.get(0))
      }
      other => self.conn.query_row(
        "SELECT COUNT(*) FROM records WHERE partition = ?",
        params![other.name()],
        |row| row.get(0),
      ),
    }
    .map_err(|e| eyre!("Failed to count {}: {}", partition.name(), e))?;

    Ok(usize::try_from(count).unwrap_or(0))
  }

  pub fn append_action(&self, kind: &str, payload: &[u8]) -> Result<i64> {
    self
      .conn
      .execute(
        "INSERT INTO pending_actions (kind, payload, created_at) VALUES (?, ?, ?)",
        params![kind, payload, now()],
      )
      .map_err(|e| eyre!("Failed to append pending action: {}", e))?;

    Ok(self.conn.last_insert_rowid())
  }

  /// Every pending action in insertion order.
  pub fn actions(&self) -> Result<Vec<ActionRow>> {
    let mut stmt = self
      .conn
      .prepare("SELECT id, kind, payload, created_at FROM pending_actions ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<(i64, String, Vec<u8>, String)> = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))
      .map_err(|e| eyre!("Failed to query pending actions: {}", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read pending actions: {}", e))?;

    // A bad timestamp must not hide the row from replay.
    Ok(
      rows
        .into_iter()
        .map(|(id, kind, payload, created_at)| ActionRow {
          id,
          kind,
          payload,
          created_at: parse_datetime(&created_at).unwrap_or_else(|e| {
            warn!(id, "pending action has an unreadable timestamp: {}", e);
            DateTime::<Utc>::default()
          }),
        })
        .collect(),
    )
  }

  pub fn remove_action(&self, id: i64) -> Result<bool> {
    let removed = self
      .conn
      .execute("DELETE FROM pending_actions WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove pending action {}: {}", id, e))?;
    Ok(removed > 0)
  }

  /// Store a response, then evict the oldest entries beyond `max_entries`.
  pub fn put_response(&self, entry: &CacheEntry, max_entries: Option<usize>) -> Result<()> {
    self
      .conn
      .execute(
        "INSERT OR REPLACE INTO response_cache
           (request_key, method, url, status, content_type, body, stored_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
          entry.request_key,
          entry.method,
          entry.url,
          entry.status,
          entry.content_type,
          entry.body,
          format_datetime(entry.stored_at),
        ],
      )
      .map_err(|e| eyre!("Failed to store response: {}", e))?;

    if let Some(max) = max_entries {
      let max = i64::try_from(max).unwrap_or(i64::MAX);
      let evicted = self
        .conn
        .execute(
          "DELETE FROM response_cache WHERE request_key IN (
             SELECT request_key FROM response_cache
             ORDER BY stored_at DESC, rowid DESC
             LIMIT -1 OFFSET ?
           )",
          params![max],
        )
        .map_err(|e| eyre!("Failed to evict responses: {}", e))?;
      if evicted > 0 {
        debug!(evicted, "evicted old cached responses");
      }
    }

    Ok(())
  }

  pub fn get_response(&self, request_key: &str) -> Result<Option<CacheEntry>> {
    let row = self
      .conn
      .query_row(
        "SELECT method, url, status, content_type, body, stored_at
         FROM response_cache WHERE request_key = ?",
        params![request_key],
        |row| {
          Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, u16>(2)?,
            row.get::<_, Option<String>>(3)?,
            row.get::<_, Vec<u8>>(4)?,
            row.get::<_, String>(5)?,
          ))
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cached response: {}", e))?;

    match row {
      Some((method, url, status, content_type, body, stored_at)) => Ok(Some(CacheEntry {
        request_key: request_key.to_string(),
        method,
        url,
        status,
        content_type,
        body,
        stored_at: parse_datetime(&stored_at)?,
      })),
      None => Ok(None),
    }
  }
}

fn keyed(partition: Partition) -> Result<Partition> {
  if partition.is_keyed() {
    Ok(partition)
  } else {
    Err(eyre!(
      "Partition {} is not a keyed record partition",
      partition.name()
    ))
  }
}

fn now() -> String {
  format_datetime(Utc::now())
}

/// Fixed-width RFC 3339 so that text order matches time order.
fn format_datetime(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
