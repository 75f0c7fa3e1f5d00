//! Bucket storage trait with SQLite and in-memory implementations.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::sync::Mutex;

use super::traits::{CachedResponse, StoredResponse};

/// Trait for bucket storage backends.
///
/// A bucket is a named key-value store mapping a request URL to a stored
/// response. Writes upsert by `(bucket, url)`, so concurrent writers get
/// last-write-wins per key and nothing stronger.
pub trait BucketStore: Send + Sync {
  /// Create a bucket if it does not already exist.
  fn create_bucket(&self, name: &str) -> Result<()>;

  /// Delete a bucket and everything in it.
  fn delete_bucket(&self, name: &str) -> Result<()>;

  /// Names of all existing buckets.
  fn list_buckets(&self) -> Result<Vec<String>>;

  /// Look up a stored response by URL.
  fn get(&self, bucket: &str, url: &str) -> Result<Option<StoredResponse>>;

  /// Store a single response, creating the bucket if needed.
  fn put(&self, bucket: &str, response: &CachedResponse) -> Result<()>;

  /// Store a batch of responses atomically: either every entry lands or none
  /// does. Used for the install-time warm-up.
  fn put_all(&self, bucket: &str, responses: &[CachedResponse]) -> Result<()>;

  /// Number of entries in a bucket.
  fn count(&self, bucket: &str) -> Result<usize>;
}

/// In-memory store backed by a HashMap. Used in tests and ephemeral runs.
#[allow(dead_code)]
#[derive(Default)]
pub struct MemoryStore {
  buckets: Mutex<HashMap<String, HashMap<String, StoredResponse>>>,
}

impl MemoryStore {
  #[allow(dead_code)]
  pub fn new() -> Self {
    Self::default()
  }
}

impl BucketStore for MemoryStore {
  fn create_bucket(&self, name: &str) -> Result<()> {
    let mut buckets = self
      .buckets
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    buckets.entry(name.to_string()).or_default();
    Ok(())
  }

  fn delete_bucket(&self, name: &str) -> Result<()> {
    let mut buckets = self
      .buckets
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    buckets.remove(name);
    Ok(())
  }

  fn list_buckets(&self) -> Result<Vec<String>> {
    let buckets = self
      .buckets
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let mut names: Vec<String> = buckets.keys().cloned().collect();
    names.sort();
    Ok(names)
  }

  fn get(&self, bucket: &str, url: &str) -> Result<Option<StoredResponse>> {
    let buckets = self
      .buckets
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(buckets.get(bucket).and_then(|b| b.get(url)).cloned())
  }

  fn put(&self, bucket: &str, response: &CachedResponse) -> Result<()> {
    let mut buckets = self
      .buckets
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    buckets.entry(bucket.to_string()).or_default().insert(
      response.url.clone(),
      StoredResponse {
        response: response.clone(),
        cached_at: Utc::now(),
      },
    );
    Ok(())
  }

  fn put_all(&self, bucket: &str, responses: &[CachedResponse]) -> Result<()> {
    let mut buckets = self
      .buckets
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let entries = buckets.entry(bucket.to_string()).or_default();
    for response in responses {
      entries.insert(
        response.url.clone(),
        StoredResponse {
          response: response.clone(),
          cached_at: Utc::now(),
        },
      );
    }
    Ok(())
  }

  fn count(&self, bucket: &str) -> Result<usize> {
    let buckets = self
      .buckets
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(buckets.get(bucket).map(|b| b.len()).unwrap_or(0))
  }
}

/// SQLite-based bucket store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open the store at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Open the store at an explicit path.
  pub fn open_at(path: &std::path::Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Open an in-memory store. Used in tests.
  #[allow(dead_code)]
  pub fn in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;
    Ok(store)
  }

  /// Get the default database path.
  fn default_path() -> Result<std::path::PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("cachet").join("cache.db"))
  }

  /// Run database migrations for the bucket tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(BUCKET_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for the bucket tables.
const BUCKET_SCHEMA: &str = r#"
-- One row per versioned bucket
CREATE TABLE IF NOT EXISTS buckets (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Stored responses, keyed by (bucket, url)
CREATE TABLE IF NOT EXISTS responses (
    bucket TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (bucket, url)
);

CREATE INDEX IF NOT EXISTS idx_responses_bucket ON responses(bucket);
"#;

impl BucketStore for SqliteStore {
  fn create_bucket(&self, name: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR IGNORE INTO buckets (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to create bucket {}: {}", name, e))?;

    Ok(())
  }

  fn delete_bucket(&self, name: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("BEGIN TRANSACTION", [])
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let result = conn
      .execute("DELETE FROM responses WHERE bucket = ?", params![name])
      .and_then(|_| conn.execute("DELETE FROM buckets WHERE name = ?", params![name]));

    if let Err(e) = result {
      let _ = conn.execute("ROLLBACK", []);
      return Err(eyre!("Failed to delete bucket {}: {}", name, e));
    }

    conn
      .execute("COMMIT", [])
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn list_buckets(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT name FROM buckets ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names: Vec<String> = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to query buckets: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(names)
  }

  fn get(&self, bucket: &str, url: &str) -> Result<Option<StoredResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT status, headers, body, cached_at FROM responses
         WHERE bucket = ? AND url = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(u16, String, Vec<u8>, String)> = stmt
      .query_row(params![bucket, url], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .ok();

    match row {
      Some((status, headers_json, body, cached_at_str)) => {
        let headers: Vec<(String, String)> = serde_json::from_str(&headers_json)
          .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;
        let cached_at = parse_datetime(&cached_at_str)?;
        Ok(Some(StoredResponse {
          response: CachedResponse {
            url: url.to_string(),
            status,
            headers,
            body,
          },
          cached_at,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, bucket: &str, response: &CachedResponse) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    insert_response(&conn, bucket, response)
  }

  fn put_all(&self, bucket: &str, responses: &[CachedResponse]) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("BEGIN TRANSACTION", [])
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for response in responses {
      if let Err(e) = insert_response(&conn, bucket, response) {
        let _ = conn.execute("ROLLBACK", []);
        return Err(e);
      }
    }

    conn
      .execute("COMMIT", [])
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn count(&self, bucket: &str) -> Result<usize> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM responses WHERE bucket = ?",
        params![bucket],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count bucket {}: {}", bucket, e))?;

    Ok(count as usize)
  }
}

/// Insert one response, creating the bucket row if needed.
fn insert_response(conn: &Connection, bucket: &str, response: &CachedResponse) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR IGNORE INTO buckets (name) VALUES (?)",
      params![bucket],
    )
    .map_err(|e| eyre!("Failed to create bucket {}: {}", bucket, e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO responses (bucket, url, status, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, datetime('now'))",
      params![
        bucket,
        response.url,
        response.status,
        headers,
        response.body
      ],
    )
    .map_err(|e| eyre!("Failed to store response for {}: {}", response.url, e))?;

  Ok(())
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
