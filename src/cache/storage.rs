//! Cache storage trait with SQLite and in-memory implementations.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use crate::http::{Headers, Request, Response};

/// A single cached response.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  /// The cached response
  pub response: Response,
  /// When the response was cached
  pub cached_at: DateTime<Utc>,
}

/// Named cache stores, each mapping request identity to the last
/// successful response. Every call is atomic on its own; callers do no
/// further locking.
pub trait CacheStorage: Send + Sync {
  /// Create the named store if it does not exist yet.
  fn open(&self, cache_name: &str) -> Result<()>;

  /// Names of all existing stores, oldest first.
  fn keys(&self) -> Result<Vec<String>>;

  /// Delete a store and all of its entries. Returns whether it existed.
  fn delete(&self, cache_name: &str) -> Result<bool>;

  /// Store a response, replacing any previous entry for the same request.
  fn put(&self, cache_name: &str, request: &Request, response: &Response) -> Result<()>;

  /// Store several responses at once; either all are written or none.
  fn put_all(&self, cache_name: &str, entries: &[(Request, Response)]) -> Result<()>;

  /// Look up the entry for a request.
  fn match_request(&self, cache_name: &str, request: &Request) -> Result<Option<CachedEntry>>;

  /// Requests that have an entry in the store.
  fn requests(&self, cache_name: &str) -> Result<Vec<Request>>;
}

#[derive(Default)]
struct MemoryStore {
  entries: HashMap<String, (Request, CachedEntry)>,
}

/// Storage that lives only as long as the process.
#[derive(Default)]
pub struct MemoryStorage {
  stores: Mutex<Vec<(String, MemoryStore)>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }
}

fn store_mut<'a>(stores: &'a mut Vec<(String, MemoryStore)>, name: &str) -> &'a mut MemoryStore {
  let index = match stores.iter().position(|(n, _)| n == name) {
    Some(index) => index,
    None => {
      stores.push((name.to_string(), MemoryStore::default()));
      stores.len() - 1
    }
  };
  &mut stores[index].1
}

impl CacheStorage for MemoryStorage {
  fn open(&self, cache_name: &str) -> Result<()> {
    let mut stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    store_mut(&mut stores, cache_name);
    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>> {
    let stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(stores.iter().map(|(name, _)| name.clone()).collect())
  }

  fn delete(&self, cache_name: &str) -> Result<bool> {
    let mut stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let before = stores.len();
    stores.retain(|(name, _)| name != cache_name);
    Ok(stores.len() != before)
  }

  fn put(&self, cache_name: &str, request: &Request, response: &Response) -> Result<()> {
    self.put_all(cache_name, &[(request.clone(), response.clone())])
  }

  fn put_all(&self, cache_name: &str, entries: &[(Request, Response)]) -> Result<()> {
    let mut stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let store = store_mut(&mut stores, cache_name);
    let cached_at = Utc::now();

    for (request, response) in entries {
      store.entries.insert(
        request.cache_key(),
        (
          request.clone(),
          CachedEntry {
            response: response.clone(),
            cached_at,
          },
        ),
      );
    }

    Ok(())
  }

  fn match_request(&self, cache_name: &str, request: &Request) -> Result<Option<CachedEntry>> {
    let stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    Ok(
      stores
        .iter()
        .find(|(name, _)| name == cache_name)
        .and_then(|(_, store)| store.entries.get(&request.cache_key()))
        .map(|(_, entry)| entry.clone()),
    )
  }

  fn requests(&self, cache_name: &str) -> Result<Vec<Request>> {
    let stores = self
      .stores
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut requests: Vec<Request> = stores
      .iter()
      .find(|(name, _)| name == cache_name)
      .map(|(_, store)| store.entries.values().map(|(r, _)| r.clone()).collect())
      .unwrap_or_default();
    requests.sort_by(|a, b| a.url.cmp(&b.url));

    Ok(requests)
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the cache database at the given path.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Database that disappears with the connection.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- Named cache stores, in creation order
CREATE TABLE IF NOT EXISTS cache_stores (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Responses keyed by request identity (sha256 of method + url)
CREATE TABLE IF NOT EXISTS cache_entries (
    cache_name TEXT NOT NULL,
    request_key TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_name, request_key)
);
"#;

fn insert_entry(
  conn: &Connection,
  cache_name: &str,
  request: &Request,
  response: &Response,
) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO cache_entries
         (cache_name, request_key, method, url, status, status_text, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        cache_name,
        request.cache_key(),
        request.method.to_uppercase(),
        request.url,
        response.status,
        response.status_text,
        headers,
        response.body,
      ],
    )
    .map_err(|e| eyre!("Failed to store response for {}: {}", request.url, e))?;

  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn open(&self, cache_name: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR IGNORE INTO cache_stores (name) VALUES (?)",
        params![cache_name],
      )
      .map_err(|e| eyre!("Failed to open cache {}: {}", cache_name, e))?;

    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT name FROM cache_stores ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache name: {}", e))?;

    Ok(names)
  }

  fn delete(&self, cache_name: &str) -> Result<bool> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE cache_name = ?",
      params![cache_name],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}: {}", cache_name, e))?;

    let removed = tx
      .execute("DELETE FROM cache_stores WHERE name = ?", params![cache_name])
      .map_err(|e| eyre!("Failed to delete cache {}: {}", cache_name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn put(&self, cache_name: &str, request: &Request, response: &Response) -> Result<()> {
    self.put_all(cache_name, &[(request.clone(), response.clone())])
  }

  fn put_all(&self, cache_name: &str, entries: &[(Request, Response)]) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO cache_stores (name) VALUES (?)",
      params![cache_name],
    )
    .map_err(|e| eyre!("Failed to open cache {}: {}", cache_name, e))?;

    for (request, response) in entries {
      insert_entry(&tx, cache_name, request, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn match_request(&self, cache_name: &str, request: &Request) -> Result<Option<CachedEntry>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT status, status_text, headers, body, cached_at FROM cache_entries
         WHERE cache_name = ? AND request_key = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(u16, String, String, Vec<u8>, String)> = stmt
      .query_row(params![cache_name, request.cache_key()], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
      })
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", request.url, e))?;

    match row {
      Some((status, status_text, headers, body, cached_at_str)) => {
        let headers: Headers = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;
        let cached_at = parse_datetime(&cached_at_str)?;
        Ok(Some(CachedEntry {
          response: Response {
            status,
            status_text,
            headers,
            body,
          },
          cached_at,
        }))
      }
      None => Ok(None),
    }
  }

  fn requests(&self, cache_name: &str) -> Result<Vec<Request>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT method, url FROM cache_entries WHERE cache_name = ? ORDER BY url")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let requests = stmt
      .query_map(params![cache_name], |row| {
        Ok(Request {
          method: row.get(0)?,
          url: row.get(1)?,
          headers: Headers::new(),
        })
      })
      .map_err(|e| eyre!("Failed to list entries of {}: {}", cache_name, e))?
      .collect::<rusqlite::Result<Vec<Request>>>()
      .map_err(|e| eyre!("Failed to read entry: {}", e))?;

    Ok(requests)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn backends() -> Vec<(&'static str, Box<dyn CacheStorage>)> {
    vec![
      ("memory", Box::new(MemoryStorage::new())),
      ("sqlite", Box::new(SqliteStorage::open_in_memory().unwrap())),
    ]
  }

  #[test]
  fn test_put_then_match() {
    for (backend, storage) in backends() {
      let request = Request::get("http://localhost:5000/static/manifest.json");
      let response = Response::new(200, "OK", b"{\"name\":\"LINOGTOR\"}".to_vec())
        .with_header("Content-Type", "application/json");

      storage.put("linogtor-v1", &request, &response).unwrap();

      let entry = storage.match_request("linogtor-v1", &request).unwrap();
      let entry = entry.unwrap_or_else(|| panic!("{backend}: entry missing"));
      assert_eq!(entry.response, response, "{backend}");
      assert!(storage.match_request("linogtor-v0", &request).unwrap().is_none());
    }
  }

  #[test]
  fn test_put_replaces_previous_entry() {
    for (backend, storage) in backends() {
      let request = Request::get("http://localhost:5000/api/stats");
      storage
        .put("c", &request, &Response::new(200, "OK", "old"))
        .unwrap();
      storage
        .put("c", &request, &Response::new(200, "OK", "new"))
        .unwrap();

      let entry = storage.match_request("c", &request).unwrap().unwrap();
      assert_eq!(entry.response.text(), "new", "{backend}");
      assert_eq!(storage.requests("c").unwrap().len(), 1, "{backend}");
    }
  }

  #[test]
  fn test_keys_in_creation_order_and_delete() {
    for (backend, storage) in backends() {
      storage.open("linogtor-v0.9.0").unwrap();
      storage.open("linogtor-v1.0.0").unwrap();
      storage.open("linogtor-v0.9.0").unwrap();
      storage
        .put("linogtor-v0.9.0", &Request::get("http://x/"), &Response::new(200, "OK", "x"))
        .unwrap();

      assert_eq!(
        storage.keys().unwrap(),
        vec!["linogtor-v0.9.0", "linogtor-v1.0.0"],
        "{backend}"
      );

      assert!(storage.delete("linogtor-v0.9.0").unwrap(), "{backend}");
      assert!(!storage.delete("linogtor-v0.9.0").unwrap(), "{backend}");
      assert_eq!(storage.keys().unwrap(), vec!["linogtor-v1.0.0"], "{backend}");
      assert!(storage
        .match_request("linogtor-v0.9.0", &Request::get("http://x/"))
        .unwrap()
        .is_none());
    }
  }

  #[test]
  fn test_sqlite_persists_across_connections() {
    let dir = std::env::temp_dir().join(format!("linogtor-agent-test-{}", std::process::id()));
    let path = dir.join("caches.db");
    let request = Request::get("http://localhost:5000/offline.html");

    {
      let storage = SqliteStorage::open(&path).unwrap();
      storage
        .put("linogtor-v1.0.0", &request, &Response::new(200, "OK", "<h1>Offline</h1>"))
        .unwrap();
    }

    let storage = SqliteStorage::open(&path).unwrap();
    assert_eq!(storage.keys().unwrap(), vec!["linogtor-v1.0.0"]);
    let entry = storage
      .match_request("linogtor-v1.0.0", &request)
      .unwrap()
      .unwrap();
    assert_eq!(entry.response.text(), "<h1>Offline</h1>");

    drop(storage);
    let _ = std::fs::remove_dir_all(dir);
  }
}
