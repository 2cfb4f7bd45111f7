//! Local record storage trait with in-memory and SQLite implementations.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::cache::{Collection, Record};

/// Trait for local record storage backends.
pub trait RecordStorage: Send + Sync + 'static {
  /// Upsert records by id. Existing records keep their position, new ones are appended.
  fn merge(&self, type_name: &str, records: &[Record]) -> Result<()>;

  /// All records of a type, in insertion order.
  fn peek(&self, type_name: &str) -> Result<Collection>;

  /// Remove every record of a type.
  fn unload(&self, type_name: &str) -> Result<()>;
}

/// Storage held in process memory.
#[derive(Default)]
pub struct MemoryStorage {
  types: Mutex<HashMap<String, Collection>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }
}

impl RecordStorage for MemoryStorage {
  fn merge(&self, type_name: &str, records: &[Record]) -> Result<()> {
    let mut types = self
      .types
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let existing = types.entry(type_name.to_string()).or_default();

    for record in records {
      match existing.iter_mut().find(|r| r.id == record.id) {
        Some(slot) => *slot = record.clone(),
        None => existing.push(record.clone()),
      }
    }

    Ok(())
  }

  fn peek(&self, type_name: &str) -> Result<Collection> {
    let types = self
      .types
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(types.get(type_name).cloned().unwrap_or_default())
  }

  fn unload(&self, type_name: &str) -> Result<()> {
    let mut types = self
      .types
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    types.remove(type_name);
    Ok(())
  }
}

/// SQLite-based record storage.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

/// Schema for the record table.
const RECORD_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS record_cache (
    type_name TEXT NOT NULL,
    record_id TEXT NOT NULL,
    data BLOB NOT NULL,
    position INTEGER NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (type_name, record_id)
);

CREATE INDEX IF NOT EXISTS idx_record_cache_position
    ON record_cache(type_name, position);
"#;

impl SqliteStorage {
  /// Open (or create) the database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create storage directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open record database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a private in-memory database.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory record database: {}", e))?;
    Self::with_connection(conn)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("storeguard").join("records.db"))
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(RECORD_SCHEMA)
      .map_err(|e| eyre!("Failed to run record migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }
}

impl RecordStorage for SqliteStorage {
  fn merge(&self, type_name: &str, records: &[Record]) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let last: Option<i64> = tx
      .query_row(
        "SELECT MAX(position) FROM record_cache WHERE type_name = ?",
        params![type_name],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read record positions: {}", e))?
      .flatten();
    let mut next = last.map_or(0, |p| p + 1);

    for record in records {
      let data =
        serde_json::to_vec(&record.data).map_err(|e| eyre!("Failed to serialize record: {}", e))?;

      // Conflicting rows keep their original position
      tx.execute(
        "INSERT INTO record_cache (type_name, record_id, data, position, stored_at)
         VALUES (?, ?, ?, ?, datetime('now'))
         ON CONFLICT (type_name, record_id)
         DO UPDATE SET data = excluded.data, stored_at = excluded.stored_at",
        params![type_name, record.id, data, next],
      )
      .map_err(|e| eyre!("Failed to store record {}: {}", record.id, e))?;
      next += 1;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn peek(&self, type_name: &str) -> Result<Collection> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT record_id, data FROM record_cache
         WHERE type_name = ?
         ORDER BY position",
      )
      .map_err(|e| eyre!("Failed to prepare record query: {}", e))?;

    let rows: Vec<(String, Vec<u8>)> = stmt
      .query_map(params![type_name], |row| Ok((row.get(0)?, row.get(1)?)))
      .map_err(|e| eyre!("Failed to query records: {}", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read record row: {}", e))?;

    rows
      .into_iter()
      .map(|(id, data)| -> Result<Record> {
        let data = serde_json::from_slice(&data)
          .map_err(|e| eyre!("Failed to deserialize record {}: {}", id, e))?;
        Ok(Record { id, data })
      })
      .collect()
  }

  fn unload(&self, type_name: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "DELETE FROM record_cache WHERE type_name = ?",
        params![type_name],
      )
      .map_err(|e| eyre!("Failed to unload records: {}", e))?;

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn record(id: &str, name: &str) -> Record {
    Record::new(id, json!({"id": id, "name": name}))
  }

  fn exercise_merge_order(storage: &dyn RecordStorage) {
    storage
      .merge("widgets", &[record("w1", "gear"), record("w2", "cog")])
      .unwrap();
    storage
      .merge("widgets", &[record("w3", "bolt"), record("w1", "big gear")])
      .unwrap();

    let held = storage.peek("widgets").unwrap();
    let ids: Vec<_> = held.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["w1", "w2", "w3"]);
    assert_eq!(held[0].data["name"], "big gear");
  }

  fn exercise_unload_is_per_type(storage: &dyn RecordStorage) {
    storage.merge("widgets", &[record("w1", "gear")]).unwrap();
    storage.merge("gadgets", &[record("g1", "lever")]).unwrap();

    storage.unload("widgets").unwrap();
    storage.unload("widgets").unwrap();

    assert!(storage.peek("widgets").unwrap().is_empty());
    assert_eq!(storage.peek("gadgets").unwrap().len(), 1);
  }

  #[test]
  fn test_memory_merge_preserves_order() {
    exercise_merge_order(&MemoryStorage::new());
  }

  #[test]
  fn test_memory_unload_is_per_type() {
    exercise_unload_is_per_type(&MemoryStorage::new());
  }

  #[test]
  fn test_sqlite_merge_preserves_order() {
    exercise_merge_order(&SqliteStorage::open_in_memory().unwrap());
  }

  #[test]
  fn test_sqlite_unload_is_per_type() {
    exercise_unload_is_per_type(&SqliteStorage::open_in_memory().unwrap());
  }

  #[test]
  fn test_peek_unknown_type_is_empty() {
    assert!(MemoryStorage::new().peek("nothing").unwrap().is_empty());
    assert!(SqliteStorage::open_in_memory()
      .unwrap()
      .peek("nothing")
      .unwrap()
      .is_empty());
  }

  #[test]
  fn test_sqlite_positions_continue_after_unload() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.merge("widgets", &[record("w1", "gear")]).unwrap();
    storage.unload("widgets").unwrap();
    storage
      .merge("widgets", &[record("w2", "cog"), record("w1", "gear")])
      .unwrap();

    let ids: Vec<_> = storage
      .peek("widgets")
      .unwrap()
      .into_iter()
      .map(|r| r.id)
      .collect();
    assert_eq!(ids, vec!["w2", "w1"]);
  }
}
