//! SQLite-backed `ExtensionStorage`.

use super::{validate_key, ExtensionStorage, StorageError, StorageResult};
use crate::db::{open_db, open_db_in_memory};
use log::debug;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Extension storage over one serialized connection.
pub struct SqliteExtensionStorage {
    conn: Mutex<Connection>,
}

impl SqliteExtensionStorage {
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        Ok(Self::from_connection(open_db(path)?))
    }

    pub fn in_memory() -> StorageResult<Self> {
        Ok(Self::from_connection(open_db_in_memory()?))
    }

    /// Wraps a connection that already has migrations applied.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn with_conn<T>(&self, work: impl FnOnce(&Connection) -> StorageResult<T>) -> StorageResult<T> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        work(&conn)
    }
}

impl ExtensionStorage for SqliteExtensionStorage {
    fn get(&self, extension_id: &str, key: &str) -> StorageResult<Option<Value>> {
        let key = validate_key(key)?;
        let raw: Option<String> = self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT value_json FROM extension_kv WHERE extension_id = ?1 AND key = ?2;",
                    params![extension_id, key],
                    |row| row.get(0),
                )
                .optional()?)
        })?;
        raw.map(|text| {
            serde_json::from_str(&text).map_err(|source| StorageError::Decode {
                key: key.to_string(),
                source,
            })
        })
        .transpose()
    }

    fn set(&self, extension_id: &str, key: &str, value: &Value) -> StorageResult<()> {
        let key = validate_key(key)?;
        let encoded = serde_json::to_string(value).map_err(|source| StorageError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO extension_kv (extension_id, key, value_json, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(extension_id, key)
                 DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at;",
                params![extension_id, key, encoded, now_ms()],
            )?;
            Ok(())
        })?;
        debug!(
            "event=storage_set module=storage status=ok extension_id={} key={}",
            extension_id, key
        );
        Ok(())
    }

    fn remove(&self, extension_id: &str, key: &str) -> StorageResult<bool> {
        let key = validate_key(key)?;
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM extension_kv WHERE extension_id = ?1 AND key = ?2;",
                params![extension_id, key],
            )?;
            Ok(changed > 0)
        })
    }

    fn keys(&self, extension_id: &str) -> StorageResult<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT key FROM extension_kv WHERE extension_id = ?1 ORDER BY key ASC;",
            )?;
            let rows = stmt.query_map([extension_id], |row| row.get::<_, String>(0))?;
            let mut keys = Vec::new();
            for key in rows {
                keys.push(key?);
            }
            Ok(keys)
        })
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as i64)
}
