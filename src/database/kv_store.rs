use crate::error::AppError;
use crate::storage::KeyValueStore;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite-backed key/value store.
///
/// Every write is a single UPSERT statement, so a reader never observes a
/// half-written value.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens the database file at `path`, creating it and its schema if needed
    pub fn open(path: &Path) -> Result<Self, AppError> {
        let conn = super::open_database(path)?;
        Ok(Self::from_connection(conn))
    }

    /// Wraps a connection whose schema is already initialised
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    pub fn open_in_memory() -> Result<Self, AppError> {
        let conn = Connection::open_in_memory()?;
        super::schema::init_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let value = self
            .conn()
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), AppError> {
        self.conn().execute(
            "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, chrono::Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), AppError> {
        self.conn()
            .execute("DELETE FROM kv_store WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, AppError> {
        let conn = self.conn();
        // substr comparison avoids LIKE wildcard escaping for '_' in prefixes
        let mut stmt = conn.prepare(
            "SELECT key FROM kv_store WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
        )?;
        let keys = stmt
            .query_map(params![prefix], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_overwrite_remove() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.get("survey_draft/1").unwrap(), None);

        store.set("survey_draft/1", "first").unwrap();
        store.set("survey_draft/1", "second").unwrap();
        assert_eq!(store.get("survey_draft/1").unwrap().as_deref(), Some("second"));

        store.remove("survey_draft/1").unwrap();
        assert_eq!(store.get("survey_draft/1").unwrap(), None);

        // Removing a missing key is not an error
        store.remove("survey_draft/1").unwrap();
    }

    #[test]
    fn test_prefix_scan_treats_underscore_literally() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.set("photo_queue/a", "1").unwrap();
        store.set("photoXqueue/b", "2").unwrap();
        store.set("photo_blob/a", "3").unwrap();

        let keys = store.keys_with_prefix("photo_queue/").unwrap();
        assert_eq!(keys, vec!["photo_queue/a".to_string()]);
    }
}
