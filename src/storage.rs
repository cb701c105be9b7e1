//! Local persistence layer.
//!
//! A minimal durable key/value abstraction. Every entity persists itself
//! under its own key; there are no transactions across keys. Writes are
//! fire-and-forget for callers: the helpers below log failures and never
//! hand them back to in-memory state.

use crate::error::AppError;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// Key prefix of survey draft records
pub const DRAFT_PREFIX: &str = "survey_draft/";
/// Key prefix of upload queue records
pub const QUEUE_PREFIX: &str = "photo_queue/";
/// Key prefix of compressed upload blobs
pub const BLOB_PREFIX: &str = "photo_blob/";
/// Key prefix of on-device display copies
pub const LOCAL_PHOTO_PREFIX: &str = "photo_local/";

/// Durable key/value storage. Each `set` must be atomic per key.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, AppError>;
    fn set(&self, key: &str, value: &str) -> Result<(), AppError>;
    fn remove(&self, key: &str) -> Result<(), AppError>;
    /// All keys starting with `prefix`, in ascending order
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, AppError>;
}

/// In-process store for tests and ephemeral sessions
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), AppError> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), AppError> {
        self.entries().remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, AppError> {
        Ok(self
            .entries()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

/// Serializes `value` as JSON under `key`. Failures are logged only.
pub fn write_record<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) {
    let json = match serde_json::to_string(value) {
        Ok(json) => json,
        Err(e) => {
            log::error!("Failed to serialize record {}: {}", key, e);
            return;
        }
    };
    if let Err(e) = store.set(key, &json) {
        log::error!("Failed to persist record {}: {}", key, e);
    }
}

/// Reads and parses the JSON record under `key`.
///
/// Returns `None` when the key is absent, unreadable or malformed; the latter
/// two are logged for diagnostics.
pub fn read_record<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Option<T> {
    let raw = match store.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(e) => {
            log::warn!("Failed to read record {}: {}", key, e);
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            log::warn!("Discarding malformed record {}: {}", key, e);
            None
        }
    }
}

pub fn write_blob(store: &dyn KeyValueStore, key: &str, bytes: &[u8]) {
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    if let Err(e) = store.set(key, &encoded) {
        log::error!("Failed to persist blob {}: {}", key, e);
    }
}

pub fn read_blob(store: &dyn KeyValueStore, key: &str) -> Option<Vec<u8>> {
    let raw = match store.get(key) {
        Ok(raw) => raw?,
        Err(e) => {
            log::warn!("Failed to read blob {}: {}", key, e);
            return None;
        }
    };
    match base64::engine::general_purpose::STANDARD.decode(raw.as_bytes()) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            log::warn!("Discarding malformed blob {}: {}", key, e);
            None
        }
    }
}

pub fn remove_key(store: &dyn KeyValueStore, key: &str) {
    if let Err(e) = store.remove(key) {
        log::error!("Failed to remove {}: {}", key, e);
    }
}
