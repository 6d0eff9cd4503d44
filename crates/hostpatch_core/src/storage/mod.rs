//! Per-extension persistent key/value storage.
//!
//! # Responsibility
//! - Persist JSON values keyed by `(extension_id, key)`.
//! - Offer a typed view bound to one extension.
//!
//! # Invariants
//! - Extensions never see each other's keys through `ScopedStorage`.
//! - Values round-trip through `serde_json` unchanged.

mod sqlite;

pub use sqlite::SqliteExtensionStorage;

use crate::db::DbError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug)]
pub enum StorageError {
    Db(DbError),
    Encode { key: String, source: serde_json::Error },
    Decode { key: String, source: serde_json::Error },
    InvalidKey(String),
}

impl Display for StorageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Encode { key, source } => write!(f, "cannot encode value for `{key}`: {source}"),
            Self::Decode { key, source } => write!(f, "cannot decode value for `{key}`: {source}"),
            Self::InvalidKey(key) => write!(f, "storage key is invalid: `{key}`"),
        }
    }
}

impl Error for StorageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Encode { source, .. } | Self::Decode { source, .. } => Some(source),
            Self::InvalidKey(_) => None,
        }
    }
}

impl From<DbError> for StorageError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Backend contract for extension storage.
pub trait ExtensionStorage: Send + Sync {
    fn get(&self, extension_id: &str, key: &str) -> StorageResult<Option<Value>>;
    fn set(&self, extension_id: &str, key: &str, value: &Value) -> StorageResult<()>;
    /// Returns whether a value was removed.
    fn remove(&self, extension_id: &str, key: &str) -> StorageResult<bool>;
    /// Keys of one extension in ascending order.
    fn keys(&self, extension_id: &str) -> StorageResult<Vec<String>>;
}

/// Storage view bound to one extension id.
#[derive(Clone)]
pub struct ScopedStorage {
    extension_id: String,
    backend: Arc<dyn ExtensionStorage>,
}

impl ScopedStorage {
    pub fn new(extension_id: impl Into<String>, backend: Arc<dyn ExtensionStorage>) -> Self {
        Self {
            extension_id: extension_id.into(),
            backend,
        }
    }

    pub fn extension_id(&self) -> &str {
        &self.extension_id
    }

    pub fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        self.backend.get(&self.extension_id, key)
    }

    pub fn set(&self, key: &str, value: &Value) -> StorageResult<()> {
        self.backend.set(&self.extension_id, key, value)
    }

    pub fn remove(&self, key: &str) -> StorageResult<bool> {
        self.backend.remove(&self.extension_id, key)
    }

    pub fn keys(&self) -> StorageResult<Vec<String>> {
        self.backend.keys(&self.extension_id)
    }

    /// Reads and decodes `key`; a missing key yields `Ok(None)`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> StorageResult<Option<T>> {
        let Some(raw) = self.get(key)? else {
            return Ok(None);
        };
        serde_json::from_value(raw)
            .map(Some)
            .map_err(|source| StorageError::Decode {
                key: key.to_string(),
                source,
            })
    }

    pub fn set_as<T: Serialize>(&self, key: &str, value: &T) -> StorageResult<()> {
        let raw = serde_json::to_value(value).map_err(|source| StorageError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.set(key, &raw)
    }
}

pub(crate) fn validate_key(key: &str) -> StorageResult<&str> {
    let trimmed = key.trim();
    if trimmed.is_empty() {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(trimmed)
}
