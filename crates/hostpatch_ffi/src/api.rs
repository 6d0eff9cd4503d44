//! FFI use-case API for Flutter-facing calls.
//!
//! # Responsibility
//! - Expose stable, use-case-level functions to Dart via FRB.
//! - Keep error semantics simple: envelopes with `ok` and a message.
//!
//! # Invariants
//! - Exported functions must not panic across the FFI boundary.
//! - Storage values cross the boundary as JSON text.

use hostpatch_core::{
    core_version as core_version_inner, extract_code_blocks as extract_code_blocks_inner,
    init_logging as init_logging_inner, ping as ping_inner, ExtensionStorage,
    SqliteExtensionStorage,
};
use log::warn;
use std::path::PathBuf;
use std::sync::OnceLock;

const STORAGE_PATH_ENV: &str = "HOSTPATCH_STORAGE_PATH";
const STORAGE_DB_FILE_NAME: &str = "hostpatch_storage.sqlite3";
static STORAGE_DB_PATH: OnceLock<PathBuf> = OnceLock::new();

/// Minimal health-check API for FRB smoke integration.
///
/// # FFI contract
/// - Sync call, non-blocking.
/// - Never throws; always returns a UTF-8 string.
#[flutter_rust_bridge::frb(sync)]
pub fn ping() -> String {
    ping_inner().to_owned()
}

/// Expose core crate version through FFI.
#[flutter_rust_bridge::frb(sync)]
pub fn core_version() -> String {
    core_version_inner().to_owned()
}

/// Initializes Rust core logging once per process.
///
/// Input semantics:
/// - `level`: one of `trace|debug|info|warn|error` (case-insensitive).
/// - `log_dir`: absolute directory path where rolling logs are written.
///
/// # FFI contract
/// - Safe to call repeatedly with the same `level + log_dir`.
/// - Returns empty string on success and error message on failure.
#[flutter_rust_bridge::frb(sync)]
pub fn init_logging(level: String, log_dir: String) -> String {
    match init_logging_inner(level.as_str(), log_dir.as_str()) {
        Ok(()) => String::new(),
        Err(err) => err,
    }
}

/// One fenced code block of a chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageCodeBlock {
    /// Info string after the opening fence, if any.
    pub language: Option<String>,
    pub content: String,
}

/// Extracts fenced code blocks in source order.
#[flutter_rust_bridge::frb(sync)]
pub fn extract_code_blocks(text: String) -> Vec<MessageCodeBlock> {
    extract_code_blocks_inner(&text)
        .into_iter()
        .map(|block| MessageCodeBlock {
            language: block.language,
            content: block.content,
        })
        .collect()
}

/// Envelope for extension storage calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageResponse {
    pub ok: bool,
    /// Stored JSON text; `None` when the key is absent or on failure.
    pub value_json: Option<String>,
    pub message: String,
}

impl StorageResponse {
    fn success(value_json: Option<String>, message: impl Into<String>) -> Self {
        Self {
            ok: true,
            value_json,
            message: message.into(),
        }
    }

    fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            value_json: None,
            message: message.into(),
        }
    }
}

/// Reads one extension storage value.
///
/// # FFI contract
/// - Opens the storage DB at `HOSTPATCH_STORAGE_PATH` or the temp dir.
/// - Absent keys return `ok=true` with `value_json=None`.
#[flutter_rust_bridge::frb(sync)]
pub fn storage_get(extension_id: String, key: String) -> StorageResponse {
    let outcome = with_storage(|storage| {
        storage
            .get(extension_id.trim(), &key)
            .map_err(|err| err.to_string())
    });
    match outcome {
        Ok(Some(value)) => StorageResponse::success(Some(value.to_string()), "found"),
        Ok(None) => StorageResponse::success(None, "not found"),
        Err(message) => {
            warn!(
                "event=ffi_storage_get module=ffi status=error extension_id={} error={}",
                extension_id, message
            );
            StorageResponse::failure(message)
        }
    }
}

/// Writes one extension storage value given as JSON text.
#[flutter_rust_bridge::frb(sync)]
pub fn storage_set(extension_id: String, key: String, value_json: String) -> StorageResponse {
    let value: serde_json::Value = match serde_json::from_str(&value_json) {
        Ok(value) => value,
        Err(err) => return StorageResponse::failure(format!("value is not valid JSON: {err}")),
    };
    let outcome = with_storage(|storage| {
        storage
            .set(extension_id.trim(), &key, &value)
            .map_err(|err| err.to_string())
    });
    match outcome {
        Ok(()) => StorageResponse::success(Some(value.to_string()), "stored"),
        Err(message) => {
            warn!(
                "event=ffi_storage_set module=ffi status=error extension_id={} error={}",
                extension_id, message
            );
            StorageResponse::failure(message)
        }
    }
}

fn resolve_storage_db_path() -> PathBuf {
    STORAGE_DB_PATH
        .get_or_init(|| {
            if let Ok(raw) = std::env::var(STORAGE_PATH_ENV) {
                let trimmed = raw.trim();
                if !trimmed.is_empty() {
                    return PathBuf::from(trimmed);
                }
            }
            std::env::temp_dir().join(STORAGE_DB_FILE_NAME)
        })
        .clone()
}

fn with_storage<T>(
    f: impl FnOnce(&SqliteExtensionStorage) -> Result<T, String>,
) -> Result<T, String> {
    let storage = SqliteExtensionStorage::open(resolve_storage_db_path())
        .map_err(|err| format!("storage open failed: {err}"))?;
    f(&storage)
}
