use hostpatch_core::{ExtensionStorage, ScopedStorage, SqliteExtensionStorage, StorageError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SavedAccount {
    username: String,
    token: String,
}

#[test]
fn values_survive_reopen() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("storage.db");

    {
        let storage = SqliteExtensionStorage::open(&path).expect("open storage");
        storage
            .set("community.alts", "accounts", &json!({"1": {"username": "a"}}))
            .expect("set");
    }

    let reopened = SqliteExtensionStorage::open(&path).expect("reopen storage");
    assert_eq!(
        reopened.get("community.alts", "accounts").expect("get"),
        Some(json!({"1": {"username": "a"}}))
    );
}

#[test]
fn scoped_storage_isolates_extensions() {
    let backend: Arc<dyn ExtensionStorage> =
        Arc::new(SqliteExtensionStorage::in_memory().expect("open storage"));
    let alts = ScopedStorage::new("community.alts", backend.clone());
    let smartcopy = ScopedStorage::new("community.smartcopy", backend);

    alts.set("theme", &json!("dark")).expect("set");
    assert_eq!(smartcopy.get("theme").expect("get"), None);
    assert_eq!(alts.keys().expect("keys"), vec!["theme"]);
    assert!(smartcopy.keys().expect("keys").is_empty());
}

#[test]
fn typed_accessors_round_trip_and_report_decode_errors() {
    let backend: Arc<dyn ExtensionStorage> =
        Arc::new(SqliteExtensionStorage::in_memory().expect("open storage"));
    let storage = ScopedStorage::new("community.alts", backend);

    let mut accounts = BTreeMap::new();
    accounts.insert(
        "42".to_string(),
        SavedAccount {
            username: "main".to_string(),
            token: "t0k3n".to_string(),
        },
    );
    storage.set_as("accounts", &accounts).expect("set_as");

    let loaded: Option<BTreeMap<String, SavedAccount>> =
        storage.get_as("accounts").expect("get_as");
    assert_eq!(loaded, Some(accounts));

    let missing: Option<SavedAccount> = storage.get_as("absent").expect("missing is ok");
    assert!(missing.is_none());

    storage.set("broken", &json!(17)).expect("set raw");
    let err = storage
        .get_as::<SavedAccount>("broken")
        .expect_err("shape mismatch");
    assert!(matches!(err, StorageError::Decode { .. }));
}
