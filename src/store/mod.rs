//! Record storage with pluggable backends.
//!
//! Supports:
//! - `memory`: In-memory storage (non-persistent, for testing)
//! - `file`: one JSON envelope per record under `<dir>/<namespace>/`
//! - `sqlite`: SQLite database, one row per record
//!
//! Records are opaque bytes grouped in named namespaces and listed in
//! creation order. Appending an existing id replaces its bytes but keeps
//! its position.

mod file;
mod memory;
mod sqlite;

pub use file::FileRecordStore;
pub use memory::InMemoryRecordStore;
pub use sqlite::SqliteRecordStore;

use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;

/// Signed transactions awaiting broadcast.
pub const UNBROADCAST: &str = "unbroadcast";
/// Submitted, waiting for confirmation.
pub const PENDING: &str = "pending";
/// Confirmed or fetched transactions.
pub const TX: &str = "tx";
/// Transactions that can no longer make progress.
pub const ABANDONED: &str = "abandoned";
/// Resolved content lookups keyed by sha1.
pub const OBJECTS: &str = "objects";

/// Get current timestamp as RFC3339 string.
pub fn now_string() -> String {
    Utc::now().to_rfc3339()
}

/// Sanitize a string for use as a filename.
pub fn sanitize_filename(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() {
        "default".to_string()
    } else {
        out
    }
}

/// Record store trait - implemented by all storage backends.
///
/// # Atomicity
/// Each call is atomic for one record: after a crash a record is either
/// fully present with its old bytes, fully present with its new bytes, or
/// absent. `move_record` appends before it removes, so a crash in between
/// leaves the record in both namespaces rather than in neither.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Whether this store persists data across restarts.
    fn is_persistent(&self) -> bool;

    /// Insert or replace a record.
    async fn append_record(&self, namespace: &str, id: &str, data: &[u8]) -> Result<(), String>;

    /// Record ids ordered by creation time.
    async fn list_record_ids(&self, namespace: &str) -> Result<Vec<String>, String>;

    async fn load_record(&self, namespace: &str, id: &str) -> Result<Option<Vec<u8>>, String>;

    /// Remove a record. Returns whether it existed.
    async fn remove_record(&self, namespace: &str, id: &str) -> Result<bool, String>;

    /// Move a record between namespaces. Returns whether it existed.
    async fn move_record(&self, from: &str, to: &str, id: &str) -> Result<bool, String> {
        let Some(data) = self.load_record(from, id).await? else {
            return Ok(false);
        };
        self.append_record(to, id, &data).await?;
        self.remove_record(from, id).await?;
        Ok(true)
    }
}

/// Record store type selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordStoreType {
    Memory,
    #[default]
    File,
    Sqlite,
}

impl RecordStoreType {
    /// Parse from environment variable value.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Some(Self::Memory),
            "file" | "json" => Some(Self::File),
            "sqlite" | "db" => Some(Self::Sqlite),
            _ => None,
        }
    }
}

/// Create a record store based on type and location.
pub async fn create_record_store(
    store_type: RecordStoreType,
    base_dir: PathBuf,
) -> Result<Arc<dyn RecordStore>, String> {
    match store_type {
        RecordStoreType::Memory => Ok(Arc::new(InMemoryRecordStore::new())),
        RecordStoreType::File => {
            let store = FileRecordStore::new(base_dir).await?;
            Ok(Arc::new(store))
        }
        RecordStoreType::Sqlite => {
            let store = SqliteRecordStore::new(base_dir).await?;
            Ok(Arc::new(store))
        }
    }
}

/// Shared behavioural checks, run against every backend.
#[cfg(test)]
pub(crate) mod contract {
    use super::*;

    pub async fn preserves_creation_order(store: &dyn RecordStore) {
        store.append_record(UNBROADCAST, "b", b"2").await.expect("append b");
        store.append_record(UNBROADCAST, "a", b"1").await.expect("append a");
        store.append_record(UNBROADCAST, "c", b"3").await.expect("append c");
        assert_eq!(
            store.list_record_ids(UNBROADCAST).await.expect("list"),
            vec!["b", "a", "c"]
        );
    }

    pub async fn reappend_keeps_position(store: &dyn RecordStore) {
        store.append_record(UNBROADCAST, "x", b"old").await.expect("append x");
        store.append_record(UNBROADCAST, "y", b"y").await.expect("append y");
        store.append_record(UNBROADCAST, "x", b"new").await.expect("reappend x");
        assert_eq!(
            store.list_record_ids(UNBROADCAST).await.expect("list"),
            vec!["x", "y"]
        );
        assert_eq!(
            store.load_record(UNBROADCAST, "x").await.expect("load"),
            Some(b"new".to_vec())
        );
    }

    pub async fn move_and_remove(store: &dyn RecordStore) {
        store.append_record(UNBROADCAST, "t", b"raw").await.expect("append");
        assert!(store.move_record(UNBROADCAST, PENDING, "t").await.expect("move"));
        assert!(!store.move_record(UNBROADCAST, PENDING, "t").await.expect("second move"));
        assert!(store.list_record_ids(UNBROADCAST).await.expect("list").is_empty());
        assert_eq!(
            store.load_record(PENDING, "t").await.expect("load"),
            Some(b"raw".to_vec())
        );
        assert!(store.remove_record(PENDING, "t").await.expect("remove"));
        assert!(!store.remove_record(PENDING, "t").await.expect("remove again"));
        assert_eq!(store.load_record(PENDING, "t").await.expect("load"), None);
    }

    pub async fn namespaces_are_isolated(store: &dyn RecordStore) {
        store.append_record(TX, "same", b"tx").await.expect("append tx");
        store.append_record(OBJECTS, "same", b"obj").await.expect("append obj");
        assert_eq!(
            store.load_record(TX, "same").await.expect("load"),
            Some(b"tx".to_vec())
        );
        assert_eq!(store.list_record_ids(ABANDONED).await.expect("list"), Vec::<String>::new());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_type_parsing() {
        assert_eq!(RecordStoreType::from_str("SQLite"), Some(RecordStoreType::Sqlite));
        assert_eq!(RecordStoreType::from_str("json"), Some(RecordStoreType::File));
        assert_eq!(RecordStoreType::from_str("memory"), Some(RecordStoreType::Memory));
        assert_eq!(RecordStoreType::from_str("redis"), None);
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("ab/../cd"), "ab____cd");
        assert_eq!(sanitize_filename(""), "default");
    }

    #[tokio::test]
    async fn test_factory_builds_persistent_stores() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = create_record_store(RecordStoreType::File, dir.path().join("f"))
            .await
            .expect("file store");
        assert!(file.is_persistent());
        let sqlite = create_record_store(RecordStoreType::Sqlite, dir.path().join("s"))
            .await
            .expect("sqlite store");
        assert!(sqlite.is_persistent());
        let memory = create_record_store(RecordStoreType::Memory, dir.path().join("m"))
            .await
            .expect("memory store");
        assert!(!memory.is_persistent());
    }
}
