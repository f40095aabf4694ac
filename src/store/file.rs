//! JSON file-based record store.
//!
//! Layout: `<root>/<namespace>/<id>.json`, each file one [`Envelope`].
//! Writes go to a temp file and are renamed into place. Mutations hold an
//! in-process mutex and an advisory lock on `<root>/.lock`, so two processes
//! sharing a data directory never interleave a read-modify-write. The
//! creation counter lives in `<root>/.seq` and is only advanced under that
//! lock.

use super::{now_string, sanitize_filename, RecordStore};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    id: String,
    /// Creation order across the whole store
    seq: u64,
    created_at: String,
    /// Base64 record bytes
    data: String,
}

#[derive(Clone)]
pub struct FileRecordStore {
    root: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl FileRecordStore {
    pub async fn new(root: PathBuf) -> Result<Self, String> {
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| format!("Failed to create record store dir: {}", e))?;

        Ok(Self {
            root,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn namespace_dir(&self, namespace: &str) -> PathBuf {
        self.root.join(sanitize_filename(namespace))
    }

    fn record_path(&self, namespace: &str, id: &str) -> PathBuf {
        self.namespace_dir(namespace)
            .join(format!("{}.json", sanitize_filename(id)))
    }

    fn lock_path(&self) -> PathBuf {
        self.root.join(".lock")
    }
}

fn seq_path(root: &Path) -> PathBuf {
    root.join(".seq")
}

fn read_envelope(path: &Path) -> Result<Option<Envelope>, String> {
    match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| format!("Failed to parse record {}: {}", path.display(), e)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(format!("Failed to read record {}: {}", path.display(), err)),
    }
}

fn namespace_envelopes(dir: &Path) -> Result<Vec<Envelope>, String> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(format!("Failed to list {}: {}", dir.display(), err)),
    };
    let mut envelopes = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| e.to_string())?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match read_envelope(&path) {
            Ok(Some(envelope)) => envelopes.push(envelope),
            Ok(None) => {}
            Err(e) => tracing::warn!("Skipping unreadable record: {}", e),
        }
    }
    envelopes.sort_by_key(|e| e.seq);
    Ok(envelopes)
}

fn max_seq(root: &Path) -> u64 {
    let Ok(entries) = fs::read_dir(root) else {
        return 0;
    };
    entries
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| namespace_envelopes(&entry.path()).ok())
        .flatten()
        .map(|e| e.seq)
        .max()
        .unwrap_or(0)
}

/// Claim the next creation sequence number. Caller must hold the file lock.
///
/// A missing or unreadable counter is rebuilt from the records on disk.
fn claim_seq(root: &Path) -> Result<u64, String> {
    let path = seq_path(root);
    let last = match fs::read_to_string(&path) {
        Ok(text) => match text.trim().parse::<u64>() {
            Ok(value) => value,
            Err(_) => max_seq(root),
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => max_seq(root),
        Err(err) => return Err(format!("Failed to read sequence counter: {}", err)),
    };
    let next = last + 1;
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, next.to_string())
        .map_err(|e| format!("Failed to write sequence counter: {}", e))?;
    fs::rename(&tmp_path, &path).map_err(|e| format!("Failed to finalize sequence counter: {}", e))?;
    Ok(next)
}

fn write_atomic(path: &Path, envelope: &Envelope) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("Failed to create namespace dir: {}", e))?;
    }
    let data = serde_json::to_vec_pretty(envelope)
        .map_err(|e| format!("Failed to serialize record: {}", e))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, data).map_err(|e| format!("Failed to write record: {}", e))?;
    fs::rename(&tmp_path, path).map_err(|e| format!("Failed to finalize record: {}", e))
}

/// Run `op` while holding the cross-process advisory lock.
fn with_file_lock<T>(lock_path: &Path, op: impl FnOnce() -> Result<T, String>) -> Result<T, String> {
    let lock = fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(lock_path)
        .map_err(|e| format!("Failed to open store lock: {}", e))?;
    lock.lock_exclusive()
        .map_err(|e| format!("Failed to acquire store lock: {}", e))?;
    let result = op();
    let _ = FileExt::unlock(&lock);
    result
}

#[async_trait]
impl RecordStore for FileRecordStore {
    fn is_persistent(&self) -> bool {
        true
    }

    async fn append_record(&self, namespace: &str, id: &str, data: &[u8]) -> Result<(), String> {
        let _guard = self.write_lock.lock().await;
        let path = self.record_path(namespace, id);
        let lock_path = self.lock_path();
        let root = self.root.clone();
        let id = id.to_string();
        let data = STANDARD.encode(data);

        tokio::task::spawn_blocking(move || {
            with_file_lock(&lock_path, || {
                let envelope = match read_envelope(&path)? {
                    Some(existing) => Envelope { data, ..existing },
                    None => Envelope {
                        id,
                        seq: claim_seq(&root)?,
                        created_at: now_string(),
                        data,
                    },
                };
                write_atomic(&path, &envelope)
            })
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))?
    }

    async fn list_record_ids(&self, namespace: &str) -> Result<Vec<String>, String> {
        let dir = self.namespace_dir(namespace);
        tokio::task::spawn_blocking(move || {
            Ok(namespace_envelopes(&dir)?.into_iter().map(|e| e.id).collect())
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))?
    }

    async fn load_record(&self, namespace: &str, id: &str) -> Result<Option<Vec<u8>>, String> {
        let path = self.record_path(namespace, id);
        let envelope = tokio::task::spawn_blocking(move || read_envelope(&path))
            .await
            .map_err(|e| format!("Task join error: {}", e))??;
        envelope
            .map(|e| {
                STANDARD
                    .decode(e.data)
                    .map_err(|err| format!("Corrupt record {}: {}", e.id, err))
            })
            .transpose()
    }

    async fn remove_record(&self, namespace: &str, id: &str) -> Result<bool, String> {
        let _guard = self.write_lock.lock().await;
        let path = self.record_path(namespace, id);
        let lock_path = self.lock_path();
        tokio::task::spawn_blocking(move || {
            with_file_lock(&lock_path, || match fs::remove_file(&path) {
                Ok(()) => Ok(true),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
                Err(err) => Err(format!("Failed to remove record: {}", err)),
            })
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{contract, UNBROADCAST};

    async fn fresh() -> (tempfile::TempDir, FileRecordStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileRecordStore::new(dir.path().to_path_buf())
            .await
            .expect("file store");
        (dir, store)
    }

    #[tokio::test]
    async fn test_file_store_contract() {
        let (_a, store) = fresh().await;
        contract::preserves_creation_order(&store).await;
        let (_b, store) = fresh().await;
        contract::reappend_keeps_position(&store).await;
        let (_c, store) = fresh().await;
        contract::move_and_remove(&store).await;
        let (_d, store) = fresh().await;
        contract::namespaces_are_isolated(&store).await;
    }

    #[tokio::test]
    async fn test_order_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileRecordStore::new(dir.path().to_path_buf())
            .await
            .expect("file store");
        store.append_record(UNBROADCAST, "first", b"1").await.expect("append");
        store.append_record(UNBROADCAST, "second", b"2").await.expect("append");
        drop(store);

        let reopened = FileRecordStore::new(dir.path().to_path_buf())
            .await
            .expect("reopen");
        reopened
            .append_record(UNBROADCAST, "third", b"3")
            .await
            .expect("append");
        assert_eq!(
            reopened.list_record_ids(UNBROADCAST).await.expect("list"),
            vec!["first", "second", "third"]
        );
        assert_eq!(
            reopened.load_record(UNBROADCAST, "second").await.expect("load"),
            Some(b"2".to_vec())
        );
    }

    #[tokio::test]
    async fn test_stores_sharing_a_directory_keep_creation_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let first = FileRecordStore::new(dir.path().to_path_buf())
            .await
            .expect("first store");
        let second = FileRecordStore::new(dir.path().to_path_buf())
            .await
            .expect("second store");

        first.append_record(UNBROADCAST, "a", b"1").await.expect("append");
        second.append_record(UNBROADCAST, "b", b"2").await.expect("append");
        first.append_record(UNBROADCAST, "c", b"3").await.expect("append");
        second.append_record(UNBROADCAST, "d", b"4").await.expect("append");

        assert_eq!(
            first.list_record_ids(UNBROADCAST).await.expect("list"),
            vec!["a", "b", "c", "d"]
        );
        assert_eq!(
            second.list_record_ids(UNBROADCAST).await.expect("list"),
            vec!["a", "b", "c", "d"]
        );
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let (dir, store) = fresh().await;
        store.append_record(UNBROADCAST, "a", b"1").await.expect("append");
        let leftovers = fs::read_dir(dir.path().join(UNBROADCAST))
            .expect("namespace dir")
            .filter_map(Result::ok)
            .filter(|e| e.path().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }
}
