//! SQLite-based record store.

use super::{now_string, RecordStore};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS records (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    namespace TEXT NOT NULL,
    id TEXT NOT NULL,
    data BLOB NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (namespace, id)
);

CREATE INDEX IF NOT EXISTS idx_records_namespace ON records(namespace, seq);
"#;

pub struct SqliteRecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRecordStore {
    pub async fn new(base_dir: PathBuf) -> Result<Self, String> {
        let db_path = base_dir.join("records.db");

        tokio::fs::create_dir_all(&base_dir)
            .await
            .map_err(|e| format!("Failed to create record store dir: {}", e))?;

        // Open database in blocking task
        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)
                .map_err(|e| format!("Failed to open SQLite database: {}", e))?;
            conn.execute_batch(SCHEMA)
                .map_err(|e| format!("Failed to run schema: {}", e))?;
            Ok::<_, String>(conn)
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    fn is_persistent(&self) -> bool {
        true
    }

    async fn append_record(&self, namespace: &str, id: &str, data: &[u8]) -> Result<(), String> {
        let conn = self.conn.clone();
        let namespace = namespace.to_string();
        let id = id.to_string();
        let data = data.to_vec();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let now = now_string();
            conn.execute(
                "INSERT INTO records (namespace, id, data, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(namespace, id) DO UPDATE SET
                     data = excluded.data,
                     updated_at = excluded.updated_at",
                params![namespace, id, data, now],
            )
            .map_err(|e| e.to_string())?;
            Ok(())
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))?
    }

    async fn list_record_ids(&self, namespace: &str) -> Result<Vec<String>, String> {
        let conn = self.conn.clone();
        let namespace = namespace.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn
                .prepare("SELECT id FROM records WHERE namespace = ?1 ORDER BY seq ASC")
                .map_err(|e| e.to_string())?;
            let ids = stmt
                .query_map(params![namespace], |row| row.get::<_, String>(0))
                .map_err(|e| e.to_string())?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| e.to_string())?;
            Ok(ids)
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))?
    }

    async fn load_record(&self, namespace: &str, id: &str) -> Result<Option<Vec<u8>>, String> {
        let conn = self.conn.clone();
        let namespace = namespace.to_string();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.query_row(
                "SELECT data FROM records WHERE namespace = ?1 AND id = ?2",
                params![namespace, id],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()
            .map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))?
    }

    async fn remove_record(&self, namespace: &str, id: &str) -> Result<bool, String> {
        let conn = self.conn.clone();
        let namespace = namespace.to_string();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let removed = conn
                .execute(
                    "DELETE FROM records WHERE namespace = ?1 AND id = ?2",
                    params![namespace, id],
                )
                .map_err(|e| e.to_string())?;
            Ok(removed > 0)
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))?
    }

    /// Single transaction: the record is never visible in zero namespaces.
    async fn move_record(&self, from: &str, to: &str, id: &str) -> Result<bool, String> {
        let conn = self.conn.clone();
        let from = from.to_string();
        let to = to.to_string();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            let tx = conn.transaction().map_err(|e| e.to_string())?;
            let data: Option<Vec<u8>> = tx
                .query_row(
                    "SELECT data FROM records WHERE namespace = ?1 AND id = ?2",
                    params![from, id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| e.to_string())?;
            let Some(data) = data else {
                return Ok(false);
            };
            let now = now_string();
            tx.execute(
                "INSERT INTO records (namespace, id, data, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(namespace, id) DO UPDATE SET
                     data = excluded.data,
                     updated_at = excluded.updated_at",
                params![to, id, data, now],
            )
            .map_err(|e| e.to_string())?;
            tx.execute(
                "DELETE FROM records WHERE namespace = ?1 AND id = ?2",
                params![from, id],
            )
            .map_err(|e| e.to_string())?;
            tx.commit().map_err(|e| e.to_string())?;
            Ok(true)
        })
        .await
        .map_err(|e| format!("Task join error: {}", e))?
    }
}
