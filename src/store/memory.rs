//! In-memory record store (non-persistent).

use super::RecordStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Records of one namespace in creation order.
type Namespace = Vec<(String, Vec<u8>)>;

#[derive(Clone, Default)]
pub struct InMemoryRecordStore {
    namespaces: Arc<RwLock<HashMap<String, Namespace>>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    fn is_persistent(&self) -> bool {
        false
    }

    async fn append_record(&self, namespace: &str, id: &str, data: &[u8]) -> Result<(), String> {
        let mut namespaces = self.namespaces.write().await;
        let records = namespaces.entry(namespace.to_string()).or_default();
        match records.iter_mut().find(|(existing, _)| existing == id) {
            Some((_, bytes)) => *bytes = data.to_vec(),
            None => records.push((id.to_string(), data.to_vec())),
        }
        Ok(())
    }

    async fn list_record_ids(&self, namespace: &str) -> Result<Vec<String>, String> {
        Ok(self
            .namespaces
            .read()
            .await
            .get(namespace)
            .map(|records| records.iter().map(|(id, _)| id.clone()).collect())
            .unwrap_or_default())
    }

    async fn load_record(&self, namespace: &str, id: &str) -> Result<Option<Vec<u8>>, String> {
        Ok(self.namespaces.read().await.get(namespace).and_then(|records| {
            records
                .iter()
                .find(|(existing, _)| existing == id)
                .map(|(_, bytes)| bytes.clone())
        }))
    }

    async fn remove_record(&self, namespace: &str, id: &str) -> Result<bool, String> {
        let mut namespaces = self.namespaces.write().await;
        let Some(records) = namespaces.get_mut(namespace) else {
            return Ok(false);
        };
        let before = records.len();
        records.retain(|(existing, _)| existing != id);
        Ok(records.len() != before)
    }
}
