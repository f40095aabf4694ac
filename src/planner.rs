//! Content planning: decide per file whether to upload, repoint or skip.
//!
//! A file is skipped only when byte-identical content already exists on
//! chain *and* the owner's latest pointer record for its key names it.

use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backend::{BackendDirectory, BackendErrorKind, KeyRecord};
use crate::error::UploadError;
use crate::protocol::{decode_record, DataRecord};
use crate::store::{RecordStore, OBJECTS, TX};
use crate::task::{ContentPlan, FileEntry, PlanItem, UploadParams};
use crate::tx::Transaction;
use crate::util::{encode_key, sha1_hex};

/// Cached result of a content lookup, stored under the content's sha1.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ObjectRecord {
    txid: String,
    mime: String,
}

/// Pointer records of one owner, fetched at most once per planning run.
#[derive(Debug, Default)]
pub struct KeyRecordCache {
    records: Option<Vec<KeyRecord>>,
}

impl KeyRecordCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest record for `key`, loading the owner's records on first use.
    pub async fn latest(
        &mut self,
        backends: &BackendDirectory,
        owner: &str,
        key: &str,
    ) -> Result<Option<&KeyRecord>, UploadError> {
        if self.records.is_none() {
            let records = backends.find_by_key(None, owner).await?;
            debug!(owner, count = records.len(), "Loaded pointer records");
            self.records = Some(records);
        }
        Ok(self
            .records
            .as_ref()
            .and_then(|records| records.iter().find(|r| r.key == key)))
    }
}

pub struct Planner<'a> {
    backends: &'a BackendDirectory,
    store: &'a dyn RecordStore,
    owner: String,
    params: &'a UploadParams,
    cache: KeyRecordCache,
}

impl<'a> Planner<'a> {
    pub fn new(
        backends: &'a BackendDirectory,
        store: &'a dyn RecordStore,
        owner: impl Into<String>,
        params: &'a UploadParams,
    ) -> Self {
        Self {
            backends,
            store,
            owner: owner.into(),
            params,
            cache: KeyRecordCache::new(),
        }
    }

    /// Build a content plan for `files`.
    ///
    /// # Postconditions
    /// - One plan item per file, keys URI-encoded per path segment
    /// - In quick mode every file is an upload and no backend is queried
    pub async fn plan(&mut self, files: Vec<FileEntry>) -> Result<ContentPlan, UploadError> {
        let mut items = Vec::with_capacity(files.len());
        for file in files {
            let key = encode_key(&file.key);
            if self.params.quick {
                items.push(PlanItem::Upload {
                    key,
                    data: file.data,
                    mime: file.mime,
                });
                continue;
            }

            let sha1 = sha1_hex(&file.data);
            let existing = self.find_existing(&sha1, &file.data, &file.mime).await?;
            let item = match existing {
                None => PlanItem::Upload {
                    key,
                    data: file.data,
                    mime: file.mime,
                },
                Some(identifier) => {
                    let latest = self
                        .cache
                        .latest(self.backends, &self.owner, &key)
                        .await?
                        .map(|r| r.value.clone());
                    if latest.as_deref() == Some(identifier.as_str()) {
                        PlanItem::Unchanged { key, identifier }
                    } else {
                        PlanItem::Repoint { key, identifier }
                    }
                }
            };
            debug!(key = item.key(), ?sha1, "Planned file");
            items.push(item);
        }

        let uploads = items
            .iter()
            .filter(|i| matches!(i, PlanItem::Upload { .. }))
            .count();
        info!(files = items.len(), uploads, "Content plan ready");
        Ok(ContentPlan::new(items))
    }

    /// Identifier of an on-chain record holding exactly `data`.
    async fn find_existing(
        &self,
        sha1: &str,
        data: &[u8],
        mime: &str,
    ) -> Result<Option<String>, UploadError> {
        if let Some(cached) = self.cached_object(sha1).await? {
            if cached.mime == mime {
                debug!(sha1, txid = %cached.txid, "Content found in object cache");
                return Ok(Some(cached.txid));
            }
        }

        let candidates = match self.backends.find_by_content_hash(sha1, mime).await {
            Ok(records) => records,
            Err(err) if err.kind == BackendErrorKind::Unsupported => {
                warn!(sha1, "No backend offers content lookup; uploading without dedup");
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };

        // Race candidate fetches; the first byte-identical match wins.
        let mut races: FuturesUnordered<_> = candidates
            .iter()
            .filter(|c| c.mime == mime)
            .map(|c| async move { (c.txid.clone(), self.fetch_content(&c.txid).await) })
            .collect();
        while let Some((txid, result)) = races.next().await {
            match result {
                Ok(Some(bytes)) if bytes == data => {
                    self.remember_object(sha1, &txid, mime).await?;
                    return Ok(Some(txid));
                }
                Ok(_) => debug!(%txid, "Candidate content differs"),
                Err(err) => debug!(%txid, error = %err, "Candidate fetch failed"),
            }
        }
        Ok(None)
    }

    async fn cached_object(&self, sha1: &str) -> Result<Option<ObjectRecord>, UploadError> {
        let Some(bytes) = self
            .store
            .load_record(OBJECTS, sha1)
            .await
            .map_err(UploadError::Store)?
        else {
            return Ok(None);
        };
        match serde_json::from_slice(&bytes) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(sha1, "Ignoring unreadable object record: {}", e);
                Ok(None)
            }
        }
    }

    async fn remember_object(&self, sha1: &str, txid: &str, mime: &str) -> Result<(), UploadError> {
        let record = ObjectRecord {
            txid: txid.to_string(),
            mime: mime.to_string(),
        };
        let bytes = serde_json::to_vec(&record).map_err(|e| UploadError::Store(e.to_string()))?;
        self.store
            .append_record(OBJECTS, sha1, &bytes)
            .await
            .map_err(UploadError::Store)
    }

    /// Payload of a content or index record; index chunks are concatenated in order.
    pub async fn fetch_content(&self, txid: &str) -> Result<Option<Vec<u8>>, UploadError> {
        let Some(tx) = self.fetch_transaction(txid).await? else {
            return Ok(None);
        };
        match decode_record(&tx) {
            Ok(DataRecord::Content { data, .. }) => Ok(Some(data)),
            Ok(DataRecord::Index { chunks, .. }) => {
                let mut data = Vec::new();
                for chunk_id in chunks {
                    let chunk = self.fetch_transaction(&chunk_id).await?;
                    match chunk.as_ref().map(decode_record) {
                        Some(Ok(DataRecord::Chunk { data: piece })) => data.extend(piece),
                        _ => return Ok(None),
                    }
                }
                Ok(Some(data))
            }
            Ok(_) | Err(_) => Ok(None),
        }
    }

    /// Transaction by id, from the `tx` cache or the backends (then cached).
    pub async fn fetch_transaction(&self, txid: &str) -> Result<Option<Transaction>, UploadError> {
        let cached = self.store.load_record(TX, txid).await.map_err(UploadError::Store)?;
        let raw = match cached {
            Some(raw) => raw,
            None => {
                let Some(raw) = self.backends.fetch_raw_transaction(txid).await? else {
                    return Ok(None);
                };
                self.store
                    .append_record(TX, txid, &raw)
                    .await
                    .map_err(UploadError::Store)?;
                raw
            }
        };
        Transaction::parse(&raw)
            .map(Some)
            .map_err(|e| UploadError::CorruptRecord {
                namespace: TX,
                id: txid.to_string(),
                reason: e.to_string(),
            })
    }
}
