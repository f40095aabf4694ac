use std::sync::Arc;

use tracing::debug;

use super::{Backend, BackendError, BackendErrorKind, ContentRecord, KeyRecord, TxStatus};
use crate::tx::Coin;

#[derive(Debug, Clone)]
pub struct BackendInfo {
    pub id: String,
    pub name: String,
}

/// Try each provider in rank order, moving on only when the error says so.
macro_rules! ranked {
    ($self:ident, $op:literal, |$backend:ident| $call:expr) => {{
        let mut last = None;
        for $backend in &$self.backends {
            match $call.await {
                Err(err) if err.kind.should_fallback() => {
                    debug!(backend = $backend.id(), operation = $op, error = %err, "Falling back");
                    // an outage outranks "unsupported" from a later provider
                    last = match last {
                        Some(prev) if err.kind == BackendErrorKind::Unsupported => Some(prev),
                        _ => Some(err),
                    };
                }
                other => return other,
            }
        }
        Err($self.exhausted($op, last))
    }};
}

/// Ranked list of providers behind one capability interface.
///
/// # Fallback Policy
/// Only `Unavailable` and `Unsupported` move on to the next provider. Any
/// classified answer (success, already known, missing inputs, rejection)
/// is final.
#[derive(Clone, Default)]
pub struct BackendDirectory {
    backends: Vec<Arc<dyn Backend>>,
}

impl BackendDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a provider at the lowest rank.
    pub fn register(&mut self, backend: Arc<dyn Backend>) {
        self.backends.push(backend);
    }

    pub fn with(mut self, backend: Arc<dyn Backend>) -> Self {
        self.register(backend);
        self
    }

    pub fn list(&self) -> Vec<BackendInfo> {
        self.backends
            .iter()
            .map(|backend| BackendInfo {
                id: backend.id().to_string(),
                name: backend.name().to_string(),
            })
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Backend>> {
        self.backends.iter().find(|b| b.id() == id).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    fn exhausted(&self, operation: &str, last: Option<BackendError>) -> BackendError {
        last.unwrap_or_else(|| {
            BackendError::unavailable(format!("No backend configured for {}", operation))
        })
    }

    pub async fn find_by_content_hash(
        &self,
        sha1: &str,
        mime: &str,
    ) -> Result<Vec<ContentRecord>, BackendError> {
        ranked!(self, "content lookup", |b| b.find_by_content_hash(sha1, mime))
    }

    pub async fn find_by_key(
        &self,
        key: Option<&str>,
        owner: &str,
    ) -> Result<Vec<KeyRecord>, BackendError> {
        ranked!(self, "key lookup", |b| b.find_by_key(key, owner))
    }

    pub async fn fetch_raw_transaction(&self, txid: &str) -> Result<Option<Vec<u8>>, BackendError> {
        ranked!(self, "transaction fetch", |b| b.fetch_raw_transaction(txid))
    }

    pub async fn submit_transaction(&self, raw: &[u8]) -> Result<String, BackendError> {
        ranked!(self, "broadcast", |b| b.submit_transaction(raw))
    }

    pub async fn list_spendable_coins(&self, address: &str) -> Result<Vec<Coin>, BackendError> {
        ranked!(self, "coin listing", |b| b.list_spendable_coins(address))
    }

    pub async fn transaction_status(&self, txid: &str) -> Result<TxStatus, BackendError> {
        ranked!(self, "status lookup", |b| b.transaction_status(txid))
    }
}
