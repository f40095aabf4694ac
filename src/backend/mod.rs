//! Backend providers: chain queries, raw transaction fetch and broadcast.

mod bitbus;
mod error;
mod insight;
pub mod registry;

pub use bitbus::BitbusBackend;
pub use error::{classify_http_status, classify_rejection, BackendError, BackendErrorKind};
pub use insight::InsightBackend;
pub use registry::BackendDirectory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::tx::Coin;

/// On-chain record carrying a content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub txid: String,
    /// Protocol prefix of the record (content or index)
    pub tag: String,
    pub mime: String,
}

/// On-chain pointer record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    pub txid: String,
    pub key: String,
    pub value: String,
    pub sequence: String,
    /// Block height, `None` while unconfirmed
    pub height: Option<u64>,
}

/// Sort key records latest first: height descending (unconfirmed newest),
/// then sequence descending.
pub fn sort_latest_first(records: &mut [KeyRecord]) {
    records.sort_by(|a, b| {
        let height = |r: &KeyRecord| r.height.unwrap_or(u64::MAX);
        let sequence = |r: &KeyRecord| r.sequence.parse::<u64>().unwrap_or(0);
        height(b)
            .cmp(&height(a))
            .then_with(|| sequence(b).cmp(&sequence(a)))
            .then_with(|| b.sequence.cmp(&a.sequence))
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Unknown,
    InMempool,
    Confirmed { height: u64 },
}

impl TxStatus {
    /// Whether the network already has the transaction.
    pub fn is_known(&self) -> bool {
        !matches!(self, TxStatus::Unknown)
    }
}

/// A chain data provider.
///
/// Providers implement the subset of operations they offer; the rest return
/// `Unsupported` so the [`BackendDirectory`] moves on to the next provider.
#[async_trait]
pub trait Backend: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;

    async fn find_by_content_hash(
        &self,
        _sha1: &str,
        _mime: &str,
    ) -> Result<Vec<ContentRecord>, BackendError> {
        Err(BackendError::unsupported(self.name(), "content lookup"))
    }

    /// Pointer records owned by `owner`, optionally restricted to one key,
    /// latest first.
    async fn find_by_key(
        &self,
        _key: Option<&str>,
        _owner: &str,
    ) -> Result<Vec<KeyRecord>, BackendError> {
        Err(BackendError::unsupported(self.name(), "key lookup"))
    }

    /// Raw transaction bytes, `None` when the provider has never seen it.
    async fn fetch_raw_transaction(&self, _txid: &str) -> Result<Option<Vec<u8>>, BackendError> {
        Err(BackendError::unsupported(self.name(), "transaction fetch"))
    }

    /// Submit a raw transaction, returning its identifier.
    async fn submit_transaction(&self, _raw: &[u8]) -> Result<String, BackendError> {
        Err(BackendError::unsupported(self.name(), "broadcast"))
    }

    async fn list_spendable_coins(&self, _address: &str) -> Result<Vec<Coin>, BackendError> {
        Err(BackendError::unsupported(self.name(), "coin listing"))
    }

    async fn transaction_status(&self, _txid: &str) -> Result<TxStatus, BackendError> {
        Err(BackendError::unsupported(self.name(), "status lookup"))
    }
}
