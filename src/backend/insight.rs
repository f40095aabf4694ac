//! Insight-style REST provider (MatterCloud and compatible explorers).
//!
//! Offers raw transaction fetch, broadcast, coin listing and status lookup.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use super::{Backend, BackendError, TxStatus};
use crate::tx::Coin;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct InsightBackend {
    client: Client,
    id: String,
    base: String,
}

#[derive(Debug, Deserialize)]
struct RawTxResponse {
    rawtx: String,
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    rawtx: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    txid: String,
}

#[derive(Debug, Deserialize)]
struct UtxoEntry {
    txid: String,
    vout: u32,
    satoshis: u64,
}

#[derive(Debug, Deserialize)]
struct TxInfo {
    #[serde(default)]
    confirmations: u64,
    #[serde(default)]
    blockheight: Option<i64>,
}

impl InsightBackend {
    /// Create a provider rooted at `base` (e.g. `https://api.mattercloud.net`).
    pub fn new(base: &str) -> Result<Self, BackendError> {
        let url = Url::parse(base)
            .map_err(|e| BackendError::invalid_response(format!("Invalid base URL {}: {}", base, e)))?;
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BackendError::unavailable(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            id: format!("insight:{}", url.host_str().unwrap_or("local")),
            base: url.as_str().trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/{}", self.base, path)
    }

    fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
        headers
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
    }

    /// GET `path`, returning `None` on 404.
    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
    ) -> Result<Option<T>, BackendError> {
        let response = self
            .client
            .get(self.endpoint(path))
            .send()
            .await
            .map_err(|e| BackendError::from_transport(&e))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let retry_after = Self::retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(BackendError::from_response(status.as_u16(), &body, retry_after));
        }
        serde_json::from_str(&body).map(Some).map_err(|e| {
            BackendError::invalid_response(format!("Failed to parse {}: {}", path, e))
        })
    }
}

#[async_trait]
impl Backend for InsightBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        "Insight"
    }

    async fn fetch_raw_transaction(&self, txid: &str) -> Result<Option<Vec<u8>>, BackendError> {
        let Some(response) = self
            .get_json::<RawTxResponse>(&format!("rawtx/{}", txid))
            .await?
        else {
            return Ok(None);
        };
        hex::decode(response.rawtx.trim())
            .map(Some)
            .map_err(|e| BackendError::invalid_response(format!("Invalid raw transaction hex: {}", e)))
    }

    async fn submit_transaction(&self, raw: &[u8]) -> Result<String, BackendError> {
        let rawtx = hex::encode(raw);
        let response = self
            .client
            .post(self.endpoint("tx/send"))
            .json(&SendRequest { rawtx: &rawtx })
            .send()
            .await
            .map_err(|e| BackendError::from_transport(&e))?;

        let status = response.status();
        let retry_after = Self::retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(BackendError::from_response(status.as_u16(), &body, retry_after));
        }
        let parsed: SendResponse = serde_json::from_str(&body).map_err(|e| {
            BackendError::invalid_response(format!("Failed to parse broadcast response: {}, body: {}", e, body))
        })?;
        Ok(parsed.txid)
    }

    async fn list_spendable_coins(&self, address: &str) -> Result<Vec<Coin>, BackendError> {
        let entries = self
            .get_json::<Vec<UtxoEntry>>(&format!("addr/{}/utxo", address))
            .await?
            .unwrap_or_default();
        Ok(entries
            .into_iter()
            .map(|u| Coin::new(u.txid, u.vout, u.satoshis))
            .collect())
    }

    async fn transaction_status(&self, txid: &str) -> Result<TxStatus, BackendError> {
        let info = self.get_json::<TxInfo>(&format!("tx/{}", txid)).await?;
        Ok(match info {
            None => TxStatus::Unknown,
            Some(info) if info.confirmations > 0 => TxStatus::Confirmed {
                height: info.blockheight.unwrap_or_default().max(0) as u64,
            },
            Some(_) => TxStatus::InMempool,
        })
    }
}
