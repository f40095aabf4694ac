//! Configuration management for upchain.
//!
//! Configuration can be set via environment variables:
//! - `UPCHAIN_DATA_DIR` - Optional. Record store location. Defaults to `.bsv`.
//! - `UPCHAIN_STORE` - Optional. `file`, `sqlite` or `memory`. Defaults to `file`.
//! - `UPCHAIN_BROADCAST_URLS` - Optional. Comma-separated Insight-style base URLs, tried in order.
//!   Defaults to `https://api.mattercloud.net`.
//! - `UPCHAIN_QUERY_URL` - Optional. BitBus-style query endpoint. Defaults to `https://txo.bitbus.network/block`.
//! - `UPCHAIN_QUERY_TOKEN` - Optional. Token for the query endpoint.
//! - `UPCHAIN_RETRY_SECS` - Optional. Seconds between broadcast passes. Defaults to `60`.
//! - `UPCHAIN_MAX_PASSES` - Optional. Broadcast passes before the binary gives up. Defaults to `30`.
//! - `UPCHAIN_QUICK` - Optional. Skip on-chain dedup lookups.
//! - `UPCHAIN_CHUNK_SIZE` - Optional. Largest single-transaction payload. Defaults to `64000`.
//! - `UPCHAIN_FEE_PER_KB` - Optional. Task fee rate. Defaults to `1000`.
//! - `UPCHAIN_SPLIT_FEE_PER_KB` - Optional. Funding-split fee rate. Defaults to `1536`.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::backend::{BackendDirectory, BitbusBackend, InsightBackend};
use crate::funding::FeePolicy;
use crate::store::RecordStoreType;
use crate::task::UploadParams;
use crate::util::parse_bool;

pub const DEFAULT_BROADCAST_URL: &str = "https://api.mattercloud.net";
pub const DEFAULT_QUERY_URL: &str = "https://txo.bitbus.network/block";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the record store
    pub data_dir: PathBuf,

    pub store_type: RecordStoreType,

    /// Ranked broadcast providers
    pub broadcast_urls: Vec<String>,

    pub query_url: String,
    pub query_token: Option<String>,

    /// Wait between broadcast passes
    pub retry_interval: Duration,

    /// Broadcast passes the binary runs before giving up
    pub max_passes: usize,

    pub upload: UploadParams,
    pub fees: FeePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".bsv"),
            store_type: RecordStoreType::default(),
            broadcast_urls: vec![DEFAULT_BROADCAST_URL.to_string()],
            query_url: DEFAULT_QUERY_URL.to_string(),
            query_token: None,
            retry_interval: Duration::from_secs(60),
            max_passes: 30,
            upload: UploadParams::default(),
            fees: FeePolicy::default(),
        }
    }
}

fn parse_var<T>(name: &str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        None => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for unparseable numbers, an unknown
    /// store type or an empty broadcast list.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup` instead of the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let data_dir = lookup("UPCHAIN_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let store_type = match lookup("UPCHAIN_STORE") {
            Some(value) => RecordStoreType::from_str(&value).ok_or_else(|| {
                ConfigError::InvalidValue("UPCHAIN_STORE".to_string(), value.clone())
            })?,
            None => defaults.store_type,
        };

        let broadcast_urls = match lookup("UPCHAIN_BROADCAST_URLS") {
            Some(value) => {
                let urls: Vec<String> = value
                    .split(',')
                    .map(str::trim)
                    .filter(|u| !u.is_empty())
                    .map(str::to_string)
                    .collect();
                if urls.is_empty() {
                    return Err(ConfigError::InvalidValue(
                        "UPCHAIN_BROADCAST_URLS".to_string(),
                        "no URLs given".to_string(),
                    ));
                }
                urls
            }
            None => defaults.broadcast_urls,
        };

        let query_url = lookup("UPCHAIN_QUERY_URL").unwrap_or(defaults.query_url);
        let query_token = lookup("UPCHAIN_QUERY_TOKEN").filter(|t| !t.is_empty());

        let retry_secs = parse_var(
            "UPCHAIN_RETRY_SECS",
            lookup("UPCHAIN_RETRY_SECS"),
            defaults.retry_interval.as_secs(),
        )?;
        let max_passes = parse_var(
            "UPCHAIN_MAX_PASSES",
            lookup("UPCHAIN_MAX_PASSES"),
            defaults.max_passes,
        )?;

        let chunk_size: usize = parse_var(
            "UPCHAIN_CHUNK_SIZE",
            lookup("UPCHAIN_CHUNK_SIZE"),
            defaults.upload.chunk_size,
        )?;
        if chunk_size == 0 {
            return Err(ConfigError::InvalidValue(
                "UPCHAIN_CHUNK_SIZE".to_string(),
                "must be positive".to_string(),
            ));
        }
        let upload = UploadParams {
            chunk_size,
            quick: lookup("UPCHAIN_QUICK")
                .map(|v| parse_bool(&v))
                .unwrap_or(defaults.upload.quick),
        };

        let fees = FeePolicy {
            fee_per_kb: parse_var(
                "UPCHAIN_FEE_PER_KB",
                lookup("UPCHAIN_FEE_PER_KB"),
                defaults.fees.fee_per_kb,
            )?,
            split_fee_per_kb: parse_var(
                "UPCHAIN_SPLIT_FEE_PER_KB",
                lookup("UPCHAIN_SPLIT_FEE_PER_KB"),
                defaults.fees.split_fee_per_kb,
            )?,
            ..defaults.fees
        };

        Ok(Self {
            data_dir,
            store_type,
            broadcast_urls,
            query_url,
            query_token,
            retry_interval: Duration::from_secs(retry_secs),
            max_passes,
            upload,
            fees,
        })
    }

    /// Broadcast providers in configured order, then the query provider.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for a broadcast URL that does not parse.
    pub fn backend_directory(&self) -> Result<BackendDirectory, ConfigError> {
        let mut directory = BackendDirectory::new();
        for url in &self.broadcast_urls {
            let backend = InsightBackend::new(url).map_err(|e| {
                ConfigError::InvalidValue("UPCHAIN_BROADCAST_URLS".to_string(), e.message)
            })?;
            directory.register(Arc::new(backend));
        }
        directory.register(Arc::new(BitbusBackend::new(
            self.query_url.clone(),
            self.query_token.clone(),
        )));
        Ok(directory)
    }
}
