//! BitBus-style query provider.
//!
//! Answers content-hash and pointer lookups by posting a Mongo-style query and
//! reading newline-delimited JSON. Every lookup runs twice: once for the
//! legacy `OP_RETURN <prefix>` layout (prefix at `s1`) and once for the
//! `OP_FALSE OP_RETURN <prefix>` layout (prefix at `s2`).

use std::collections::HashSet;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{sort_latest_first, Backend, BackendError, ContentRecord, KeyRecord};
use crate::protocol::{CONTENT_PREFIX, INDEX_PREFIX, POINTER_PREFIX};

/// Push offsets of the prefix: legacy layout, then data-carrier layout.
const PREFIX_OFFSETS: [usize; 2] = [1, 2];

pub struct BitbusBackend {
    client: Client,
    url: String,
    token: Option<String>,
}

impl BitbusBackend {
    pub fn new(url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            token,
        }
    }

    async fn query(&self, query: &Value) -> Result<Vec<Value>, BackendError> {
        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(query);
        if let Some(token) = &self.token {
            request = request.header("token", token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| BackendError::from_transport(&e))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(BackendError::from_response(status.as_u16(), &body, None));
        }
        parse_ndjson(&body)
    }
}

fn content_query(sha1: &str, offset: usize) -> Value {
    let mut find = serde_json::Map::new();
    find.insert(format!("out.s{}", offset + 4), json!(sha1));
    let mut project = serde_json::Map::new();
    project.insert("tx.h".to_string(), json!(1));
    project.insert(format!("out.s{}", offset), json!(1));
    project.insert(format!("out.s{}", offset + 2), json!(1));
    json!({ "v": 3, "q": { "find": find, "project": project } })
}

fn key_query(key: Option<&str>, owner: &str, offset: usize) -> Value {
    let mut find = serde_json::Map::new();
    find.insert("in.e.a".to_string(), json!(owner));
    find.insert(format!("out.s{}", offset), json!(POINTER_PREFIX));
    if let Some(key) = key {
        find.insert(format!("out.s{}", offset + 1), json!(key));
    }
    let mut project = serde_json::Map::new();
    project.insert("tx.h".to_string(), json!(1));
    project.insert("blk.i".to_string(), json!(1));
    for field in offset..=offset + 4 {
        project.insert(format!("out.s{}", field), json!(1));
    }
    json!({ "v": 3, "q": { "find": find, "project": project } })
}

fn parse_ndjson(body: &str) -> Result<Vec<Value>, BackendError> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            serde_json::from_str(line)
                .map_err(|e| BackendError::invalid_response(format!("Invalid query row: {}", e)))
        })
        .collect()
}

fn push_text<'a>(out: &'a Value, idx: usize) -> Option<&'a str> {
    out.get(format!("s{}", idx)).and_then(Value::as_str)
}

fn content_record(row: &Value, offset: usize) -> Option<ContentRecord> {
    let txid = row.pointer("/tx/h")?.as_str()?;
    row.get("out")?.as_array()?.iter().find_map(|out| {
        let tag = push_text(out, offset)?;
        if tag != CONTENT_PREFIX && tag != INDEX_PREFIX {
            return None;
        }
        Some(ContentRecord {
            txid: txid.to_string(),
            tag: tag.to_string(),
            mime: push_text(out, offset + 2).unwrap_or_default().to_string(),
        })
    })
}

fn key_record(row: &Value, offset: usize) -> Option<KeyRecord> {
    let txid = row.pointer("/tx/h")?.as_str()?;
    let height = row.pointer("/blk/i").and_then(Value::as_u64);
    row.get("out")?.as_array()?.iter().find_map(|out| {
        if push_text(out, offset)? != POINTER_PREFIX {
            return None;
        }
        Some(KeyRecord {
            txid: txid.to_string(),
            key: push_text(out, offset + 1)?.to_string(),
            value: push_text(out, offset + 2).unwrap_or_default().to_string(),
            sequence: push_text(out, offset + 4).unwrap_or_default().to_string(),
            height,
        })
    })
}

#[async_trait]
impl Backend for BitbusBackend {
    fn id(&self) -> &str {
        "bitbus"
    }

    fn name(&self) -> &str {
        "BitBus"
    }

    async fn find_by_content_hash(
        &self,
        sha1: &str,
        mime: &str,
    ) -> Result<Vec<ContentRecord>, BackendError> {
        let mut seen = HashSet::new();
        let mut records = Vec::new();
        for offset in PREFIX_OFFSETS {
            for row in self.query(&content_query(sha1, offset)).await? {
                if let Some(record) = content_record(&row, offset) {
                    if record.mime == mime && seen.insert(record.txid.clone()) {
                        records.push(record);
                    }
                }
            }
        }
        Ok(records)
    }

    async fn find_by_key(
        &self,
        key: Option<&str>,
        owner: &str,
    ) -> Result<Vec<KeyRecord>, BackendError> {
        let mut seen = HashSet::new();
        let mut records = Vec::new();
        for offset in PREFIX_OFFSETS {
            for row in self.query(&key_query(key, owner, offset)).await? {
                if let Some(record) = key_record(&row, offset) {
                    if seen.insert(record.txid.clone()) {
                        records.push(record);
                    }
                }
            }
        }
        sort_latest_first(&mut records);
        Ok(records)
    }
}
