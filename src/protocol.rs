//! On-chain payload layouts.
//!
//! Every task writes exactly one `OP_FALSE OP_RETURN` output:
//!
//! ```text
//! Content       [B, data, mime, encoding, sha1]
//! ContentChunk  [BcatPart, data]
//! ContentIndex  [Bcat, info, mime, encoding, sha1, flag, txid bytes...]
//! PointerRecord [D, key, value, type, sequence]
//! ```

use crate::tx::script::{data_pushes, safe_data_out};
use crate::tx::Transaction;

pub const CONTENT_PREFIX: &str = "19HxigV4QyBv3tHpQVcUEQyq1pzZVdoAut";
pub const INDEX_PREFIX: &str = "15DHFxWZJT58f9nhyGnsRBqrgwK4W6h4Up";
pub const CHUNK_PREFIX: &str = "1ChDHzdd1H4wSjgGMHyndZm6qxEDGjqpJL";
pub const POINTER_PREFIX: &str = "19iG3WTYSsbyos3uJ733yK4zEioi1FesNU";

pub const ENCODING: &str = "binary";
pub const INDEX_INFO: &str = "upchain";
pub const INDEX_FLAG: u8 = 0x00;
pub const POINTER_TYPE: &str = "b";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Transaction carries no data output")]
    NotDataTransaction,

    #[error("Unknown data prefix {0}")]
    UnknownPrefix(String),

    #[error("Malformed {kind} record: {reason}")]
    Malformed { kind: &'static str, reason: String },

    #[error("Invalid chunk identifier {0}")]
    InvalidChunkId(String),
}

pub fn content_script(data: &[u8], mime: &str, filename: &str) -> Vec<u8> {
    safe_data_out([
        CONTENT_PREFIX.as_bytes(),
        data,
        mime.as_bytes(),
        ENCODING.as_bytes(),
        filename.as_bytes(),
    ])
}

pub fn chunk_script(data: &[u8]) -> Vec<u8> {
    safe_data_out([CHUNK_PREFIX.as_bytes(), data])
}

pub fn index_script(
    mime: &str,
    filename: &str,
    chunk_ids: &[String],
) -> Result<Vec<u8>, ProtocolError> {
    let mut fields: Vec<Vec<u8>> = vec![
        INDEX_PREFIX.as_bytes().to_vec(),
        INDEX_INFO.as_bytes().to_vec(),
        mime.as_bytes().to_vec(),
        ENCODING.as_bytes().to_vec(),
        filename.as_bytes().to_vec(),
        vec![INDEX_FLAG],
    ];
    for id in chunk_ids {
        let bytes = hex::decode(id).map_err(|_| ProtocolError::InvalidChunkId(id.clone()))?;
        if bytes.len() != 32 {
            return Err(ProtocolError::InvalidChunkId(id.clone()));
        }
        fields.push(bytes);
    }
    Ok(safe_data_out(fields))
}

pub fn pointer_script(key: &str, value: &str, sequence: &str) -> Vec<u8> {
    safe_data_out([
        POINTER_PREFIX.as_bytes(),
        key.as_bytes(),
        value.as_bytes(),
        POINTER_TYPE.as_bytes(),
        sequence.as_bytes(),
    ])
}

/// A decoded data record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataRecord {
    Content { data: Vec<u8>, mime: String },
    Index { mime: String, chunks: Vec<String> },
    Chunk { data: Vec<u8> },
    Pointer { key: String, value: String, sequence: String },
}

/// Decode the first data output of `tx`.
pub fn decode_record(tx: &Transaction) -> Result<DataRecord, ProtocolError> {
    let pushes = tx
        .outputs
        .iter()
        .find_map(|out| data_pushes(&out.script))
        .ok_or(ProtocolError::NotDataTransaction)?;

    let prefix = pushes
        .first()
        .map(|p| String::from_utf8_lossy(p).into_owned())
        .ok_or(ProtocolError::NotDataTransaction)?;

    match prefix.as_str() {
        CONTENT_PREFIX => Ok(DataRecord::Content {
            data: field(&pushes, "content", 1)?.to_vec(),
            mime: text(field(&pushes, "content", 2)?),
        }),
        CHUNK_PREFIX => Ok(DataRecord::Chunk {
            data: field(&pushes, "chunk", 1)?.to_vec(),
        }),
        INDEX_PREFIX => {
            let mime = text(field(&pushes, "index", 2)?);
            field(&pushes, "index", 5)?;
            let chunks = pushes[6..].iter().map(hex::encode).collect::<Vec<_>>();
            if chunks.is_empty() {
                return Err(ProtocolError::Malformed {
                    kind: "index",
                    reason: "no chunks".to_string(),
                });
            }
            Ok(DataRecord::Index { mime, chunks })
        }
        POINTER_PREFIX => Ok(DataRecord::Pointer {
            key: text(field(&pushes, "pointer", 1)?),
            value: text(field(&pushes, "pointer", 2)?),
            sequence: pushes.get(4).map(|p| text(p)).unwrap_or_default(),
        }),
        other => Err(ProtocolError::UnknownPrefix(other.to_string())),
    }
}

fn field<'a>(
    pushes: &'a [Vec<u8>],
    kind: &'static str,
    idx: usize,
) -> Result<&'a [u8], ProtocolError> {
    pushes
        .get(idx)
        .map(Vec::as_slice)
        .ok_or_else(|| ProtocolError::Malformed {
            kind,
            reason: format!("missing field {}", idx),
        })
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
