//! Minimal transaction value model.
//!
//! Only what the engine needs to reason about funding and size: outpoints,
//! inputs that remember the value they spend, outputs, the standard wire
//! serialization and the double-SHA256 identifier. Script construction for
//! spending keys and signature creation live behind the [`Signer`] traits.
//!
//! # Invariants
//! - `TxIn::value` is never serialized; it is only known for transactions
//!   built in this process (parsed transactions report `0`).
//! - `txid()` is the byte-reversed hex of `sha256(sha256(serialize()))`.

pub mod script;
mod signer;

pub use signer::{ExternalSigner, SignError, Signer};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Default input sequence (final).
pub const SEQUENCE_FINAL: u32 = 0xffff_ffff;

/// Reference to a spendable output of a prior transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    /// Display (big-endian hex) transaction identifier
    pub txid: String,
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: impl Into<String>, vout: u32) -> Self {
        Self {
            txid: txid.into(),
            vout,
        }
    }
}

impl std::fmt::Display for OutPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

/// A spendable coin as reported by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub outpoint: OutPoint,
    pub value: u64,
}

impl Coin {
    pub fn new(txid: impl Into<String>, vout: u32, value: u64) -> Self {
        Self {
            outpoint: OutPoint::new(txid, vout),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxIn {
    pub prevout: OutPoint,
    /// Value of the spent output (not part of the wire format)
    pub value: u64,
    /// Authorization (unlocking script); empty until signed
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

impl TxIn {
    pub fn spending(coin: &Coin) -> Self {
        Self {
            prevout: coin.outpoint.clone(),
            value: coin.value,
            script_sig: Vec::new(),
            sequence: SEQUENCE_FINAL,
        }
    }

    pub fn is_signed(&self) -> bool {
        !self.script_sig.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOut {
    pub value: u64,
    pub script: Vec<u8>,
}

impl TxOut {
    pub fn new(value: u64, script: Vec<u8>) -> Self {
        Self { value, script }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl Transaction {
    pub fn new() -> Self {
        Self {
            version: 1,
            inputs: Vec::new(),
            outputs: Vec::new(),
            lock_time: 0,
        }
    }

    pub fn input_amount(&self) -> u64 {
        self.inputs.iter().map(|i| i.value).sum()
    }

    pub fn output_amount(&self) -> u64 {
        self.outputs.iter().map(|o| o.value).sum()
    }

    /// Fee paid, or `None` when outputs exceed inputs.
    pub fn fee(&self) -> Option<u64> {
        self.input_amount().checked_sub(self.output_amount())
    }

    pub fn is_fully_signed(&self) -> bool {
        !self.inputs.is_empty() && self.inputs.iter().all(TxIn::is_signed)
    }

    /// Wire serialization.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.estimated_len());
        buf.extend_from_slice(&self.version.to_le_bytes());
        write_varint(&mut buf, self.inputs.len() as u64);
        for input in &self.inputs {
            buf.extend_from_slice(&txid_to_wire(&input.prevout.txid));
            buf.extend_from_slice(&input.prevout.vout.to_le_bytes());
            write_varint(&mut buf, input.script_sig.len() as u64);
            buf.extend_from_slice(&input.script_sig);
            buf.extend_from_slice(&input.sequence.to_le_bytes());
        }
        write_varint(&mut buf, self.outputs.len() as u64);
        for output in &self.outputs {
            buf.extend_from_slice(&output.value.to_le_bytes());
            write_varint(&mut buf, output.script.len() as u64);
            buf.extend_from_slice(&output.script);
        }
        buf.extend_from_slice(&self.lock_time.to_le_bytes());
        buf
    }

    pub fn serialized_len(&self) -> usize {
        self.serialize().len()
    }

    pub fn txid(&self) -> String {
        txid_of(&self.serialize())
    }

    fn estimated_len(&self) -> usize {
        10 + self
            .inputs
            .iter()
            .map(|i| 41 + i.script_sig.len())
            .sum::<usize>()
            + self
                .outputs
                .iter()
                .map(|o| 9 + o.script.len())
                .sum::<usize>()
    }

    /// Parse a wire-format transaction. Input values are unknown and set to 0.
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        let mut reader = Reader { bytes, pos: 0 };
        let version = reader.u32()?;
        let n_in = reader.varint()?;
        let mut inputs = Vec::new();
        for _ in 0..n_in {
            let mut txid = reader.take(32)?.to_vec();
            txid.reverse();
            let vout = reader.u32()?;
            let script_len = reader.varint()? as usize;
            let script_sig = reader.take(script_len)?.to_vec();
            let sequence = reader.u32()?;
            inputs.push(TxIn {
                prevout: OutPoint::new(hex::encode(txid), vout),
                value: 0,
                script_sig,
                sequence,
            });
        }
        let n_out = reader.varint()?;
        let mut outputs = Vec::new();
        for _ in 0..n_out {
            let value = reader.u64()?;
            let script_len = reader.varint()? as usize;
            outputs.push(TxOut::new(value, reader.take(script_len)?.to_vec()));
        }
        let lock_time = reader.u32()?;
        if reader.pos != bytes.len() {
            return Err(ParseError::TrailingBytes(bytes.len() - reader.pos));
        }
        Ok(Self {
            version,
            inputs,
            outputs,
            lock_time,
        })
    }
}

/// Errors decoding a raw transaction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Unexpected end of transaction data at byte {0}")]
    UnexpectedEnd(usize),

    #[error("{0} trailing bytes after transaction")]
    TrailingBytes(usize),
}

/// Display identifier of raw transaction bytes.
pub fn txid_of(raw: &[u8]) -> String {
    let first = Sha256::digest(raw);
    let mut hash = Sha256::digest(first).to_vec();
    hash.reverse();
    hex::encode(hash)
}

/// Little-endian wire bytes for a display-order txid. Malformed ids encode as zeros.
fn txid_to_wire(txid: &str) -> [u8; 32] {
    let mut out = [0u8; 32];
    if let Ok(bytes) = hex::decode(txid) {
        if bytes.len() == 32 {
            for (i, b) in bytes.iter().rev().enumerate() {
                out[i] = *b;
            }
        }
    }
    out
}

pub(crate) fn write_varint(buf: &mut Vec<u8>, n: u64) {
    match n {
        0..=0xfc => buf.push(n as u8),
        0xfd..=0xffff => {
            buf.push(0xfd);
            buf.extend_from_slice(&(n as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            buf.push(0xfe);
            buf.extend_from_slice(&(n as u32).to_le_bytes());
        }
        _ => {
            buf.push(0xff);
            buf.extend_from_slice(&n.to_le_bytes());
        }
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], ParseError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(ParseError::UnexpectedEnd(self.pos))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32, ParseError> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(raw))
    }

    fn u64(&mut self) -> Result<u64, ParseError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(raw))
    }

    fn varint(&mut self) -> Result<u64, ParseError> {
        let first = self.take(1)?[0];
        Ok(match first {
            0xfd => {
                let mut raw = [0u8; 2];
                raw.copy_from_slice(self.take(2)?);
                u16::from_le_bytes(raw) as u64
            }
            0xfe => self.u32()? as u64,
            0xff => self.u64()?,
            n => n as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Transaction {
        let mut tx = Transaction::new();
        let coin = Coin::new(
            "8d29c20fd086ad5aa859037eb9bb25aaf6ebb84706965c4c662bbdb40e9cba02",
            0,
            10_000,
        );
        tx.inputs.push(TxIn::spending(&coin));
        tx.inputs[0].script_sig = vec![0x51; 107];
        tx.outputs.push(TxOut::new(9_000, vec![0x76, 0xa9]));
        tx.outputs.push(TxOut::new(0, vec![0x00, 0x6a, 0x01, 0x42]));
        tx
    }

    #[test]
    fn parse_inverts_serialize() {
        let tx = sample();
        let parsed = Transaction::parse(&tx.serialize()).expect("parse");
        assert_eq!(parsed.inputs[0].prevout, tx.inputs[0].prevout);
        assert_eq!(parsed.outputs, tx.outputs);
        assert_eq!(parsed.txid(), tx.txid());
    }

    #[test]
    fn fee_is_input_minus_output() {
        let tx = sample();
        assert_eq!(tx.fee(), Some(1_000));
        assert!(tx.is_fully_signed());
    }

    #[test]
    fn unsigned_input_is_not_fully_signed() {
        let mut tx = sample();
        tx.inputs[0].script_sig.clear();
        assert!(!tx.is_fully_signed());
    }

    #[test]
    fn truncated_bytes_are_rejected() {
        let bytes = sample().serialize();
        assert!(matches!(
            Transaction::parse(&bytes[..bytes.len() - 2]),
            Err(ParseError::UnexpectedEnd(_))
        ));
    }

    #[test]
    fn varint_boundaries() {
        let mut buf = Vec::new();
        write_varint(&mut buf, 0xfc);
        write_varint(&mut buf, 0xfd);
        write_varint(&mut buf, 0x1_0000);
        assert_eq!(buf, vec![0xfc, 0xfd, 0xfd, 0x00, 0xfe, 0x00, 0x00, 0x01, 0x00]);
    }
}
