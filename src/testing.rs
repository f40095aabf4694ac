//! In-process doubles for backends and signers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::backend::{
    sort_latest_first, Backend, BackendError, BackendErrorKind, ContentRecord, KeyRecord, TxStatus,
};
use crate::tx::{txid_of, Coin, SignError, Signer, ExternalSigner, Transaction, TxIn, TxOut};

/// Length of a compressed-key signature script.
pub const AUTHORIZATION_LEN: usize = 107;

fn p2pkh(fill: u8) -> Vec<u8> {
    let mut script = vec![0x76, 0xa9, 0x14];
    script.extend([fill; 20]);
    script.extend([0x88, 0xac]);
    script
}

fn authorize_all(tx: &mut Transaction) {
    for input in &mut tx.inputs {
        input.script_sig = vec![0x30; AUTHORIZATION_LEN];
    }
}

/// Signed single-input transaction carrying `script` as its only output.
pub fn data_tx(script: Vec<u8>) -> Transaction {
    let mut tx = Transaction::new();
    tx.inputs.push(TxIn::spending(&Coin::new("aa".repeat(32), 0, 10_000)));
    tx.outputs.push(TxOut::new(0, script));
    authorize_all(&mut tx);
    tx
}

pub struct TestSigner {
    address: String,
}

impl TestSigner {
    pub fn new() -> Self {
        Self {
            address: "1TestSignerAddressXXXXXXXXXXXXXXXX".to_string(),
        }
    }
}

#[async_trait]
impl Signer for TestSigner {
    fn address(&self) -> String {
        self.address.clone()
    }

    fn locking_script(&self) -> Vec<u8> {
        p2pkh(0x11)
    }

    async fn sign(&self, tx: &mut Transaction) -> Result<(), SignError> {
        authorize_all(tx);
        Ok(())
    }
}

pub struct TestExternalSigner {
    drop_input: bool,
}

impl TestExternalSigner {
    pub fn new() -> Self {
        Self { drop_input: false }
    }

    /// Returns transactions missing their last input.
    pub fn dropping_inputs() -> Self {
        Self { drop_input: true }
    }
}

#[async_trait]
impl ExternalSigner for TestExternalSigner {
    fn address(&self) -> String {
        "1CustodianAddressXXXXXXXXXXXXXXXXX".to_string()
    }

    fn change_script(&self) -> Vec<u8> {
        p2pkh(0x22)
    }

    async fn authorize(&self, unsigned: &Transaction) -> Result<Transaction, SignError> {
        let mut signed = unsigned.clone();
        authorize_all(&mut signed);
        if self.drop_input {
            signed.inputs.pop();
        }
        Ok(signed)
    }
}

#[derive(Default)]
struct MockState {
    fail_all: Option<BackendErrorKind>,
    fail_tx: HashMap<String, BackendErrorKind>,
    submitted: Vec<String>,
    raw: HashMap<String, Vec<u8>>,
    status: HashMap<String, TxStatus>,
    content: HashMap<String, Vec<ContentRecord>>,
    keys: Vec<KeyRecord>,
    coins: Vec<Coin>,
    key_lookups: usize,
    fetches: usize,
}

/// Scriptable backend. Clones share state.
#[derive(Clone)]
pub struct MockBackend {
    id: String,
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state poisoned")
    }

    /// Fail every submission with `kind`.
    pub fn fail_submissions(&self, kind: BackendErrorKind) {
        self.state().fail_all = Some(kind);
    }

    /// Fail submissions of one transaction with `kind`.
    pub fn fail_tx(&self, txid: &str, kind: BackendErrorKind) {
        self.state().fail_tx.insert(txid.to_string(), kind);
    }

    /// Clear all scripted failures.
    pub fn recover(&self) {
        let mut state = self.state();
        state.fail_all = None;
        state.fail_tx.clear();
    }

    /// Identifiers of every submission attempt, failed ones included.
    pub fn submitted(&self) -> Vec<String> {
        self.state().submitted.clone()
    }

    pub fn add_content(&self, sha1: &str, record: ContentRecord) {
        self.state()
            .content
            .entry(sha1.to_string())
            .or_default()
            .push(record);
    }

    pub fn add_key_record(&self, record: KeyRecord) {
        self.state().keys.push(record);
    }

    pub fn add_transaction(&self, tx: &Transaction) {
        self.state().raw.insert(tx.txid(), tx.serialize());
    }

    pub fn add_coin(&self, coin: Coin) {
        self.state().coins.push(coin);
    }

    pub fn set_status(&self, txid: &str, status: TxStatus) {
        self.state().status.insert(txid.to_string(), status);
    }

    pub fn key_lookups(&self) -> usize {
        self.state().key_lookups
    }

    pub fn fetches(&self) -> usize {
        self.state().fetches
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        "Mock"
    }

    async fn find_by_content_hash(
        &self,
        sha1: &str,
        mime: &str,
    ) -> Result<Vec<ContentRecord>, BackendError> {
        Ok(self
            .state()
            .content
            .get(sha1)
            .map(|records| records.iter().filter(|r| r.mime == mime).cloned().collect())
            .unwrap_or_default())
    }

    async fn find_by_key(
        &self,
        key: Option<&str>,
        _owner: &str,
    ) -> Result<Vec<KeyRecord>, BackendError> {
        let mut state = self.state();
        state.key_lookups += 1;
        let mut records: Vec<_> = state
            .keys
            .iter()
            .filter(|r| key.map_or(true, |k| r.key == k))
            .cloned()
            .collect();
        sort_latest_first(&mut records);
        Ok(records)
    }

    async fn fetch_raw_transaction(&self, txid: &str) -> Result<Option<Vec<u8>>, BackendError> {
        let mut state = self.state();
        state.fetches += 1;
        Ok(state.raw.get(txid).cloned())
    }

    async fn submit_transaction(&self, raw: &[u8]) -> Result<String, BackendError> {
        let txid = txid_of(raw);
        let mut state = self.state();
        state.submitted.push(txid.clone());
        let failure = state.fail_tx.get(&txid).copied().or(state.fail_all);
        if let Some(kind) = failure {
            return Err(BackendError::new(kind, format!("{} refused {}", self.id, txid)));
        }
        state.raw.insert(txid.clone(), raw.to_vec());
        state.status.insert(txid.clone(), TxStatus::InMempool);
        Ok(txid)
    }

    async fn list_spendable_coins(&self, _address: &str) -> Result<Vec<Coin>, BackendError> {
        Ok(self.state().coins.clone())
    }

    async fn transaction_status(&self, txid: &str) -> Result<TxStatus, BackendError> {
        Ok(self
            .state()
            .status
            .get(txid)
            .copied()
            .unwrap_or(TxStatus::Unknown))
    }
}
