//! Broadcast driver: one classified submission pass over the persisted
//! unbroadcast set.
//!
//! The driver never sleeps. A caller that gets [`BroadcastOutcome::RetryLater`]
//! decides when (and whether) to run the next pass.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backend::{BackendDirectory, BackendErrorKind, TxStatus};
use crate::error::UploadError;
use crate::store::{RecordStore, ABANDONED, PENDING, TX, UNBROADCAST};
use crate::task::SignedTransaction;

/// Default wait between broadcast passes.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BroadcastOutcome {
    /// The unbroadcast set is empty.
    Complete,
    /// Some transactions remain; run another pass after the delay.
    RetryLater(Duration),
    /// No transaction made progress; the remainder was moved to `abandoned`.
    Abandoned,
}

/// Result of one broadcast pass.
#[derive(Debug, Clone, Serialize)]
pub struct BroadcastReport {
    pub outcome: BroadcastOutcome,
    /// Accepted by the network this pass (submitted, already known or found by status)
    pub broadcast: Vec<String>,
    /// Rejected because a spent output is not yet known to the network
    pub missing_inputs: Vec<String>,
    /// Not attempted after a rate limit or outage
    pub deferred: Vec<String>,
    /// Still awaiting broadcast after the pass, in submission order
    pub remaining: Vec<String>,
    /// Moved to the abandoned namespace this pass
    pub abandoned: Vec<String>,
}

impl BroadcastReport {
    fn new(outcome: BroadcastOutcome) -> Self {
        Self {
            outcome,
            broadcast: Vec::new(),
            missing_inputs: Vec::new(),
            deferred: Vec::new(),
            remaining: Vec::new(),
            abandoned: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.outcome == BroadcastOutcome::Complete
    }
}

pub struct BroadcastDriver<'a> {
    backends: &'a BackendDirectory,
    store: &'a dyn RecordStore,
    retry_interval: Duration,
}

impl<'a> BroadcastDriver<'a> {
    pub fn new(backends: &'a BackendDirectory, store: &'a dyn RecordStore) -> Self {
        Self {
            backends,
            store,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Persist `txs` as unbroadcast, in order.
    ///
    /// Transactions already submitted or archived are skipped, and
    /// re-adding a queued one keeps its position, so enqueueing is idempotent.
    pub async fn enqueue(&self, txs: &[SignedTransaction]) -> Result<usize, UploadError> {
        let mut added = 0;
        for signed in txs {
            if self.is_known_locally(&signed.txid).await? {
                debug!(txid = %signed.txid, "Already broadcast, not queueing");
                continue;
            }
            self.store
                .append_record(UNBROADCAST, &signed.txid, &signed.raw())
                .await
                .map_err(UploadError::Store)?;
            added += 1;
        }
        Ok(added)
    }

    async fn is_known_locally(&self, txid: &str) -> Result<bool, UploadError> {
        for namespace in [PENDING, TX] {
            if self
                .store
                .load_record(namespace, txid)
                .await
                .map_err(UploadError::Store)?
                .is_some()
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Identifiers awaiting broadcast, in submission order.
    pub async fn unbroadcast(&self) -> Result<Vec<String>, UploadError> {
        self.store
            .list_record_ids(UNBROADCAST)
            .await
            .map_err(UploadError::Store)
    }

    /// Queue `txs` and run one pass over everything unbroadcast.
    pub async fn broadcast_all(
        &self,
        txs: &[SignedTransaction],
    ) -> Result<BroadcastReport, UploadError> {
        self.enqueue(txs).await?;
        self.run_pass().await
    }

    /// Submit every unbroadcast transaction once, in order.
    ///
    /// # Errors
    /// An unclassified backend rejection is returned as-is. Records already
    /// moved earlier in the pass stay moved.
    pub async fn run_pass(&self) -> Result<BroadcastReport, UploadError> {
        let ids = self.unbroadcast().await?;
        if ids.is_empty() {
            return Ok(BroadcastReport::new(BroadcastOutcome::Complete));
        }
        info!(count = ids.len(), "Broadcasting transactions");

        let mut report = BroadcastReport::new(BroadcastOutcome::Complete);
        let mut need_to_wait = false;
        let mut wait_hint: Option<Duration> = None;

        for id in ids {
            if need_to_wait {
                report.deferred.push(id);
                continue;
            }
            let Some(raw) = self
                .store
                .load_record(UNBROADCAST, &id)
                .await
                .map_err(UploadError::Store)?
            else {
                continue;
            };

            if let Some(status) = self.known_status(&id).await {
                self.settle(&id, status).await?;
                report.broadcast.push(id);
                continue;
            }

            match self.backends.submit_transaction(&raw).await {
                Ok(_) => {
                    debug!(txid = %id, "Transaction accepted");
                    self.settle(&id, TxStatus::InMempool).await?;
                    report.broadcast.push(id);
                }
                Err(err) => match err.kind {
                    BackendErrorKind::AlreadyKnown => {
                        debug!(txid = %id, "Transaction already known");
                        self.settle(&id, TxStatus::InMempool).await?;
                        report.broadcast.push(id);
                    }
                    BackendErrorKind::MissingInputs => {
                        warn!(txid = %id, "Inputs not yet known to the network: {}", err.message);
                        report.missing_inputs.push(id);
                    }
                    BackendErrorKind::RateLimited | BackendErrorKind::Unavailable => {
                        warn!(txid = %id, kind = %err.kind, "Deferring remaining broadcasts: {}", err.message);
                        need_to_wait = true;
                        wait_hint = err.retry_after;
                        report.deferred.push(id);
                    }
                    BackendErrorKind::Unsupported
                    | BackendErrorKind::Rejected
                    | BackendErrorKind::InvalidResponse => {
                        return Err(err.into());
                    }
                },
            }
        }

        report.remaining = self.unbroadcast().await?;
        let success_possible = !report.broadcast.is_empty() || need_to_wait;

        report.outcome = if report.remaining.is_empty() {
            info!(broadcast = report.broadcast.len(), "All transactions broadcast");
            BroadcastOutcome::Complete
        } else if !success_possible {
            for id in &report.remaining {
                self.store
                    .move_record(UNBROADCAST, ABANDONED, id)
                    .await
                    .map_err(UploadError::Store)?;
            }
            warn!(
                count = report.remaining.len(),
                "No transaction could be broadcast; abandoning the remainder. \
                 Its funding may have been spent elsewhere: is this key in use by another client?"
            );
            report.abandoned = std::mem::take(&mut report.remaining);
            BroadcastOutcome::Abandoned
        } else {
            let delay = wait_hint.unwrap_or(self.retry_interval).max(self.retry_interval);
            info!(
                broadcast = report.broadcast.len(),
                remaining = report.remaining.len(),
                retry_secs = delay.as_secs(),
                "Broadcast pass incomplete"
            );
            BroadcastOutcome::RetryLater(delay)
        };
        Ok(report)
    }

    /// Network status when the backends already know the transaction.
    ///
    /// Lookup failures are not fatal; the transaction is simply submitted.
    async fn known_status(&self, txid: &str) -> Option<TxStatus> {
        match self.backends.transaction_status(txid).await {
            Ok(status) if status.is_known() => Some(status),
            Ok(_) => None,
            Err(err) => {
                debug!(txid, "Status lookup failed: {}", err);
                None
            }
        }
    }

    /// Move a network-accepted record out of the unbroadcast set.
    async fn settle(&self, txid: &str, status: TxStatus) -> Result<(), UploadError> {
        let target = match status {
            TxStatus::Confirmed { .. } => TX,
            TxStatus::InMempool | TxStatus::Unknown => PENDING,
        };
        self.store
            .move_record(UNBROADCAST, target, txid)
            .await
            .map_err(UploadError::Store)?;
        Ok(())
    }

    /// Archive submitted transactions that have since confirmed.
    ///
    /// Returns how many records moved from `pending` to `tx`.
    pub async fn reconcile_pending(&self) -> Result<usize, UploadError> {
        let mut confirmed = 0;
        for id in self
            .store
            .list_record_ids(PENDING)
            .await
            .map_err(UploadError::Store)?
        {
            match self.backends.transaction_status(&id).await {
                Ok(TxStatus::Confirmed { height }) => {
                    debug!(txid = %id, height, "Transaction confirmed");
                    self.store
                        .move_record(PENDING, TX, &id)
                        .await
                        .map_err(UploadError::Store)?;
                    confirmed += 1;
                }
                Ok(_) => {}
                Err(err) if err.is_transient() || err.kind == BackendErrorKind::Unsupported => {
                    debug!(txid = %id, "Status lookup failed: {}", err);
                }
                Err(err) => return Err(err.into()),
            }
        }
        if confirmed > 0 {
            info!(confirmed, "Reconciled pending transactions");
        }
        Ok(confirmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::chunk_script;
    use crate::store::InMemoryRecordStore;
    use crate::task::TaskId;
    use crate::testing::{data_tx, MockBackend};
    use std::sync::Arc;

    fn signed(byte: u8) -> SignedTransaction {
        let tx = data_tx(chunk_script(&[byte; 8]));
        SignedTransaction {
            txid: tx.txid(),
            task: TaskId(byte as usize),
            label: "chunk",
            tx,
        }
    }

    fn directory(mock: &MockBackend) -> BackendDirectory {
        BackendDirectory::new().with(Arc::new(mock.clone()))
    }

    #[tokio::test]
    async fn missing_inputs_after_success_retries() {
        let mock = MockBackend::new("mock");
        let (a, b) = (signed(1), signed(2));
        mock.fail_tx(&b.txid, BackendErrorKind::MissingInputs);
        let backends = directory(&mock);
        let store = InMemoryRecordStore::new();
        let driver = BroadcastDriver::new(&backends, &store);

        let report = driver
            .broadcast_all(&[a.clone(), b.clone()])
            .await
            .expect("pass runs");
        assert_eq!(report.outcome, BroadcastOutcome::RetryLater(DEFAULT_RETRY_INTERVAL));
        assert_eq!(report.broadcast, vec![a.txid.clone()]);
        assert_eq!(report.missing_inputs, vec![b.txid.clone()]);
        assert_eq!(report.remaining, vec![b.txid.clone()]);
        assert_eq!(store.list_record_ids(PENDING).await.expect("list"), vec![a.txid]);
    }

    #[tokio::test]
    async fn rate_limit_defers_the_rest_in_order() {
        let mock = MockBackend::new("mock");
        let txs = [signed(1), signed(2), signed(3)];
        mock.fail_tx(&txs[1].txid, BackendErrorKind::RateLimited);
        let backends = directory(&mock);
        let store = InMemoryRecordStore::new();
        let driver = BroadcastDriver::new(&backends, &store);

        let report = driver.broadcast_all(&txs).await.expect("pass runs");
        assert!(matches!(report.outcome, BroadcastOutcome::RetryLater(_)));
        assert_eq!(report.deferred, vec![txs[1].txid.clone(), txs[2].txid.clone()]);
        assert_eq!(mock.submitted().len(), 2);
        assert_eq!(report.remaining, report.deferred);
    }

    #[tokio::test]
    async fn no_progress_abandons_with_remainder() {
        let mock = MockBackend::new("mock");
        mock.fail_submissions(BackendErrorKind::MissingInputs);
        let backends = directory(&mock);
        let store = InMemoryRecordStore::new();
        let driver = BroadcastDriver::new(&backends, &store);

        let report = driver
            .broadcast_all(&[signed(1), signed(2)])
            .await
            .expect("pass runs");
        assert_eq!(report.outcome, BroadcastOutcome::Abandoned);
        assert_eq!(report.abandoned.len(), 2);
        assert!(driver.unbroadcast().await.expect("list").is_empty());
        assert_eq!(store.list_record_ids(ABANDONED).await.expect("list").len(), 2);
    }

    #[tokio::test]
    async fn rebroadcast_is_idempotent() {
        let mock = MockBackend::new("mock");
        let backends = directory(&mock);
        let store = InMemoryRecordStore::new();
        let driver = BroadcastDriver::new(&backends, &store);
        let tx = signed(1);

        driver.broadcast_all(&[tx.clone()]).await.expect("first pass");
        let again = driver.broadcast_all(&[tx.clone()]).await.expect("second pass");
        assert!(again.is_complete());
        assert_eq!(mock.submitted().len(), 1);
        assert_eq!(store.list_record_ids(PENDING).await.expect("list"), vec![tx.txid]);
    }

    #[tokio::test]
    async fn already_known_counts_as_success() {
        let mock = MockBackend::new("mock");
        let tx = signed(1);
        mock.fail_tx(&tx.txid, BackendErrorKind::AlreadyKnown);
        let backends = directory(&mock);
        let store = InMemoryRecordStore::new();
        let driver = BroadcastDriver::new(&backends, &store);

        let report = driver.broadcast_all(&[tx.clone()]).await.expect("pass runs");
        assert!(report.is_complete());
        assert_eq!(report.broadcast, vec![tx.txid]);
    }

    #[tokio::test]
    async fn confirmed_transaction_is_archived_without_submission() {
        let mock = MockBackend::new("mock");
        let tx = signed(1);
        mock.set_status(&tx.txid, TxStatus::Confirmed { height: 700_000 });
        let backends = directory(&mock);
        let store = InMemoryRecordStore::new();
        let driver = BroadcastDriver::new(&backends, &store);

        let report = driver.broadcast_all(&[tx.clone()]).await.expect("pass runs");
        assert!(report.is_complete());
        assert!(mock.submitted().is_empty());
        assert!(store.load_record(TX, &tx.txid).await.expect("load").is_some());
    }

    #[tokio::test]
    async fn unclassified_rejection_is_surfaced() {
        let mock = MockBackend::new("mock");
        mock.fail_submissions(BackendErrorKind::Rejected);
        let backends = directory(&mock);
        let store = InMemoryRecordStore::new();
        let driver = BroadcastDriver::new(&backends, &store);

        let err = driver
            .broadcast_all(&[signed(1)])
            .await
            .expect_err("rejection surfaces");
        assert!(matches!(err, UploadError::Backend(e) if e.kind == BackendErrorKind::Rejected));
        assert_eq!(driver.unbroadcast().await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn reconcile_moves_confirmed_pending() {
        let mock = MockBackend::new("mock");
        let backends = directory(&mock);
        let store = InMemoryRecordStore::new();
        let driver = BroadcastDriver::new(&backends, &store);
        let (a, b) = (signed(1), signed(2));
        driver.broadcast_all(&[a.clone(), b.clone()]).await.expect("pass runs");

        mock.set_status(&a.txid, TxStatus::Confirmed { height: 1 });
        assert_eq!(driver.reconcile_pending().await.expect("reconcile"), 1);
        assert_eq!(store.list_record_ids(PENDING).await.expect("list"), vec![b.txid]);
        assert_eq!(store.list_record_ids(TX).await.expect("list"), vec![a.txid]);
    }
}
