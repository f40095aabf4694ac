//! Caller-facing upload engine.
//!
//! ```text
//!   files ──► plan_files ──► build_tasks ──► resolve_and_verify ──► broadcast_all
//!             (dedup)        (fund)          (sign, check)          (one pass)
//! ```
//!
//! Each stage can be driven separately; [`UploadEngine::prepare_upload`]
//! runs the first three and queues the result for broadcast.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::backend::BackendDirectory;
use crate::broadcast::{BroadcastDriver, BroadcastReport, DEFAULT_RETRY_INTERVAL};
use crate::error::UploadError;
use crate::funding::{FeePolicy, FundingAllocator, FundingSource};
use crate::planner::Planner;
use crate::store::RecordStore;
use crate::task::{
    resolver, tasks_from_plan, ContentPlan, FileEntry, SignedTransaction, TaskSet, UploadParams,
    Verifier,
};
use crate::tx::Signer;
use crate::util::sequence_now;

pub struct UploadEngine {
    params: UploadParams,
    policy: FeePolicy,
    backends: BackendDirectory,
    store: Arc<dyn RecordStore>,
    signer: Arc<dyn Signer>,
    funding: FundingSource,
    retry_interval: Duration,
}

impl UploadEngine {
    pub fn new(
        backends: BackendDirectory,
        store: Arc<dyn RecordStore>,
        signer: Arc<dyn Signer>,
    ) -> Self {
        Self {
            params: UploadParams::default(),
            policy: FeePolicy::default(),
            backends,
            store,
            signer,
            funding: FundingSource::Local,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    pub fn with_params(mut self, params: UploadParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_policy(mut self, policy: FeePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_funding_source(mut self, funding: FundingSource) -> Self {
        self.funding = funding;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Address whose coins pay for the upload.
    pub fn funding_address(&self) -> String {
        match &self.funding {
            FundingSource::Local => self.signer.address(),
            FundingSource::External(external) => external.address(),
        }
    }

    /// Compare `files` against the chain and decide what to write.
    pub async fn plan_files(&self, files: Vec<FileEntry>) -> Result<ContentPlan, UploadError> {
        let mut planner = Planner::new(
            &self.backends,
            self.store.as_ref(),
            self.signer.address(),
            &self.params,
        );
        planner.plan(files).await
    }

    /// Expand `plan` into a funded task graph.
    ///
    /// A plan with nothing to write yields an empty set without touching the
    /// backends.
    ///
    /// # Errors
    /// `MalformedPlan`, `InsufficientFunds` (before any transaction is built)
    /// or `UnderfundedBatch`.
    pub async fn build_tasks(&self, plan: &ContentPlan) -> Result<TaskSet, UploadError> {
        if !plan.has_work() {
            info!("Nothing to upload");
            return Ok(TaskSet::new());
        }

        let mut set = tasks_from_plan(plan, &self.params, &self.policy, &sequence_now());
        set.validate()?;

        let address = self.funding_address();
        let coins = self.backends.list_spendable_coins(&address).await?;
        info!(
            tasks = set.len(),
            coins = coins.len(),
            estimated_cost = set.total_estimated_cost(),
            "Funding upload"
        );

        let allocator = FundingAllocator::new(&self.policy, self.signer.as_ref(), &self.funding);
        let summary = allocator.allocate(&mut set, coins).await?;
        info!(
            splits = summary.splits.len(),
            split_fees = summary.total_fee,
            "Task graph funded"
        );
        Ok(set)
    }

    /// Sign every task in dependency order and certify the result.
    ///
    /// Returns the transactions in broadcast order: funding splits first.
    pub async fn resolve_and_verify(
        &self,
        set: &mut TaskSet,
    ) -> Result<Vec<SignedTransaction>, UploadError> {
        let passes = resolver::resolve(set, self.signer.as_ref()).await?;
        let txs = set.ordered_transactions();
        Verifier::new(self.signer.as_ref(), &self.policy).verify_all(&txs)?;
        info!(transactions = txs.len(), passes, "Transaction set verified");
        Ok(txs)
    }

    pub fn broadcaster(&self) -> BroadcastDriver<'_> {
        BroadcastDriver::new(&self.backends, self.store.as_ref())
            .with_retry_interval(self.retry_interval)
    }

    /// Queue `txs` and run one broadcast pass over everything unbroadcast.
    pub async fn broadcast_all(
        &self,
        txs: &[SignedTransaction],
    ) -> Result<BroadcastReport, UploadError> {
        self.broadcaster().broadcast_all(txs).await
    }

    /// Plan, fund, sign and verify `files`, then persist the result as
    /// unbroadcast. Nothing is submitted.
    pub async fn prepare_upload(
        &self,
        files: Vec<FileEntry>,
    ) -> Result<Vec<SignedTransaction>, UploadError> {
        let plan = self.plan_files(files).await?;
        let mut set = self.build_tasks(&plan).await?;
        if set.is_empty() {
            return Ok(Vec::new());
        }
        let txs = self.resolve_and_verify(&mut set).await?;
        self.broadcaster().enqueue(&txs).await?;
        Ok(txs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendErrorKind, ContentRecord, KeyRecord};
    use crate::broadcast::BroadcastOutcome;
    use crate::protocol::{content_script, CONTENT_PREFIX};
    use crate::store::{InMemoryRecordStore, PENDING, UNBROADCAST};
    use crate::task::{TaskKind, TaskStatus};
    use crate::testing::{data_tx, MockBackend, TestSigner};
    use crate::tx::Coin;
    use crate::util::sha1_hex;

    struct Fixture {
        mock: MockBackend,
        store: InMemoryRecordStore,
        engine: UploadEngine,
    }

    fn fixture() -> Fixture {
        let mock = MockBackend::new("mock");
        let store = InMemoryRecordStore::new();
        let engine = UploadEngine::new(
            BackendDirectory::new().with(Arc::new(mock.clone())),
            Arc::new(store.clone()),
            Arc::new(TestSigner::new()),
        );
        Fixture {
            mock,
            store,
            engine,
        }
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn large_file_uploads_as_chunks_index_and_pointer() {
        let f = fixture();
        f.mock.add_coin(Coin::new("cc".repeat(32), 0, 1_000_000));
        let data = payload(200_000);

        let plan = f
            .engine
            .plan_files(vec![FileEntry::new("site/video.bin", data.clone(), "video/mp4")])
            .await
            .expect("plan");
        let mut set = f.engine.build_tasks(&plan).await.expect("tasks funded");

        let count = |label: &str| set.iter().filter(|t| t.kind().label() == label).count();
        assert_eq!(count("chunk"), 4);
        assert_eq!(count("index"), 1);
        assert_eq!(count("pointer"), 1);
        assert!(set.funding_splits().count() >= 1);

        let txs = f.engine.resolve_and_verify(&mut set).await.expect("verified");
        assert!(set.all_resolved());
        assert_eq!(set.count_with_status(TaskStatus::Resolved), set.len());

        let chunk_ids: Vec<String> = set
            .iter()
            .filter(|t| matches!(t.kind(), TaskKind::ContentChunk { .. }))
            .filter_map(|t| t.resolved_id().map(str::to_string))
            .collect();
        let index = set
            .iter()
            .find(|t| matches!(t.kind(), TaskKind::ContentIndex { .. }))
            .expect("index task");
        match index.kind() {
            TaskKind::ContentIndex { chunks, .. } => assert_eq!(chunks, &chunk_ids),
            other => panic!("unexpected kind {:?}", other),
        }
        let pointer = set
            .iter()
            .find(|t| matches!(t.kind(), TaskKind::PointerRecord { .. }))
            .expect("pointer task");
        match pointer.kind() {
            TaskKind::PointerRecord { value, .. } => {
                assert_eq!(value.as_deref(), index.resolved_id())
            }
            other => panic!("unexpected kind {:?}", other),
        }

        let split_count = set.funding_splits().count();
        assert!(txs[..split_count].iter().all(|t| t.label == "funding"));

        let report = f.engine.broadcast_all(&txs).await.expect("broadcast");
        assert_eq!(report.outcome, BroadcastOutcome::Complete);
        assert_eq!(
            f.store.list_record_ids(PENDING).await.expect("list").len(),
            txs.len()
        );
    }

    #[tokio::test]
    async fn unchanged_content_yields_empty_task_set() {
        let f = fixture();
        let data = b"<html></html>".to_vec();
        let tx = data_tx(content_script(&data, "text/html", &sha1_hex(&data)));
        f.mock.add_transaction(&tx);
        f.mock.add_content(
            &sha1_hex(&data),
            ContentRecord {
                txid: tx.txid(),
                tag: CONTENT_PREFIX.to_string(),
                mime: "text/html".to_string(),
            },
        );
        f.mock.add_key_record(KeyRecord {
            txid: "d".repeat(64),
            key: "index.html".to_string(),
            value: tx.txid(),
            sequence: "1".to_string(),
            height: Some(10),
        });

        let plan = f
            .engine
            .plan_files(vec![FileEntry::new("index.html", data, "text/html")])
            .await
            .expect("plan");
        let set = f.engine.build_tasks(&plan).await.expect("build");
        assert!(set.is_empty());
    }

    #[tokio::test]
    async fn insufficient_funds_builds_nothing() {
        let f = fixture();
        f.mock.add_coin(Coin::new("cc".repeat(32), 0, 1_000));

        let err = f
            .engine
            .prepare_upload(vec![FileEntry::new("a.bin", payload(10_000), "application/octet-stream")])
            .await
            .expect_err("not enough funds");
        match err {
            UploadError::InsufficientFunds {
                required,
                provided,
                shortfall,
            } => {
                assert_eq!(provided, 1_000);
                assert_eq!(shortfall, required - provided);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(f.mock.submitted().is_empty());
        assert!(f.store.list_record_ids(UNBROADCAST).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn prepared_upload_resumes_after_missing_inputs() {
        let f = fixture();
        f.mock.add_coin(Coin::new("cc".repeat(32), 0, 100_000));
        let txs = f
            .engine
            .prepare_upload(vec![FileEntry::new("a.txt", b"hello".to_vec(), "text/plain")])
            .await
            .expect("prepared");
        assert_eq!(
            f.store.list_record_ids(UNBROADCAST).await.expect("list").len(),
            txs.len()
        );

        let dependent = txs.last().expect("pointer tx").txid.clone();
        f.mock.fail_tx(&dependent, BackendErrorKind::MissingInputs);
        let first = f.engine.broadcaster().run_pass().await.expect("first pass");
        assert!(matches!(first.outcome, BroadcastOutcome::RetryLater(_)));
        assert_eq!(first.remaining, vec![dependent.clone()]);

        f.mock.recover();
        let second = f.engine.broadcaster().run_pass().await.expect("second pass");
        assert!(second.is_complete());
        assert_eq!(second.broadcast, vec![dependent]);
    }
}
