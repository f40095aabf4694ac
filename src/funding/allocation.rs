//! Funding allocator.
//!
//! Splits the coin pool into one output per task, batching outputs into
//! funding-split transactions that stay under the byte budget. Batches are
//! chained: batch n+1 starts from batch n's change.
//!
//! # Invariants
//! - Every output of a split is `>= dust_limit` (task reservations never go below it)
//! - `sum(outputs) + fee == sum(inputs)` for every split
//! - Task output `i` of a split funds the i-th task of that batch

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::fees::FeePolicy;
use crate::error::UploadError;
use crate::task::{FundingInput, TaskId, TaskSet};
use crate::tx::{Coin, ExternalSigner, SignError, Signer, Transaction, TxIn, TxOut};

/// Who authorizes the funding splits.
#[derive(Clone, Default)]
pub enum FundingSource {
    /// The engine's own signer spends its own coins
    #[default]
    Local,
    /// Coins held by an external custodian; only input authorizations are taken back
    External(Arc<dyn ExternalSigner>),
}

impl std::fmt::Debug for FundingSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FundingSource::Local => write!(f, "Local"),
            FundingSource::External(signer) => write!(f, "External({})", signer.address()),
        }
    }
}

/// Coins and tasks chosen for one funding split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub inputs: Vec<Coin>,
    pub tasks: Vec<(TaskId, u64)>,
}

impl Batch {
    pub fn input_value(&self) -> u64 {
        self.inputs.iter().map(|c| c.value).sum()
    }

    pub fn output_value(&self) -> u64 {
        self.tasks.iter().map(|(_, cost)| cost).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FundingSummary {
    /// Funding split task ids in batch order
    pub splits: Vec<TaskId>,
    /// Fees paid by all splits
    pub total_fee: u64,
    /// Change left by the final split, if any
    pub change: Option<Coin>,
}

pub struct FundingAllocator<'a> {
    policy: &'a FeePolicy,
    signer: &'a dyn Signer,
    source: &'a FundingSource,
}

impl<'a> FundingAllocator<'a> {
    pub fn new(policy: &'a FeePolicy, signer: &'a dyn Signer, source: &'a FundingSource) -> Self {
        Self {
            policy,
            signer,
            source,
        }
    }

    /// Fail-fast check before any allocation.
    ///
    /// # Errors
    /// `InsufficientFunds` when `sum(coins) < sum(costs) + n * per_output_overhead`.
    pub fn check_funds(&self, costs: &[u64], coins: &[Coin]) -> Result<(), UploadError> {
        let required = costs.iter().sum::<u64>()
            + costs.len() as u64 * self.policy.per_output_overhead;
        let provided = coins.iter().map(|c| c.value).sum::<u64>();
        if provided < required {
            warn!(
                required,
                provided,
                shortfall = required - provided,
                "Insufficient funds for upload"
            );
            return Err(UploadError::InsufficientFunds {
                required,
                provided,
                shortfall: required - provided,
            });
        }
        Ok(())
    }

    /// Greedily choose the next batch from `pool` and `remaining`.
    ///
    /// Coins are consumed in pool order, only as needed to cover the next
    /// output plus the estimated split fee. The batch closes when the byte
    /// budget, the output cap, or the pool runs out.
    ///
    /// # Side Effects
    /// Only `pool` is mutated (coins taken are removed from its front).
    pub fn plan_batch(&self, pool: &mut VecDeque<Coin>, remaining: &[(TaskId, u64)]) -> Batch {
        let max_bytes = self.policy.max_split_bytes;
        let mut batch = Batch {
            inputs: Vec::new(),
            tasks: Vec::new(),
        };
        let mut in_value = 0u64;
        let mut out_value = 0u64;

        for &(id, cost) in remaining {
            let outputs = batch.tasks.len();
            if outputs + 1 > self.policy.max_split_outputs {
                break;
            }
            // room for this output and a change output
            if FeePolicy::split_size(batch.inputs.len(), outputs + 2) > max_bytes {
                break;
            }
            let target = out_value + cost;
            while in_value < target + self.policy.split_fee(batch.inputs.len(), outputs + 2) {
                if FeePolicy::split_size(batch.inputs.len() + 1, outputs + 2) > max_bytes {
                    break;
                }
                match pool.pop_front() {
                    Some(coin) => {
                        in_value += coin.value;
                        batch.inputs.push(coin);
                    }
                    None => break,
                }
            }
            if in_value < target + self.policy.split_fee(batch.inputs.len(), outputs + 1) {
                break;
            }
            out_value = target;
            batch.tasks.push((id, cost));
        }
        batch
    }

    /// Fund every unfunded task of `set` from `coins`.
    ///
    /// # Postconditions
    /// - One `FundingSplit` task per batch, already signed, in chain order
    /// - Every funded task's `funding_input` references its split output
    ///
    /// # Errors
    /// - `InsufficientFunds` up front (nothing built) or when a later batch
    ///   finds the pool exhausted
    /// - `UnderfundedBatch` when a batch cannot pay for even one output
    pub async fn allocate(
        &self,
        set: &mut TaskSet,
        coins: Vec<Coin>,
    ) -> Result<FundingSummary, UploadError> {
        let remaining: Vec<(TaskId, u64)> = set
            .fundable()
            .filter(|t| t.funding_input().is_none() && !t.status().is_terminal())
            .map(|t| (t.id(), t.estimated_cost()))
            .collect();
        let mut summary = FundingSummary::default();
        if remaining.is_empty() {
            return Ok(summary);
        }

        let costs: Vec<u64> = remaining.iter().map(|(_, c)| *c).collect();
        self.check_funds(&costs, &coins)?;

        let mut pool: VecDeque<Coin> = coins.into();
        let mut rest: &[(TaskId, u64)] = &remaining;
        while !rest.is_empty() {
            let batch_no = summary.splits.len();
            let batch = self.plan_batch(&mut pool, rest);
            if batch.tasks.is_empty() {
                let required = rest.iter().map(|(_, c)| c).sum::<u64>()
                    + rest.len() as u64 * self.policy.per_output_overhead;
                let provided = batch.input_value() + pool.iter().map(|c| c.value).sum::<u64>();
                if pool.is_empty() {
                    warn!(batch = batch_no, required, provided, "Funding pool exhausted");
                    return Err(UploadError::InsufficientFunds {
                        required,
                        provided,
                        shortfall: required.saturating_sub(provided),
                    });
                }
                return Err(UploadError::UnderfundedBatch {
                    batch: batch_no,
                    inputs: batch.input_value(),
                    outputs: rest.first().map(|(_, c)| *c).unwrap_or_default(),
                    fee: self.policy.split_fee(batch.inputs.len(), 1),
                });
            }

            let (tx, change) = self.build_split(batch_no, &batch).await?;
            summary.total_fee += tx.fee().unwrap_or_default();
            let txid = tx.txid();
            let split = set.push_funding_split(tx, batch.input_value());
            info!(
                batch = batch_no,
                %txid,
                inputs = batch.inputs.len(),
                outputs = batch.tasks.len(),
                change = change.as_ref().map(|c| c.value).unwrap_or(0),
                "Funding split built"
            );

            for (vout, (id, cost)) in batch.tasks.iter().enumerate() {
                let funding = FundingInput {
                    coin: Coin::new(txid.clone(), vout as u32, *cost),
                    split: Some(split),
                };
                if let Some(task) = set.get_mut(*id) {
                    task.assign_funding(funding)?;
                }
            }

            summary.splits.push(split);
            rest = &rest[batch.tasks.len()..];
            summary.change = change.clone();
            match change {
                Some(coin) => pool.push_front(coin),
                None if !rest.is_empty() => {
                    // later batches must chain through change; without it nothing is left
                    warn!(
                        batch = batch_no,
                        unfunded = rest.len(),
                        "Funding split left no change; remaining tasks cannot be funded"
                    );
                    pool.clear();
                }
                None => {}
            }
        }
        Ok(summary)
    }

    /// Build and sign one split. Returns the transaction and its change coin.
    async fn build_split(
        &self,
        batch_no: usize,
        batch: &Batch,
    ) -> Result<(Transaction, Option<Coin>), UploadError> {
        let in_value = batch.input_value();
        let out_value = batch.output_value();
        let n_in = batch.inputs.len();
        let n_out = batch.tasks.len();

        let base_fee = self.policy.split_fee(n_in, n_out);
        if in_value < out_value + base_fee {
            return Err(UploadError::UnderfundedBatch {
                batch: batch_no,
                inputs: in_value,
                outputs: out_value,
                fee: base_fee,
            });
        }

        let task_script = self.signer.locking_script();
        let mut tx = Transaction::new();
        tx.inputs = batch.inputs.iter().map(TxIn::spending).collect();
        tx.outputs = batch
            .tasks
            .iter()
            .map(|(_, cost)| TxOut::new(*cost, task_script.clone()))
            .collect();

        let mut change_value = None;
        let surplus = in_value - out_value;
        if self.policy.wants_change(surplus, n_in, n_out) {
            let fee = self.policy.split_fee(n_in, n_out + 1);
            let change = surplus.saturating_sub(fee);
            if change >= self.policy.dust_limit {
                tx.outputs.push(TxOut::new(change, self.change_script()));
                change_value = Some(change);
            }
        }
        debug!(batch = batch_no, in_value, out_value, ?change_value, "Signing funding split");

        self.sign_split(&mut tx).await?;
        let change = change_value.map(|value| Coin::new(tx.txid(), n_out as u32, value));
        Ok((tx, change))
    }

    fn change_script(&self) -> Vec<u8> {
        match self.source {
            FundingSource::Local => self.signer.locking_script(),
            FundingSource::External(external) => external.change_script(),
        }
    }

    async fn sign_split(&self, tx: &mut Transaction) -> Result<(), SignError> {
        match self.source {
            FundingSource::Local => self.signer.sign(tx).await,
            FundingSource::External(external) => {
                let authorized = external.authorize(tx).await?;
                if authorized.inputs.len() != tx.inputs.len() {
                    return Err(SignError::InputMismatch {
                        expected: tx.inputs.len(),
                        returned: authorized.inputs.len(),
                    });
                }
                for (ours, theirs) in tx.inputs.iter_mut().zip(authorized.inputs) {
                    ours.script_sig = theirs.script_sig;
                }
                match tx.inputs.iter().position(|i| !i.is_signed()) {
                    Some(idx) => Err(SignError::Incomplete(idx)),
                    None => Ok(()),
                }
            }
        }
    }
}
