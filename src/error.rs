//! Crate-wide error taxonomy.
//!
//! Structural errors (cycles, malformed plans, funding, verification) abort the
//! current build or resolve pass. Network-classified errors are absorbed by the
//! broadcast driver and only surface here when nothing else can handle them.

use crate::backend::BackendError;
use crate::task::{TaskError, TaskId};
use crate::tx::SignError;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Cyclic dependency: no progress with tasks {pending:?} still pending")]
    CyclicDependency { pending: Vec<TaskId> },

    #[error("Malformed plan at task {task}: {reason}")]
    MalformedPlan { task: TaskId, reason: String },

    #[error(
        "Insufficient funds: {required} satoshis required, {provided} provided (short by {shortfall})"
    )]
    InsufficientFunds {
        required: u64,
        provided: u64,
        shortfall: u64,
    },

    #[error("Funding batch {batch} is underfunded: inputs {inputs} cannot cover outputs {outputs} plus fee {fee}")]
    UnderfundedBatch {
        batch: usize,
        inputs: u64,
        outputs: u64,
        fee: u64,
    },

    #[error("Verification failed: {0}")]
    Verification(#[from] VerificationError),

    #[error("Broadcast abandoned for {count} transactions; the signing key may be in use elsewhere")]
    Abandoned { count: usize },

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Signing error: {0}")]
    Sign(#[from] SignError),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Corrupt record {id} in {namespace}: {reason}")]
    CorruptRecord {
        namespace: &'static str,
        id: String,
        reason: String,
    },
}

/// First invariant violated by a resolved transaction set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerificationError {
    #[error("Transaction {txid} pays fee {fee} below its size of {size} bytes")]
    InsufficientFee { txid: String, fee: u64, size: usize },

    #[error("Transaction {txid} is not fully signed")]
    NotFullySigned { txid: String },

    #[error("Transaction {txid} is {size} bytes, above the {max} byte limit")]
    OversizedTransaction {
        txid: String,
        size: usize,
        max: usize,
    },
}
