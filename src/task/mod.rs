//! Task module - the graph of prospective on-chain writes.
//!
//! Task kinds are a closed enum matched exhaustively. Status transitions are
//! guarded by `Task` itself; graph construction and verification never sign,
//! only the resolver does.

pub mod plan;
pub mod resolver;
mod set;
pub mod task;
mod verification;

pub use plan::{tasks_from_plan, ContentPlan, FileEntry, PlanItem, UploadParams};
pub use set::{SignedTransaction, TaskSet};
pub use task::{FundingInput, ResolvedTx, Task, TaskError, TaskId, TaskKind, TaskStatus};
pub use verification::Verifier;
