//! Core Task type: one prospective on-chain write.
//!
//! # Invariants
//! - `resolved` is assigned exactly once and never reset
//! - `funding_input.coin.value >= estimated_cost`
//! - A task with dependencies starts `Pending`, otherwise `Ready`

use serde::{Deserialize, Serialize};

use crate::protocol;
use crate::tx::{Coin, Transaction};

/// Index of a task inside its [`TaskSet`](super::TaskSet).
///
/// # Properties
/// - Unique within one task set
/// - Stable for the lifetime of the set (tasks are never removed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub(crate) usize);

impl TaskId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Status of a task in its lifecycle.
///
/// # State Machine
/// ```text
/// Pending -> Ready -> Resolved
/// ```
/// There is no failure state; failures surface at broadcast time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Payload incomplete, waiting on dependencies
    Pending,
    /// Payload complete and funded, not yet built/signed
    Ready,
    /// Transaction built and signed, identifier known
    Resolved,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Resolved)
    }
}

/// Kind-specific payload.
///
/// # Exhaustive Matching
/// Adding a kind is a compile-time decision: every consumer matches all variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskKind {
    /// Small payload written directly
    Content {
        data: Vec<u8>,
        mime: String,
        /// Hex sha1 of `data`
        filename: String,
    },
    /// One fragment of an oversized payload
    ContentChunk { data: Vec<u8> },
    /// Ordered list of chunk identifiers; filled when its chunks resolve
    ContentIndex {
        mime: String,
        filename: String,
        chunks: Vec<String>,
    },
    /// Named key -> content identifier; `value` filled from the first content dependency
    PointerRecord {
        key: String,
        value: Option<String>,
        sequence: String,
    },
    /// Creates correctly sized outputs for other tasks
    FundingSplit,
}

impl TaskKind {
    pub fn label(&self) -> &'static str {
        match self {
            TaskKind::Content { .. } => "content",
            TaskKind::ContentChunk { .. } => "chunk",
            TaskKind::ContentIndex { .. } => "index",
            TaskKind::PointerRecord { .. } => "pointer",
            TaskKind::FundingSplit => "funding",
        }
    }

    /// Bytes the task's reservation is proportional to.
    pub fn cost_basis(&self, chunk_count: usize) -> u64 {
        match self {
            TaskKind::Content { data, .. } => data.len() as u64,
            TaskKind::ContentChunk { data } => data.len() as u64,
            TaskKind::ContentIndex { .. } => 64 * chunk_count as u64,
            TaskKind::PointerRecord { key, .. } => key.len() as u64 + 64,
            TaskKind::FundingSplit => 0,
        }
    }

    /// Content or index: a valid pointer target.
    pub fn is_pointer_target(&self) -> bool {
        matches!(
            self,
            TaskKind::Content { .. } | TaskKind::ContentIndex { .. }
        )
    }

    /// The data output this task writes.
    pub fn output_script(&self) -> Result<Vec<u8>, TaskError> {
        match self {
            TaskKind::Content {
                data,
                mime,
                filename,
            } => Ok(protocol::content_script(data, mime, filename)),
            TaskKind::ContentChunk { data } => Ok(protocol::chunk_script(data)),
            TaskKind::ContentIndex {
                mime,
                filename,
                chunks,
            } => {
                if chunks.is_empty() {
                    return Err(TaskError::Unmaterialized("index without chunks"));
                }
                protocol::index_script(mime, filename, chunks)
                    .map_err(|e| TaskError::Payload(e.to_string()))
            }
            TaskKind::PointerRecord {
                key,
                value,
                sequence,
            } => {
                let value = value
                    .as_deref()
                    .ok_or(TaskError::Unmaterialized("pointer without value"))?;
                Ok(protocol::pointer_script(key, value, sequence))
            }
            TaskKind::FundingSplit => Err(TaskError::Payload(
                "funding splits carry no data output".to_string(),
            )),
        }
    }
}

/// The coin a task will spend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingInput {
    pub coin: Coin,
    /// Funding split that created the coin
    pub split: Option<TaskId>,
}

/// A built and signed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTx {
    pub txid: String,
    pub tx: Transaction,
}

impl ResolvedTx {
    pub fn new(tx: Transaction) -> Self {
        Self {
            txid: tx.txid(),
            tx,
        }
    }
}

/// A prospective on-chain write.
///
/// # Design for Provability
/// - Fields are private; status changes only through the transition methods
/// - `resolve` is the only writer of `resolved` and refuses a second call
#[derive(Debug, Clone)]
pub struct Task {
    id: TaskId,
    kind: TaskKind,
    status: TaskStatus,
    dependencies: Vec<TaskId>,
    funding_input: Option<FundingInput>,
    estimated_cost: u64,
    resolved: Option<ResolvedTx>,
}

impl Task {
    /// Create a task.
    ///
    /// # Postconditions
    /// - `status == Ready` if `dependencies` is empty, else `Pending`
    pub(crate) fn new(
        id: TaskId,
        kind: TaskKind,
        dependencies: Vec<TaskId>,
        estimated_cost: u64,
    ) -> Self {
        let status = if dependencies.is_empty() {
            TaskStatus::Ready
        } else {
            TaskStatus::Pending
        };
        Self {
            id,
            kind,
            status,
            dependencies,
            funding_input: None,
            estimated_cost,
            resolved: None,
        }
    }

    /// Create a funding split that is already signed.
    pub(crate) fn new_funding_split(id: TaskId, tx: Transaction, spent: u64) -> Self {
        Self {
            id,
            kind: TaskKind::FundingSplit,
            status: TaskStatus::Resolved,
            dependencies: Vec::new(),
            funding_input: None,
            estimated_cost: spent,
            resolved: Some(ResolvedTx::new(tx)),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn kind(&self) -> &TaskKind {
        &self.kind
    }

    pub(crate) fn kind_mut(&mut self) -> &mut TaskKind {
        &mut self.kind
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn dependencies(&self) -> &[TaskId] {
        &self.dependencies
    }

    pub fn funding_input(&self) -> Option<&FundingInput> {
        self.funding_input.as_ref()
    }

    pub fn estimated_cost(&self) -> u64 {
        self.estimated_cost
    }

    pub fn resolved(&self) -> Option<&ResolvedTx> {
        self.resolved.as_ref()
    }

    pub fn resolved_id(&self) -> Option<&str> {
        self.resolved.as_ref().map(|r| r.txid.as_str())
    }

    pub fn is_funding_split(&self) -> bool {
        matches!(self.kind, TaskKind::FundingSplit)
    }

    /// Wire the coin this task will spend.
    ///
    /// # Errors
    /// Returns `Err` if the coin cannot cover `estimated_cost` or the task is
    /// already resolved.
    pub fn assign_funding(&mut self, funding: FundingInput) -> Result<(), TaskError> {
        if self.status.is_terminal() {
            return Err(TaskError::AlreadyResolved(self.id));
        }
        if funding.coin.value < self.estimated_cost {
            return Err(TaskError::FundingTooSmall {
                task: self.id,
                value: funding.coin.value,
                required: self.estimated_cost,
            });
        }
        self.funding_input = Some(funding);
        Ok(())
    }

    // State transitions - explicit and validated

    /// Transition `Pending -> Ready` once the payload is materialized.
    pub(crate) fn mark_ready(&mut self) -> Result<(), TaskError> {
        match self.status {
            TaskStatus::Pending => {
                self.status = TaskStatus::Ready;
                Ok(())
            }
            other => Err(TaskError::InvalidTransition {
                task: self.id,
                from: other,
                to: TaskStatus::Ready,
            }),
        }
    }

    /// Transition `Ready -> Resolved`, recording the signed transaction.
    pub(crate) fn resolve(&mut self, tx: Transaction) -> Result<&ResolvedTx, TaskError> {
        if self.resolved.is_some() {
            return Err(TaskError::AlreadyResolved(self.id));
        }
        match self.status {
            TaskStatus::Ready => {
                self.status = TaskStatus::Resolved;
                let resolved = self.resolved.insert(ResolvedTx::new(tx));
                Ok(&*resolved)
            }
            other => Err(TaskError::InvalidTransition {
                task: self.id,
                from: other,
                to: TaskStatus::Resolved,
            }),
        }
    }
}

/// Errors that can occur during task operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    #[error("Invalid state transition for task {task} from {from:?} to {to:?}")]
    InvalidTransition {
        task: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Task {0} is already resolved")]
    AlreadyResolved(TaskId),

    #[error("Funding of {value} satoshis for task {task} is below its reserved cost of {required}")]
    FundingTooSmall {
        task: TaskId,
        value: u64,
        required: u64,
    },

    #[error("Payload not materialized: {0}")]
    Unmaterialized(&'static str),

    #[error("Invalid payload: {0}")]
    Payload(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: usize) -> Task {
        Task::new(
            TaskId(id),
            TaskKind::ContentChunk { data: vec![1, 2, 3] },
            Vec::new(),
            546,
        )
    }

    #[test]
    fn status_follows_dependencies() {
        assert_eq!(chunk(0).status(), TaskStatus::Ready);
        let index = Task::new(
            TaskId(1),
            TaskKind::ContentIndex {
                mime: "text/plain".into(),
                filename: "abc".into(),
                chunks: Vec::new(),
            },
            vec![TaskId(0)],
            546,
        );
        assert_eq!(index.status(), TaskStatus::Pending);
    }

    #[test]
    fn funding_below_cost_is_rejected() {
        let mut task = chunk(0);
        let err = task
            .assign_funding(FundingInput {
                coin: Coin::new("aa".repeat(32), 0, 100),
                split: None,
            })
            .unwrap_err();
        assert!(matches!(err, TaskError::FundingTooSmall { required: 546, .. }));
    }

    #[test]
    fn resolve_happens_once() {
        let mut task = chunk(0);
        task.resolve(Transaction::new()).expect("first resolve");
        assert_eq!(task.status(), TaskStatus::Resolved);
        assert!(matches!(
            task.resolve(Transaction::new()),
            Err(TaskError::AlreadyResolved(_))
        ));
    }

    #[test]
    fn pending_task_cannot_resolve() {
        let mut task = Task::new(
            TaskId(2),
            TaskKind::PointerRecord {
                key: "a".into(),
                value: None,
                sequence: "1".into(),
            },
            vec![TaskId(0)],
            546,
        );
        assert!(matches!(
            task.resolve(Transaction::new()),
            Err(TaskError::InvalidTransition { .. })
        ));
        task.mark_ready().unwrap();
        assert!(matches!(
            task.mark_ready(),
            Err(TaskError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn unmaterialized_pointer_has_no_script() {
        let kind = TaskKind::PointerRecord {
            key: "a".into(),
            value: None,
            sequence: "1".into(),
        };
        assert!(matches!(
            kind.output_script(),
            Err(TaskError::Unmaterialized(_))
        ));
    }
}
