//! Task graph container.
//!
//! # Invariants
//! - `tasks[i].id() == TaskId(i)`
//! - `funding_order` lists funding splits in batch order (split n+1 spends n's change)
//! - `resolution_order` lists non-funding tasks in the order they resolved

use super::task::{Task, TaskId, TaskKind, TaskStatus};
use crate::error::UploadError;
use crate::tx::Transaction;

/// A signed transaction ready for verification and broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub txid: String,
    pub task: TaskId,
    pub label: &'static str,
    pub tx: Transaction,
}

impl SignedTransaction {
    pub fn raw(&self) -> Vec<u8> {
        self.tx.serialize()
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskSet {
    tasks: Vec<Task>,
    funding_order: Vec<TaskId>,
    resolution_order: Vec<TaskId>,
}

impl TaskSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task. Its status is derived from `dependencies`.
    pub fn push(&mut self, kind: TaskKind, dependencies: Vec<TaskId>, estimated_cost: u64) -> TaskId {
        let id = TaskId(self.tasks.len());
        self.tasks.push(Task::new(id, kind, dependencies, estimated_cost));
        id
    }

    /// Add an already signed funding split, appended to the funding order.
    pub(crate) fn push_funding_split(&mut self, tx: Transaction, spent: u64) -> TaskId {
        let id = TaskId(self.tasks.len());
        self.tasks.push(Task::new_funding_split(id, tx, spent));
        self.funding_order.push(id);
        id
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(id.0)
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    /// Tasks the allocator must fund (everything but funding splits).
    pub fn fundable(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter().filter(|t| !t.is_funding_split())
    }

    pub fn funding_splits(&self) -> impl Iterator<Item = &Task> + '_ {
        self.funding_order.iter().filter_map(|id| self.get(*id))
    }

    pub fn count_with_status(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status() == status).count()
    }

    pub fn all_resolved(&self) -> bool {
        self.tasks.iter().all(|t| t.status().is_terminal())
    }

    pub(crate) fn record_resolution(&mut self, id: TaskId) {
        self.resolution_order.push(id);
    }

    /// Total value reserved across fundable tasks.
    pub fn total_estimated_cost(&self) -> u64 {
        self.fundable().map(|t| t.estimated_cost()).sum()
    }

    /// Structural checks run before funding and resolution.
    ///
    /// # Errors
    /// `MalformedPlan` for dangling or self dependencies, an index without
    /// chunks, an index depending on anything but chunks, or a pointer with
    /// neither a value nor a content dependency.
    pub fn validate(&self) -> Result<(), UploadError> {
        for task in &self.tasks {
            let malformed = |reason: String| UploadError::MalformedPlan {
                task: task.id(),
                reason,
            };
            for dep in task.dependencies() {
                if *dep == task.id() {
                    return Err(malformed("task depends on itself".to_string()));
                }
                if self.get(*dep).is_none() {
                    return Err(malformed(format!("unknown dependency {}", dep)));
                }
            }
            match task.kind() {
                TaskKind::ContentIndex { .. } => {
                    if task.dependencies().is_empty() {
                        return Err(malformed("content index has zero chunks".to_string()));
                    }
                    let non_chunk = task.dependencies().iter().find(|dep| {
                        !matches!(
                            self.get(**dep).map(Task::kind),
                            Some(TaskKind::ContentChunk { .. })
                        )
                    });
                    if let Some(dep) = non_chunk {
                        return Err(malformed(format!("index dependency {} is not a chunk", dep)));
                    }
                }
                TaskKind::PointerRecord { value: None, .. } => {
                    let has_target = task.dependencies().iter().any(|dep| {
                        self.get(*dep)
                            .is_some_and(|t| t.kind().is_pointer_target())
                    });
                    if !has_target {
                        return Err(malformed("pointer has no content dependency".to_string()));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Signed transactions with every funding split ahead of the tasks spending it.
    ///
    /// # Returns
    /// Funding splits in batch order, then tasks in resolution order.
    pub fn ordered_transactions(&self) -> Vec<SignedTransaction> {
        self.funding_order
            .iter()
            .chain(self.resolution_order.iter())
            .filter_map(|id| self.get(*id))
            .filter_map(|task| {
                task.resolved().map(|resolved| SignedTransaction {
                    txid: resolved.txid.clone(),
                    task: task.id(),
                    label: task.kind().label(),
                    tx: resolved.tx.clone(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(set: &mut TaskSet) -> TaskId {
        set.push(TaskKind::ContentChunk { data: vec![7; 10] }, Vec::new(), 546)
    }

    fn index(set: &mut TaskSet, deps: Vec<TaskId>) -> TaskId {
        set.push(
            TaskKind::ContentIndex {
                mime: "text/plain".into(),
                filename: "ab".into(),
                chunks: Vec::new(),
            },
            deps,
            546,
        )
    }

    #[test]
    fn zero_chunk_index_is_malformed() {
        let mut set = TaskSet::new();
        let id = index(&mut set, Vec::new());
        match set.validate() {
            Err(UploadError::MalformedPlan { task, .. }) => assert_eq!(task, id),
            other => panic!("expected MalformedPlan, got {:?}", other),
        }
    }

    #[test]
    fn dangling_dependency_is_malformed() {
        let mut set = TaskSet::new();
        index(&mut set, vec![TaskId(9)]);
        assert!(matches!(
            set.validate(),
            Err(UploadError::MalformedPlan { .. })
        ));
    }

    #[test]
    fn pointer_needs_content_dependency() {
        let mut set = TaskSet::new();
        let c = chunk(&mut set);
        set.push(
            TaskKind::PointerRecord {
                key: "a".into(),
                value: None,
                sequence: "1".into(),
            },
            vec![c],
            546,
        );
        assert!(matches!(
            set.validate(),
            Err(UploadError::MalformedPlan { .. })
        ));
    }

    #[test]
    fn well_formed_graph_validates() {
        let mut set = TaskSet::new();
        let a = chunk(&mut set);
        let b = chunk(&mut set);
        let idx = index(&mut set, vec![a, b]);
        set.push(
            TaskKind::PointerRecord {
                key: "a".into(),
                value: None,
                sequence: "1".into(),
            },
            vec![idx],
            546,
        );
        set.validate().expect("graph should validate");
        assert_eq!(set.count_with_status(TaskStatus::Ready), 2);
        assert_eq!(set.count_with_status(TaskStatus::Pending), 2);
        assert_eq!(set.total_estimated_cost(), 4 * 546);
    }
}
