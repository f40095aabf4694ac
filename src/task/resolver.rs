//! Dependency resolver.
//!
//! Fixed-point iteration over the task graph: sign every ready task, then
//! materialize and promote every pending task whose dependencies resolved.
//!
//! # Termination
//! Every pass must resolve or promote at least one task. A pass with zero
//! progress while tasks remain unresolved is reported as a cycle, so an
//! N-task graph finishes (or fails) within N + 1 passes.

use tracing::{debug, info};

use super::set::TaskSet;
use super::task::{TaskId, TaskKind, TaskStatus};
use crate::error::UploadError;
use crate::tx::{Signer, Transaction, TxIn, TxOut};

/// Resolve every task in `set`, signing with `signer`.
///
/// # Preconditions
/// - `set.validate()` succeeded
/// - every non-resolved task carries a funding input
///
/// # Errors
/// - `MalformedPlan` if a ready task is unfunded
/// - `CyclicDependency` if a pass makes no progress
/// - signing failures from `signer`
pub async fn resolve(set: &mut TaskSet, signer: &dyn Signer) -> Result<usize, UploadError> {
    let mut passes = 0;
    while !set.all_resolved() {
        passes += 1;
        let resolved = sign_ready(set, signer).await?;
        let promoted = promote_pending(set)?;
        debug!(pass = passes, resolved, promoted, "Resolver pass finished");

        if resolved == 0 && promoted == 0 {
            let pending = set
                .iter()
                .filter(|t| !t.status().is_terminal())
                .map(|t| t.id())
                .collect();
            return Err(UploadError::CyclicDependency { pending });
        }
    }
    info!(tasks = set.len(), passes, "All tasks resolved");
    Ok(passes)
}

/// Build and sign every `Ready` task, in task order.
async fn sign_ready(set: &mut TaskSet, signer: &dyn Signer) -> Result<usize, UploadError> {
    let ready: Vec<TaskId> = set
        .iter()
        .filter(|t| t.status() == TaskStatus::Ready)
        .map(|t| t.id())
        .collect();

    for id in &ready {
        let mut tx = build_unsigned(set, *id)?;
        signer.sign(&mut tx).await?;
        if let Some(task) = set.get_mut(*id) {
            let kind = task.kind().label();
            let resolved = task.resolve(tx)?;
            debug!(task = %id, kind, txid = %resolved.txid, "Task resolved");
        }
        set.record_resolution(*id);
    }
    Ok(ready.len())
}

/// One input (the task's funding coin), one data output.
fn build_unsigned(set: &TaskSet, id: TaskId) -> Result<Transaction, UploadError> {
    let task = set.get(id).ok_or_else(|| UploadError::MalformedPlan {
        task: id,
        reason: "unknown task".to_string(),
    })?;
    let funding = task.funding_input().ok_or_else(|| UploadError::MalformedPlan {
        task: id,
        reason: "task has no funding input".to_string(),
    })?;

    let mut tx = Transaction::new();
    tx.inputs.push(TxIn::spending(&funding.coin));
    tx.outputs.push(TxOut::new(0, task.kind().output_script()?));
    Ok(tx)
}

/// Materialize payloads of pending tasks whose dependencies all resolved.
fn promote_pending(set: &mut TaskSet) -> Result<usize, UploadError> {
    // (task, dependency ids, first pointer-target id)
    let mut updates: Vec<(TaskId, Vec<String>, Option<String>)> = Vec::new();

    for task in set.iter().filter(|t| t.status() == TaskStatus::Pending) {
        let deps: Option<Vec<_>> = task
            .dependencies()
            .iter()
            .map(|dep| set.get(*dep).filter(|d| d.status().is_terminal()))
            .collect();
        let Some(deps) = deps else { continue };

        let ids = deps
            .iter()
            .filter_map(|d| d.resolved_id().map(str::to_string))
            .collect();
        let target = deps
            .iter()
            .find(|d| d.kind().is_pointer_target())
            .and_then(|d| d.resolved_id().map(str::to_string));
        updates.push((task.id(), ids, target));
    }

    let promoted = updates.len();
    for (id, ids, target) in updates {
        let Some(task) = set.get_mut(id) else { continue };
        match task.kind_mut() {
            TaskKind::ContentIndex { chunks, .. } => *chunks = ids,
            TaskKind::PointerRecord { value, .. } => {
                if value.is_none() {
                    *value = target;
                }
            }
            _ => {}
        }
        task.mark_ready()?;
    }
    Ok(promoted)
}
