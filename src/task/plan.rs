//! Content plan and its expansion into a task graph.
//!
//! A plan lists, per file key, whether the content must be uploaded, only
//! re-pointed at an existing on-chain record, or left alone.

use serde::{Deserialize, Serialize};

use super::set::TaskSet;
use super::task::{TaskId, TaskKind};
use crate::funding::FeePolicy;
use crate::util::sha1_hex;

/// One desired file: its key, bytes and MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub key: String,
    pub data: Vec<u8>,
    pub mime: String,
}

impl FileEntry {
    pub fn new(key: impl Into<String>, data: Vec<u8>, mime: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            data,
            mime: mime.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanItem {
    /// Content not found on chain
    Upload {
        key: String,
        data: Vec<u8>,
        mime: String,
    },
    /// Content exists, but the latest pointer for `key` differs
    Repoint { key: String, identifier: String },
    /// Content exists and `key` already points at it
    Unchanged { key: String, identifier: String },
}

impl PlanItem {
    pub fn key(&self) -> &str {
        match self {
            PlanItem::Upload { key, .. }
            | PlanItem::Repoint { key, .. }
            | PlanItem::Unchanged { key, .. } => key,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentPlan {
    pub items: Vec<PlanItem>,
}

impl ContentPlan {
    pub fn new(items: Vec<PlanItem>) -> Self {
        Self { items }
    }

    /// Whether the plan writes anything at all.
    pub fn has_work(&self) -> bool {
        self.items
            .iter()
            .any(|item| !matches!(item, PlanItem::Unchanged { .. }))
    }
}

/// Knobs for turning a plan into tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadParams {
    /// Payloads longer than this are split into chunks plus an index
    pub chunk_size: usize,
    /// Skip on-chain dedup lookups
    pub quick: bool,
}

impl Default for UploadParams {
    fn default() -> Self {
        Self {
            chunk_size: 64_000,
            quick: false,
        }
    }
}

/// Expand `plan` into a task graph with reserved costs.
///
/// # Preconditions
/// - `params.chunk_size > 0`
///
/// # Postconditions
/// - Each uploaded file yields one Content task, or `ceil(len / chunk_size)`
///   chunk tasks plus one index depending on them in byte order
/// - Each uploaded or repointed key yields one pointer record; unchanged keys
///   yield nothing
pub fn tasks_from_plan(
    plan: &ContentPlan,
    params: &UploadParams,
    policy: &FeePolicy,
    sequence: &str,
) -> TaskSet {
    let mut set = TaskSet::new();
    let chunk_size = params.chunk_size.max(1);

    for item in &plan.items {
        match item {
            PlanItem::Upload { key, data, mime } => {
                let target = push_content(&mut set, data, mime, chunk_size, policy);
                push_pointer(&mut set, key, None, vec![target], sequence, policy);
            }
            PlanItem::Repoint { key, identifier } => {
                push_pointer(
                    &mut set,
                    key,
                    Some(identifier.clone()),
                    Vec::new(),
                    sequence,
                    policy,
                );
            }
            PlanItem::Unchanged { .. } => {}
        }
    }
    set
}

fn push_content(
    set: &mut TaskSet,
    data: &[u8],
    mime: &str,
    chunk_size: usize,
    policy: &FeePolicy,
) -> TaskId {
    let filename = sha1_hex(data);
    if data.len() <= chunk_size {
        let kind = TaskKind::Content {
            data: data.to_vec(),
            mime: mime.to_string(),
            filename,
        };
        let cost = policy.reserve(kind.cost_basis(0));
        return set.push(kind, Vec::new(), cost);
    }

    let chunks: Vec<TaskId> = data
        .chunks(chunk_size)
        .map(|piece| {
            let kind = TaskKind::ContentChunk {
                data: piece.to_vec(),
            };
            let cost = policy.reserve(kind.cost_basis(0));
            set.push(kind, Vec::new(), cost)
        })
        .collect();

    let kind = TaskKind::ContentIndex {
        mime: mime.to_string(),
        filename,
        chunks: Vec::new(),
    };
    let cost = policy.reserve(kind.cost_basis(chunks.len()));
    set.push(kind, chunks, cost)
}

fn push_pointer(
    set: &mut TaskSet,
    key: &str,
    value: Option<String>,
    dependencies: Vec<TaskId>,
    sequence: &str,
    policy: &FeePolicy,
) -> TaskId {
    let kind = TaskKind::PointerRecord {
        key: key.to_string(),
        value,
        sequence: sequence.to_string(),
    };
    let cost = policy.reserve(kind.cost_basis(0));
    set.push(kind, dependencies, cost)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskStatus;

    fn upload(key: &str, len: usize) -> PlanItem {
        PlanItem::Upload {
            key: key.to_string(),
            data: (0..len).map(|i| (i % 251) as u8).collect(),
            mime: "application/octet-stream".to_string(),
        }
    }

    #[test]
    fn large_file_is_chunked_with_index() {
        let plan = ContentPlan::new(vec![upload("big.bin", 200 * 1024)]);
        let set = tasks_from_plan(&plan, &UploadParams::default(), &FeePolicy::default(), "1");

        let labels: Vec<_> = set.iter().map(|t| t.kind().label()).collect();
        assert_eq!(
            labels,
            vec!["chunk", "chunk", "chunk", "chunk", "index", "pointer"]
        );
        let index = set.get(TaskId(4)).expect("index task");
        assert_eq!(
            index.dependencies(),
            &[TaskId(0), TaskId(1), TaskId(2), TaskId(3)]
        );
        assert_eq!(index.estimated_cost(), 64 * 4 + 400);
        let pointer = set.get(TaskId(5)).expect("pointer task");
        assert_eq!(pointer.dependencies(), &[TaskId(4)]);
        assert_eq!(pointer.status(), TaskStatus::Pending);
        set.validate().expect("plan should validate");
    }

    #[test]
    fn small_file_is_single_content_task() {
        let plan = ContentPlan::new(vec![upload("a.txt", 100)]);
        let set = tasks_from_plan(&plan, &UploadParams::default(), &FeePolicy::default(), "1");
        assert_eq!(set.len(), 2);
        match set.get(TaskId(0)).map(|t| t.kind()) {
            Some(TaskKind::Content { filename, .. }) => assert_eq!(filename.len(), 40),
            other => panic!("expected content task, got {:?}", other),
        }
        assert_eq!(set.get(TaskId(0)).map(|t| t.estimated_cost()), Some(546));
    }

    #[test]
    fn repoint_is_ready_pointer() {
        let plan = ContentPlan::new(vec![
            PlanItem::Repoint {
                key: "a.txt".into(),
                identifier: "ab".repeat(32),
            },
            PlanItem::Unchanged {
                key: "b.txt".into(),
                identifier: "cd".repeat(32),
            },
        ]);
        assert!(plan.has_work());
        let set = tasks_from_plan(&plan, &UploadParams::default(), &FeePolicy::default(), "1");
        assert_eq!(set.len(), 1);
        assert_eq!(set.get(TaskId(0)).map(|t| t.status()), Some(TaskStatus::Ready));
    }

    #[test]
    fn unchanged_only_plan_is_empty() {
        let plan = ContentPlan::new(vec![PlanItem::Unchanged {
            key: "b.txt".into(),
            identifier: "cd".repeat(32),
        }]);
        assert!(!plan.has_work());
        let set = tasks_from_plan(&plan, &UploadParams::default(), &FeePolicy::default(), "1");
        assert!(set.is_empty());
    }
}
