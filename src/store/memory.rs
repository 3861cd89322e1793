// src/store/memory.rs

//! In-process store implementation.
//!
//! All rows sit behind one async mutex. A transaction holds the lock for its
//! whole lifetime and works on a staged copy of the workflow and task rows,
//! so transactions are trivially serializable and a dropped transaction
//! leaves no trace. The audit log is append-only and is not copied: a
//! transaction only stages the entries it appends.
//!
//! Copying the rows makes `begin` linear in the number of workflows and
//! tasks kept, which is fine for a single-process store but not for long
//! histories.
//!
//! In file mode the staged tables are written as a JSON snapshot
//! (temp file + rename) before the commit is made visible, and reloaded by
//! [`InMemoryStore::open_file`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize, Serializer};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use super::{
    AuditQuery, StoreError, StoreGateway, StoreResult, StoreTransaction, TaskOrder, TaskQuery,
    WorkflowQuery,
};
use crate::state::{AuditEntry, Task, TaskTransition, Workflow, WorkflowStatus};
use crate::types::{TaskId, WorkflowId};

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Tables {
    workflows: Vec<Workflow>,
    tasks: Vec<Task>,
    audit: Vec<AuditEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<Mutex<Tables>>,
    snapshot_path: Option<PathBuf>,
    /// Number of upcoming `begin`/`ping` calls that fail as if the store were
    /// unreachable.
    injected_failures: Arc<AtomicUsize>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a file-backed store, loading the snapshot at `path` if present.
    pub async fn open_file(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();

        let tables = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let tables: Tables = serde_json::from_slice(&bytes)?;
                info!(
                    path = ?path,
                    workflows = tables.workflows.len(),
                    tasks = tables.tasks.len(),
                    "loaded store snapshot"
                );
                tables
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = ?path, "no store snapshot yet; starting empty");
                Tables::default()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            tables: Arc::new(Mutex::new(tables)),
            snapshot_path: Some(path),
            injected_failures: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Make the next `n` calls to `begin`/`ping` fail with
    /// [`StoreError::Unavailable`].
    pub fn inject_failures(&self, n: usize) {
        self.injected_failures.store(n, Ordering::SeqCst);
    }

    /// Snapshot of every task row (all tenants), in insertion order.
    pub async fn all_tasks(&self) -> Vec<Task> {
        self.tables.lock().await.tasks.clone()
    }

    /// Snapshot of every audit row (all tenants), in insertion order.
    pub async fn all_audit(&self) -> Vec<AuditEntry> {
        self.tables.lock().await.audit.clone()
    }

    fn take_injected_failure(&self) -> bool {
        self.injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl StoreGateway for InMemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        if self.take_injected_failure() {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }

        let guard = Arc::clone(&self.tables).lock_owned().await;
        let staged = Tables {
            workflows: guard.workflows.clone(),
            tasks: guard.tasks.clone(),
            audit: Vec::new(),
        };
        Ok(Box::new(MemoryTransaction {
            guard,
            staged,
            snapshot_path: self.snapshot_path.clone(),
            closed: false,
        }))
    }

    async fn ping(&self) -> StoreResult<()> {
        if self.take_injected_failure() {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<Tables>,
    /// Working copy of workflows and tasks; `audit` holds only the entries
    /// appended in this transaction.
    staged: Tables,
    snapshot_path: Option<PathBuf>,
    closed: bool,
}

impl MemoryTransaction {
    fn tables(&mut self) -> StoreResult<&mut Tables> {
        if self.closed {
            return Err(StoreError::TransactionClosed);
        }
        Ok(&mut self.staged)
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn insert_workflow(&mut self, workflow: Workflow) -> StoreResult<()> {
        let tables = self.tables()?;
        if tables.workflows.iter().any(|w| w.id == workflow.id) {
            return Err(StoreError::Conflict {
                entity: "workflow",
                id: workflow.id,
            });
        }
        tables.workflows.push(workflow);
        Ok(())
    }

    async fn insert_task(&mut self, task: Task) -> StoreResult<()> {
        let tables = self.tables()?;
        if tables.tasks.iter().any(|t| t.id == task.id) {
            return Err(StoreError::Conflict {
                entity: "task",
                id: task.id,
            });
        }
        tables.tasks.push(task);
        Ok(())
    }

    async fn append_audit(&mut self, entry: AuditEntry) -> StoreResult<()> {
        self.tables()?.audit.push(entry);
        Ok(())
    }

    async fn get_workflow(&mut self, tenant: &str, id: WorkflowId) -> StoreResult<Option<Workflow>> {
        let tables = self.tables()?;
        Ok(tables
            .workflows
            .iter()
            .find(|w| w.id == id && w.tenant == tenant)
            .cloned())
    }

    async fn get_task(&mut self, tenant: &str, id: TaskId) -> StoreResult<Option<Task>> {
        let tables = self.tables()?;
        Ok(tables
            .tasks
            .iter()
            .find(|t| t.id == id && t.tenant == tenant)
            .cloned())
    }

    async fn query_workflows(&mut self, query: &WorkflowQuery) -> StoreResult<Vec<Workflow>> {
        let tables = self.tables()?;
        let mut rows: Vec<Workflow> = tables
            .workflows
            .iter()
            .filter(|w| query.matches(w))
            .cloned()
            .collect();
        rows.sort_by_key(|w| w.created_at);
        Ok(rows)
    }

    async fn query_tasks(&mut self, query: &TaskQuery) -> StoreResult<Vec<Task>> {
        let tables = self.tables()?;
        let mut rows: Vec<Task> = tables
            .tasks
            .iter()
            .filter(|t| query.matches(t))
            .cloned()
            .collect();

        // Stable sorts: ties keep insertion order (reversed for CompletedDesc
        // so the latest insert comes first).
        match query.order {
            TaskOrder::CreatedAsc => rows.sort_by_key(|t| t.created_at),
            TaskOrder::CompletedAsc => {
                rows.sort_by_key(|t| (t.completed_at.is_none(), t.completed_at))
            }
            TaskOrder::CompletedDesc => {
                rows.reverse();
                rows.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
            }
        }

        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn query_audit(&mut self, query: &AuditQuery) -> StoreResult<Vec<AuditEntry>> {
        if self.closed {
            return Err(StoreError::TransactionClosed);
        }
        Ok(self
            .guard
            .audit
            .iter()
            .chain(&self.staged.audit)
            .filter(|e| query.matches(e))
            .cloned()
            .collect())
    }

    async fn transition_task(
        &mut self,
        tenant: &str,
        transition: &TaskTransition,
    ) -> StoreResult<Option<Task>> {
        let tables = self.tables()?;
        let Some(task) = tables
            .tasks
            .iter_mut()
            .find(|t| t.id == transition.task_id && t.tenant == tenant)
        else {
            return Ok(None);
        };

        if task.status != transition.expected {
            debug!(
                task_id = %task.id,
                expected = %transition.expected,
                actual = %task.status,
                "conditional task update lost the race"
            );
            return Ok(None);
        }

        task.apply(transition, Utc::now())?;
        Ok(Some(task.clone()))
    }

    async fn finish_workflow(
        &mut self,
        tenant: &str,
        id: WorkflowId,
        status: WorkflowStatus,
    ) -> StoreResult<Option<Workflow>> {
        let tables = self.tables()?;
        let Some(wf) = tables
            .workflows
            .iter_mut()
            .find(|w| w.id == id && w.tenant == tenant)
        else {
            return Ok(None);
        };

        if wf.status != WorkflowStatus::Running {
            return Ok(None);
        }

        wf.finish(status, Utc::now())?;
        Ok(Some(wf.clone()))
    }

    async fn commit(&mut self) -> StoreResult<()> {
        if self.closed {
            return Err(StoreError::TransactionClosed);
        }

        if let Some(path) = &self.snapshot_path {
            let snapshot = SnapshotView {
                workflows: &self.staged.workflows,
                tasks: &self.staged.tasks,
                audit: AuditView(&self.guard.audit, &self.staged.audit),
            };
            persist_snapshot(path, &snapshot).await?;
        }

        let staged = std::mem::take(&mut self.staged);
        self.guard.workflows = staged.workflows;
        self.guard.tasks = staged.tasks;
        self.guard.audit.extend(staged.audit);
        self.closed = true;
        Ok(())
    }

    async fn rollback(&mut self) -> StoreResult<()> {
        if self.closed {
            return Err(StoreError::TransactionClosed);
        }
        self.closed = true;
        Ok(())
    }
}

/// Serializes like [`Tables`] without copying the committed audit log.
#[derive(Serialize)]
struct SnapshotView<'a> {
    workflows: &'a [Workflow],
    tasks: &'a [Task],
    audit: AuditView<'a>,
}

/// Committed entries followed by the ones staged for this commit.
struct AuditView<'a>(&'a [AuditEntry], &'a [AuditEntry]);

impl Serialize for AuditView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter().chain(self.1))
    }
}

async fn persist_snapshot(path: &Path, tables: &SnapshotView<'_>) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let bytes = serde_json::to_vec_pretty(tables)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        warn!(path = ?path, error = %e, "failed to move store snapshot into place");
        return Err(e.into());
    }
    Ok(())
}
