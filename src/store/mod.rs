// src/store/mod.rs

//! Store gateway contract.
//!
//! The coordinator and every worker talk to shared state exclusively through
//! [`StoreGateway`] / [`StoreTransaction`]. The contract the engine relies on:
//!
//! - transactions are serializable: `begin` .. `commit` either applies every
//!   write or none (dropping a transaction without committing rolls it back);
//! - [`StoreTransaction::transition_task`] and
//!   [`StoreTransaction::finish_workflow`] are compare-and-swap updates on the
//!   status column; they report whether the row still had the expected status
//!   and never overwrite a row that moved underneath the caller;
//! - queries are typed and parameterized ([`TaskQuery`], [`WorkflowQuery`],
//!   [`AuditQuery`]) and always scoped to one tenant.
//!
//! [`memory::InMemoryStore`] is the in-process implementation.

pub mod memory;

pub use memory::InMemoryStore;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::state::{
    AuditAction, AuditEntry, InvalidTransition, Task, TaskStatus, TaskTransition, Workflow,
    WorkflowStatus,
};
use crate::types::{TaskId, TenantId, WorkerId, WorkflowId};

#[derive(Error, Debug)]
pub enum StoreError {
    /// Connection-level failure; the operation may succeed if retried later.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("duplicate {entity} id {id}")]
    Conflict { entity: &'static str, id: Uuid },

    #[error("transaction already committed or rolled back")]
    TransactionClosed,

    #[error("rejected update: {0}")]
    Rejected(#[from] InvalidTransition),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Errors the coordination loop should log and ride out.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Io(_))
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Entry point into the shared state.
#[async_trait]
pub trait StoreGateway: Send + Sync + fmt::Debug {
    /// Open a serializable transaction.
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>>;

    /// Cheap reachability probe used by health checks.
    async fn ping(&self) -> StoreResult<()>;
}

/// One open transaction against the store.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn insert_workflow(&mut self, workflow: Workflow) -> StoreResult<()>;

    async fn insert_task(&mut self, task: Task) -> StoreResult<()>;

    /// Append-only; audit entries are never updated or deleted.
    async fn append_audit(&mut self, entry: AuditEntry) -> StoreResult<()>;

    async fn get_workflow(&mut self, tenant: &str, id: WorkflowId) -> StoreResult<Option<Workflow>>;

    async fn get_task(&mut self, tenant: &str, id: TaskId) -> StoreResult<Option<Task>>;

    async fn query_workflows(&mut self, query: &WorkflowQuery) -> StoreResult<Vec<Workflow>>;

    async fn query_tasks(&mut self, query: &TaskQuery) -> StoreResult<Vec<Task>>;

    async fn query_audit(&mut self, query: &AuditQuery) -> StoreResult<Vec<AuditEntry>>;

    /// Conditional status update.
    ///
    /// Returns the updated row if the task existed in `tenant` with status
    /// `transition.expected`, `None` otherwise.
    async fn transition_task(
        &mut self,
        tenant: &str,
        transition: &TaskTransition,
    ) -> StoreResult<Option<Task>>;

    /// Conditional `running -> status` update on a workflow, stamping the
    /// completion time. Returns `None` if the workflow was not running.
    async fn finish_workflow(
        &mut self,
        tenant: &str,
        id: WorkflowId,
        status: WorkflowStatus,
    ) -> StoreResult<Option<Workflow>>;

    async fn commit(&mut self) -> StoreResult<()>;

    async fn rollback(&mut self) -> StoreResult<()>;
}

/// Result ordering for [`TaskQuery`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskOrder {
    /// Oldest first; ties keep insertion order.
    #[default]
    CreatedAsc,
    /// Earliest completion first; unfinished tasks last.
    CompletedAsc,
    /// Latest completion first; among equal times the latest insert wins.
    CompletedDesc,
}

/// Parameterized task query. Unset filters match everything.
#[derive(Debug, Clone, Default)]
pub struct TaskQuery {
    pub tenant: TenantId,
    pub workflow_id: Option<WorkflowId>,
    pub worker_id: Option<WorkerId>,
    pub task_type: Option<String>,
    /// Empty means any status.
    pub statuses: Vec<TaskStatus>,
    pub data_key: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub order: TaskOrder,
    pub limit: Option<usize>,
}

impl TaskQuery {
    pub fn for_tenant(tenant: impl Into<TenantId>) -> Self {
        Self {
            tenant: tenant.into(),
            ..Self::default()
        }
    }

    pub fn in_workflow(mut self, id: WorkflowId) -> Self {
        self.workflow_id = Some(id);
        self
    }

    pub fn owned_by(mut self, worker: impl Into<WorkerId>) -> Self {
        self.worker_id = Some(worker.into());
        self
    }

    pub fn of_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn with_data_key(mut self, key: impl Into<String>) -> Self {
        self.data_key = Some(key.into());
        self
    }

    pub fn created_after(mut self, at: DateTime<Utc>) -> Self {
        self.created_after = Some(at);
        self
    }

    pub fn order_by(mut self, order: TaskOrder) -> Self {
        self.order = order;
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Row predicate (ordering and limit are applied by the store).
    pub fn matches(&self, task: &Task) -> bool {
        task.tenant == self.tenant
            && self.workflow_id.is_none_or(|id| task.workflow_id == id)
            && self.worker_id.as_ref().is_none_or(|w| &task.worker_id == w)
            && self.task_type.as_ref().is_none_or(|t| &task.task_type == t)
            && (self.statuses.is_empty() || self.statuses.contains(&task.status))
            && self.data_key.as_deref().is_none_or(|k| task.data_key() == Some(k))
            && self.created_after.is_none_or(|at| task.created_at > at)
    }
}

#[derive(Debug, Clone, Default)]
pub struct WorkflowQuery {
    pub tenant: TenantId,
    pub status: Option<WorkflowStatus>,
    pub workflow_type: Option<String>,
}

impl WorkflowQuery {
    pub fn for_tenant(tenant: impl Into<TenantId>) -> Self {
        Self {
            tenant: tenant.into(),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: WorkflowStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn of_type(mut self, workflow_type: impl Into<String>) -> Self {
        self.workflow_type = Some(workflow_type.into());
        self
    }

    pub fn matches(&self, wf: &Workflow) -> bool {
        wf.tenant == self.tenant
            && self.status.is_none_or(|s| wf.status == s)
            && self.workflow_type.as_ref().is_none_or(|t| &wf.workflow_type == t)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub tenant: TenantId,
    pub actor: Option<WorkerId>,
    pub action: Option<AuditAction>,
}

impl AuditQuery {
    pub fn for_tenant(tenant: impl Into<TenantId>) -> Self {
        Self {
            tenant: tenant.into(),
            ..Self::default()
        }
    }

    pub fn by_actor(mut self, actor: impl Into<WorkerId>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn matches(&self, entry: &AuditEntry) -> bool {
        entry.tenant == self.tenant
            && self.actor.as_ref().is_none_or(|a| &entry.actor == a)
            && self.action.is_none_or(|a| entry.action == a)
    }
}
