// src/state/task.rs

//! Coordination entries and the task lifecycle.
//!
//! ```text
//! pending -> assigned -> running -> completed
//!    |          |           \----> failed
//!    |          \----------------> failed   (execution failed to start)
//!    \---------------------------> failed   (operator intervention)
//! ```
//!
//! Data-sharing entries (`task_type = "data_storage"`) are written directly
//! in `completed` and never pass through the dispatch states.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::InvalidTransition;
use crate::types::{
    DATA_KEY_FIELD, DATA_STORAGE_TASK_TYPE, Payload, TaskId, TenantId, WorkerId, WorkflowId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Assigned,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// `pending`, `assigned` or `running`: the workflow cannot finish yet.
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Assigned)
                | (Pending, Failed)
                | (Assigned, Running)
                | (Assigned, Failed)
                | (Running, Completed)
                | (Running, Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Assigned => "assigned",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of work performed by exactly one worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub workflow_id: WorkflowId,
    pub tenant: TenantId,
    /// Worker responsible for executing this task.
    pub worker_id: WorkerId,
    pub task_type: String,
    pub payload: Payload,
    /// Worker ids (not task ids) that must each have a completed task in the
    /// same workflow before this task is eligible for dispatch.
    pub dependencies: Vec<WorkerId>,
    pub status: TaskStatus,
    pub result: Option<Payload>,
    pub error: Option<Payload>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// A new dispatchable task in `pending` state.
    pub fn pending(
        tenant: impl Into<TenantId>,
        workflow_id: WorkflowId,
        worker_id: impl Into<WorkerId>,
        task_type: impl Into<String>,
        payload: Payload,
        dependencies: Vec<WorkerId>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            tenant: tenant.into(),
            worker_id: worker_id.into(),
            task_type: task_type.into(),
            payload,
            dependencies: dedup_preserving_order(dependencies),
            status: TaskStatus::Pending,
            result: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// A data-sharing entry: already `completed`, carrying `data` as result.
    pub fn data_entry(
        tenant: impl Into<TenantId>,
        workflow_id: WorkflowId,
        worker_id: impl Into<WorkerId>,
        data_key: &str,
        data: Payload,
    ) -> Self {
        let now = Utc::now();
        let mut payload = serde_json::Map::new();
        payload.insert(DATA_KEY_FIELD.to_string(), Payload::String(data_key.to_string()));

        Self {
            id: Uuid::new_v4(),
            workflow_id,
            tenant: tenant.into(),
            worker_id: worker_id.into(),
            task_type: DATA_STORAGE_TASK_TYPE.to_string(),
            payload: Payload::Object(payload),
            dependencies: Vec::new(),
            status: TaskStatus::Completed,
            result: Some(non_null(data)),
            error: None,
            created_at: now,
            completed_at: Some(now),
        }
    }

    pub fn is_data_entry(&self) -> bool {
        self.task_type == DATA_STORAGE_TASK_TYPE
    }

    /// The data key of a data-sharing entry.
    pub fn data_key(&self) -> Option<&str> {
        if !self.is_data_entry() {
            return None;
        }
        self.payload.get(DATA_KEY_FIELD).and_then(|v| v.as_str())
    }

    /// Apply a conditional transition in place.
    ///
    /// The caller is responsible for having checked `expected` against the
    /// current status (that is the store's compare-and-swap); this method
    /// enforces the lifecycle table and the payload exclusivity rule.
    pub fn apply(&mut self, transition: &TaskTransition, at: DateTime<Utc>) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(transition.next) {
            return Err(InvalidTransition {
                entity: "task",
                from: self.status.to_string(),
                to: transition.next.to_string(),
            });
        }

        self.status = transition.next;
        match transition.next {
            TaskStatus::Completed => {
                self.result = Some(non_null(transition.result.clone().unwrap_or(Payload::Null)));
                self.error = None;
                self.completed_at = Some(at);
            }
            TaskStatus::Failed => {
                self.result = None;
                self.error = Some(non_null(transition.error.clone().unwrap_or(Payload::Null)));
                self.completed_at = Some(at);
            }
            TaskStatus::Pending | TaskStatus::Assigned | TaskStatus::Running => {}
        }
        Ok(())
    }

    /// `completed` carries only a result, `failed` only an error, and every
    /// other status neither.
    pub fn payloads_consistent(&self) -> bool {
        match self.status {
            TaskStatus::Completed => self.result.is_some() && self.error.is_none(),
            TaskStatus::Failed => self.result.is_none() && self.error.is_some(),
            _ => self.result.is_none() && self.error.is_none(),
        }
    }

    /// Seconds between creation and completion, once terminal.
    pub fn execution_secs(&self) -> Option<f64> {
        let done = self.completed_at?;
        Some((done - self.created_at).num_milliseconds() as f64 / 1000.0)
    }
}

/// A compare-and-swap request on a task's status.
///
/// Applied only if the stored status still equals `expected`.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskTransition {
    pub task_id: TaskId,
    pub expected: TaskStatus,
    pub next: TaskStatus,
    pub result: Option<Payload>,
    pub error: Option<Payload>,
}

impl TaskTransition {
    /// `pending -> assigned`: the dispatcher's claim.
    pub fn claim(task_id: TaskId) -> Self {
        Self::bare(task_id, TaskStatus::Pending, TaskStatus::Assigned)
    }

    /// `assigned -> running`: the worker picked the task up.
    pub fn start(task_id: TaskId) -> Self {
        Self::bare(task_id, TaskStatus::Assigned, TaskStatus::Running)
    }

    /// `running -> completed` with a result payload.
    pub fn complete(task_id: TaskId, result: Payload) -> Self {
        Self {
            result: Some(result),
            ..Self::bare(task_id, TaskStatus::Running, TaskStatus::Completed)
        }
    }

    /// `<expected> -> failed` with an error payload.
    pub fn fail(task_id: TaskId, expected: TaskStatus, error: Payload) -> Self {
        Self {
            error: Some(error),
            ..Self::bare(task_id, expected, TaskStatus::Failed)
        }
    }

    fn bare(task_id: TaskId, expected: TaskStatus, next: TaskStatus) -> Self {
        Self {
            task_id,
            expected,
            next,
            result: None,
            error: None,
        }
    }
}

fn non_null(value: Payload) -> Payload {
    if value.is_null() {
        Payload::Object(serde_json::Map::new())
    } else {
        value
    }
}

fn dedup_preserving_order(deps: Vec<WorkerId>) -> Vec<WorkerId> {
    let mut out: Vec<WorkerId> = Vec::with_capacity(deps.len());
    for dep in deps {
        if !out.contains(&dep) {
            out.push(dep);
        }
    }
    out
}
