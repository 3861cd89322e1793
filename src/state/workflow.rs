// src/state/workflow.rs

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::InvalidTransition;
use crate::types::{Payload, TenantId, WorkflowId};

/// Lifecycle of a workflow.
///
/// `Running` is initial (a workflow is created directly in this state);
/// `Completed` and `Failed` are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Running,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Failed)
    }

    /// Whether moving from `self` to `next` is a legal lifecycle step.
    pub fn can_transition_to(self, next: WorkflowStatus) -> bool {
        matches!(
            (self, next),
            (WorkflowStatus::Running, WorkflowStatus::Completed)
                | (WorkflowStatus::Running, WorkflowStatus::Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowStatus::Running => "running",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One instantiation of a named workflow template within a tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub tenant: TenantId,
    pub workflow_type: String,
    /// Caller-supplied context, opaque to the coordinator.
    pub context: Payload,
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
    /// Set exactly when `status` becomes terminal.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Workflow {
    /// A fresh workflow in `running` state.
    pub fn new(tenant: impl Into<TenantId>, workflow_type: impl Into<String>, context: Payload) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant: tenant.into(),
            workflow_type: workflow_type.into(),
            context,
            status: WorkflowStatus::Running,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Move the workflow to a terminal status, stamping the completion time.
    pub fn finish(&mut self, status: WorkflowStatus, at: DateTime<Utc>) -> Result<(), InvalidTransition> {
        if !status.is_terminal() || !self.status.can_transition_to(status) {
            return Err(InvalidTransition {
                entity: "workflow",
                from: self.status.to_string(),
                to: status.to_string(),
            });
        }
        self.status = status;
        self.completed_at = Some(at);
        Ok(())
    }

    /// Completion time is set if and only if the status is terminal.
    pub fn is_consistent(&self) -> bool {
        self.completed_at.is_some() == self.status.is_terminal()
    }
}
