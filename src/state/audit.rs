// src/state/audit.rs

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Payload, TenantId, WorkerId};

/// Tag describing what an audit entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    WorkflowStarted,
    WorkflowCompleted,
    TaskStatusChanged,
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    TaskDispatchFailed,
    WorkflowDataStored,
    WorkerStarted,
    WorkerStopped,
    OperatorIntervention,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::WorkflowStarted => "workflow_started",
            AuditAction::WorkflowCompleted => "workflow_completed",
            AuditAction::TaskStatusChanged => "task_status_changed",
            AuditAction::TaskStarted => "task_started",
            AuditAction::TaskCompleted => "task_completed",
            AuditAction::TaskFailed => "task_failed",
            AuditAction::TaskDispatchFailed => "task_dispatch_failed",
            AuditAction::WorkflowDataStored => "workflow_data_stored",
            AuditAction::WorkerStarted => "worker_started",
            AuditAction::WorkerStopped => "worker_stopped",
            AuditAction::OperatorIntervention => "operator_intervention",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of one state-changing action.
///
/// References to workflows and tasks live inside `payload`; nothing in the
/// scheduling path ever reads these back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub tenant: TenantId,
    /// Worker id, or [`crate::types::COORDINATOR_ACTOR`].
    pub actor: WorkerId,
    pub action: AuditAction,
    pub payload: Payload,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        tenant: impl Into<TenantId>,
        actor: impl Into<WorkerId>,
        action: AuditAction,
        payload: Payload,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant: tenant.into(),
            actor: actor.into(),
            action,
            payload,
            recorded_at: Utc::now(),
        }
    }
}
