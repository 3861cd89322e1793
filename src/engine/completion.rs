// src/engine/completion.rs

//! Workflow completion.
//!
//! A running workflow finishes once none of its tasks is pending, assigned
//! or running. It finishes `failed` if any task failed, `completed`
//! otherwise. A workflow with no tasks at all counts as finished.

use serde_json::json;
use tracing::info;

use super::audit::AuditRecorder;
use crate::state::{AuditAction, Task, TaskStatus, Workflow, WorkflowStatus};
use crate::store::{StoreGateway, StoreResult, TaskQuery, WorkflowQuery};
use crate::types::COORDINATOR_ACTOR;

/// Terminal status `tasks` imply for their workflow, or `None` while any is
/// still active.
pub fn evaluate_completion(tasks: &[Task]) -> Option<WorkflowStatus> {
    if tasks.iter().any(|t| t.status.is_active()) {
        return None;
    }
    if tasks.iter().any(|t| t.status == TaskStatus::Failed) {
        Some(WorkflowStatus::Failed)
    } else {
        Some(WorkflowStatus::Completed)
    }
}

/// Finish every running workflow of the tenant whose tasks are all terminal.
///
/// Runs in one transaction. Each finish is conditional on the workflow still
/// being `running`, so two coordinators racing here record a single
/// `workflow_completed` entry per workflow. Returns the workflows this call
/// finished.
pub async fn finish_workflows(
    store: &dyn StoreGateway,
    audit: &AuditRecorder,
) -> StoreResult<Vec<Workflow>> {
    let tenant = audit.tenant().to_string();
    let mut tx = store.begin().await?;

    let running = tx
        .query_workflows(&WorkflowQuery::for_tenant(&tenant).with_status(WorkflowStatus::Running))
        .await?;

    let mut finished = Vec::new();
    for workflow in running {
        let tasks = tx
            .query_tasks(&TaskQuery::for_tenant(&tenant).in_workflow(workflow.id))
            .await?;
        let Some(status) = evaluate_completion(&tasks) else {
            continue;
        };

        let Some(done) = tx.finish_workflow(&tenant, workflow.id, status).await? else {
            continue;
        };

        let failed = tasks.iter().filter(|t| t.status == TaskStatus::Failed).count();
        audit
            .record(
                tx.as_mut(),
                COORDINATOR_ACTOR,
                AuditAction::WorkflowCompleted,
                json!({
                    "workflow_id": done.id,
                    "workflow_type": done.workflow_type,
                    "status": status,
                    "task_count": tasks.len(),
                    "failed_tasks": failed,
                }),
            )
            .await?;
        finished.push(done);
    }

    tx.commit().await?;

    for wf in &finished {
        info!(workflow_id = %wf.id, workflow_type = %wf.workflow_type, status = %wf.status, "workflow finished");
    }
    Ok(finished)
}
