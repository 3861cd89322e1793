// src/exec/runner.rs

//! Executes one dispatched task against its worker.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use super::context::WorkerContext;
use super::worker::Worker;
use crate::state::{AuditAction, Task, TaskStatus, TaskTransition};
use crate::types::error_payload;

/// Drive `task` (currently `assigned`) through the worker contract:
///
/// 1. `assigned -> running`, audited as `task_started`;
/// 2. the worker's [`Worker::perform`];
/// 3. `running -> completed` with the result (`task_completed`), or
///    `running -> failed` with `{error, detail}` (`task_failed`).
///
/// A worker error is an outcome, not an `Err` here. `Err` means the store
/// rejected one of the writes above; the caller decides how to clean up.
pub async fn execute_task(worker: Arc<dyn Worker>, ctx: WorkerContext, task: Task) -> Result<()> {
    let task_id = task.id;

    let Some(running) = ctx
        .record_transition(TaskTransition::start(task_id), AuditAction::TaskStarted)
        .await
        .with_context(|| format!("marking task {task_id} running"))?
    else {
        warn!(%task_id, worker = ctx.worker_id(), "task is no longer assigned; not executing");
        return Ok(());
    };

    info!(
        %task_id,
        workflow_id = %running.workflow_id,
        worker = ctx.worker_id(),
        task_type = %running.task_type,
        "task started"
    );

    let (transition, action) = match worker.perform(&running, &ctx).await {
        Ok(result) => (TaskTransition::complete(task_id, result), AuditAction::TaskCompleted),
        Err(err) => {
            warn!(%task_id, worker = ctx.worker_id(), error = %err, "task failed");
            let payload = error_payload(err.to_string(), Some(format!("{err:?}")));
            (
                TaskTransition::fail(task_id, TaskStatus::Running, payload),
                AuditAction::TaskFailed,
            )
        }
    };

    let finished = ctx
        .record_transition(transition, action)
        .await
        .with_context(|| format!("recording outcome of task {task_id}"))?;

    match finished {
        Some(t) => info!(%task_id, worker = ctx.worker_id(), status = %t.status, "task finished"),
        None => warn!(%task_id, worker = ctx.worker_id(), "task left running state before its outcome was recorded"),
    }
    Ok(())
}
