// src/exec/context.rs

//! The store-facing surface a worker gets while running.
//!
//! Everything a worker writes goes through here so it carries the worker's
//! id as audit actor and stays inside the coordinator's tenant.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use crate::engine::AuditRecorder;
use crate::state::{AuditAction, Task, TaskStatus, TaskTransition};
use crate::store::{StoreGateway, StoreResult, TaskOrder, TaskQuery};
use crate::types::{DATA_STORAGE_TASK_TYPE, Payload, TaskId, WorkerId, WorkflowId};

#[derive(Debug, Clone)]
pub struct WorkerContext {
    worker_id: WorkerId,
    store: Arc<dyn StoreGateway>,
    audit: AuditRecorder,
}

/// Aggregates over one worker's recent tasks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerMetrics {
    pub worker_id: WorkerId,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    /// Mean of `completed_at - created_at` over completed tasks.
    pub avg_execution_secs: Option<f64>,
    /// `completed / total`, or 0 when there were no tasks.
    pub success_rate: f64,
}

impl WorkerContext {
    pub fn new(worker_id: impl Into<WorkerId>, store: Arc<dyn StoreGateway>, audit: AuditRecorder) -> Self {
        Self {
            worker_id: worker_id.into(),
            store,
            audit,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn tenant(&self) -> &str {
        self.audit.tenant()
    }

    pub fn store(&self) -> &Arc<dyn StoreGateway> {
        &self.store
    }

    /// Apply `transition` and, if it took effect, record
    /// `task_status_changed` plus `action` in the same transaction.
    ///
    /// Returns `None` (and writes nothing) when the task no longer had the
    /// expected status.
    pub(crate) async fn record_transition(
        &self,
        transition: TaskTransition,
        action: AuditAction,
    ) -> StoreResult<Option<Task>> {
        let mut tx = self.store.begin().await?;
        let Some(task) = tx.transition_task(self.tenant(), &transition).await? else {
            tx.rollback().await?;
            return Ok(None);
        };

        self.audit
            .status_changed(tx.as_mut(), &self.worker_id, &task)
            .await?;
        let payload = json!({
            "coordination_id": task.id,
            "workflow_id": task.workflow_id,
            "task_type": task.task_type,
            "result": task.result,
            "error": task.error,
        });
        self.audit
            .record(tx.as_mut(), &self.worker_id, action, payload)
            .await?;
        tx.commit().await?;
        Ok(Some(task))
    }

    /// Publish `data` under `key` in `workflow_id`.
    ///
    /// The entry is created already `completed` and owned by this worker, so
    /// it also satisfies dependencies on this worker.
    pub async fn store_workflow_data(
        &self,
        workflow_id: WorkflowId,
        key: &str,
        data: Payload,
    ) -> StoreResult<TaskId> {
        let entry = Task::data_entry(self.tenant(), workflow_id, self.worker_id.as_str(), key, data);
        let id = entry.id;

        let mut tx = self.store.begin().await?;
        tx.insert_task(entry).await?;
        self.audit
            .record(
                tx.as_mut(),
                &self.worker_id,
                AuditAction::WorkflowDataStored,
                json!({ "workflow_id": workflow_id, "data_key": key, "coordination_id": id }),
            )
            .await?;
        tx.commit().await?;

        debug!(worker = %self.worker_id, %workflow_id, key, "workflow data stored");
        Ok(id)
    }

    /// Most recently completed data published under `key`, optionally only
    /// from `from_worker`.
    pub async fn get_workflow_data(
        &self,
        workflow_id: WorkflowId,
        key: &str,
        from_worker: Option<&str>,
    ) -> StoreResult<Option<Payload>> {
        let mut query = TaskQuery::for_tenant(self.tenant())
            .in_workflow(workflow_id)
            .of_type(DATA_STORAGE_TASK_TYPE)
            .with_status(TaskStatus::Completed)
            .with_data_key(key)
            .order_by(TaskOrder::CompletedDesc)
            .limit(1);
        if let Some(worker) = from_worker {
            query = query.owned_by(worker);
        }

        let mut tx = self.store.begin().await?;
        let rows = tx.query_tasks(&query).await?;
        tx.rollback().await?;

        Ok(rows.into_iter().next().and_then(|t| t.result))
    }

    /// Tasks of a workflow in any status, earliest completion first and
    /// unfinished tasks last, optionally narrowed by owning worker and task
    /// type. Callers read `status`, `result` and `error` off each row.
    pub async fn query_worker_results(
        &self,
        workflow_id: WorkflowId,
        worker: Option<&str>,
        task_type: Option<&str>,
    ) -> StoreResult<Vec<Task>> {
        let mut query = TaskQuery::for_tenant(self.tenant())
            .in_workflow(workflow_id)
            .order_by(TaskOrder::CompletedAsc);
        if let Some(worker) = worker {
            query = query.owned_by(worker);
        }
        if let Some(task_type) = task_type {
            query = query.of_type(task_type);
        }

        let mut tx = self.store.begin().await?;
        let rows = tx.query_tasks(&query).await?;
        tx.rollback().await?;
        Ok(rows)
    }

    /// Metrics over this worker's tasks created within `window`.
    /// Data-sharing entries are not counted.
    pub async fn performance_metrics(&self, window: Duration) -> StoreResult<WorkerMetrics> {
        let since = Utc::now() - window;
        let query = TaskQuery::for_tenant(self.tenant())
            .owned_by(self.worker_id.as_str())
            .created_after(since);

        let mut tx = self.store.begin().await?;
        let rows = tx.query_tasks(&query).await?;
        tx.rollback().await?;

        Ok(summarize(&self.worker_id, rows.iter().filter(|t| !t.is_data_entry())))
    }

    /// Free-form audit entry attributed to this worker.
    pub async fn log_activity(&self, action: AuditAction, payload: Payload) -> StoreResult<()> {
        self.audit
            .record_now(self.store.as_ref(), &self.worker_id, action, payload)
            .await
    }
}

fn summarize<'a>(worker_id: &str, tasks: impl Iterator<Item = &'a Task>) -> WorkerMetrics {
    let mut total = 0;
    let mut failed = 0;
    let mut durations = Vec::new();

    for task in tasks {
        total += 1;
        match task.status {
            TaskStatus::Completed => durations.extend(task.execution_secs()),
            TaskStatus::Failed => failed += 1,
            _ => {}
        }
    }

    let completed = durations.len();
    let avg_execution_secs = if durations.is_empty() {
        None
    } else {
        Some(durations.iter().sum::<f64>() / completed as f64)
    };
    let success_rate = if total == 0 {
        0.0
    } else {
        completed as f64 / total as f64
    };

    WorkerMetrics {
        worker_id: worker_id.to_string(),
        total_tasks: total,
        completed_tasks: completed,
        failed_tasks: failed,
        avg_execution_secs,
        success_rate,
    }
}
