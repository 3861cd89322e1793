// src/engine/dispatcher.rs

//! Claims ready tasks and hands them to workers.
//!
//! Each claim is a compare-and-swap `pending -> assigned` in its own
//! transaction, so any number of coordinators may dispatch against the same
//! store: exactly one of them wins a given task and the others skip it.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, error, info, warn};

use super::audit::AuditRecorder;
use super::deps::select_ready;
use super::events::{CoordinatorEvent, EventBus};
use crate::exec::{Worker, WorkerContext, WorkerRegistry, execute_task};
use crate::state::{AuditAction, Task, TaskStatus, TaskTransition};
use crate::store::{StoreGateway, StoreResult, TaskOrder, TaskQuery};
use crate::types::{COORDINATOR_ACTOR, TaskId, error_payload};

/// What one dispatch pass did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    /// Claimed and handed to a registered worker.
    pub dispatched: Vec<TaskId>,
    /// Claimed, but no worker with that id is registered here; the task
    /// stays `assigned`.
    pub unroutable: Vec<TaskId>,
    /// Ready tasks another dispatcher claimed first.
    pub lost_claims: usize,
}

impl DispatchReport {
    pub fn is_empty(&self) -> bool {
        self.dispatched.is_empty() && self.unroutable.is_empty() && self.lost_claims == 0
    }
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    store: Arc<dyn StoreGateway>,
    workers: WorkerRegistry,
    audit: AuditRecorder,
    events: EventBus,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn StoreGateway>,
        workers: WorkerRegistry,
        audit: AuditRecorder,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            workers,
            audit,
            events,
        }
    }

    /// Pending tasks of the tenant whose dependencies are satisfied, oldest
    /// first.
    pub async fn ready_tasks(&self) -> StoreResult<Vec<Task>> {
        let tenant = self.audit.tenant();
        let mut tx = self.store.begin().await?;

        let pending = tx
            .query_tasks(
                &TaskQuery::for_tenant(tenant)
                    .with_status(TaskStatus::Pending)
                    .order_by(TaskOrder::CreatedAsc),
            )
            .await?;

        let mut siblings: HashMap<_, Vec<Task>> = HashMap::new();
        for task in &pending {
            if siblings.contains_key(&task.workflow_id) {
                continue;
            }
            let rows = tx
                .query_tasks(&TaskQuery::for_tenant(tenant).in_workflow(task.workflow_id))
                .await?;
            siblings.insert(task.workflow_id, rows);
        }
        tx.rollback().await?;

        Ok(select_ready(pending, &siblings))
    }

    /// One dispatch pass: claim every ready task and start its worker.
    ///
    /// Worker execution is spawned; this returns once claims are committed,
    /// without waiting for any task to finish.
    pub async fn dispatch(&self) -> StoreResult<DispatchReport> {
        let mut report = DispatchReport::default();

        for task in self.ready_tasks().await? {
            let Some(claimed) = self.claim(&task).await? else {
                report.lost_claims += 1;
                continue;
            };

            match self.workers.get(&claimed.worker_id) {
                Some(worker) => {
                    debug!(task_id = %claimed.id, worker = %claimed.worker_id, "task dispatched");
                    report.dispatched.push(claimed.id);
                    self.spawn_execution(worker, claimed);
                }
                None => {
                    warn!(
                        task_id = %claimed.id,
                        worker = %claimed.worker_id,
                        "no worker registered under this id; task left assigned"
                    );
                    report.unroutable.push(claimed.id);
                }
            }
        }

        if !report.is_empty() {
            info!(
                dispatched = report.dispatched.len(),
                unroutable = report.unroutable.len(),
                lost_claims = report.lost_claims,
                "dispatch pass finished"
            );
        }
        Ok(report)
    }

    async fn claim(&self, task: &Task) -> StoreResult<Option<Task>> {
        let mut tx = self.store.begin().await?;
        let Some(claimed) = tx
            .transition_task(self.audit.tenant(), &TaskTransition::claim(task.id))
            .await?
        else {
            debug!(task_id = %task.id, "claim lost to another dispatcher");
            tx.rollback().await?;
            return Ok(None);
        };

        self.audit
            .status_changed(tx.as_mut(), COORDINATOR_ACTOR, &claimed)
            .await?;
        tx.commit().await?;
        Ok(Some(claimed))
    }

    /// Run the worker on its own task. If execution errors out or panics
    /// before recording an outcome, force the task to `failed`.
    fn spawn_execution(&self, worker: Arc<dyn Worker>, task: Task) {
        let ctx = WorkerContext::new(
            task.worker_id.clone(),
            Arc::clone(&self.store),
            self.audit.clone(),
        );
        let this = self.clone();

        tokio::spawn(async move {
            let task_id = task.id;
            let workflow_id = task.workflow_id;
            let worker_id = task.worker_id.clone();

            let failure = match tokio::spawn(execute_task(worker, ctx, task)).await {
                Ok(Ok(())) => return,
                Ok(Err(err)) => format!("{err:#}"),
                Err(join_err) if join_err.is_panic() => format!("worker panicked: {join_err}"),
                Err(join_err) => format!("worker execution aborted: {join_err}"),
            };

            error!(%task_id, worker = %worker_id, error = %failure, "task execution failed to start");
            match this.force_fail(task_id, &failure).await {
                Ok(true) => this.events.publish(CoordinatorEvent::TaskDispatchFailed {
                    task_id,
                    workflow_id,
                    worker_id,
                    error: failure,
                }),
                Ok(false) => debug!(%task_id, "task already terminal; nothing to clean up"),
                Err(err) => error!(%task_id, error = %err, "could not mark task failed"),
            }
        });
    }

    /// Fail a task stuck in `assigned` or `running`. Returns whether a row
    /// was changed.
    async fn force_fail(&self, task_id: TaskId, failure: &str) -> StoreResult<bool> {
        let tenant = self.audit.tenant();
        let error = error_payload("execution failed to start", Some(failure.to_string()));

        let mut tx = self.store.begin().await?;
        let mut failed = None;
        for expected in [TaskStatus::Assigned, TaskStatus::Running] {
            let transition = TaskTransition::fail(task_id, expected, error.clone());
            if let Some(task) = tx.transition_task(tenant, &transition).await? {
                failed = Some(task);
                break;
            }
        }

        let Some(task) = failed else {
            tx.rollback().await?;
            return Ok(false);
        };

        self.audit
            .status_changed(tx.as_mut(), COORDINATOR_ACTOR, &task)
            .await?;
        self.audit
            .record(
                tx.as_mut(),
                COORDINATOR_ACTOR,
                AuditAction::TaskDispatchFailed,
                json!({
                    "coordination_id": task.id,
                    "workflow_id": task.workflow_id,
                    "worker_id": task.worker_id,
                    "error": failure,
                }),
            )
            .await?;
        tx.commit().await?;
        Ok(true)
    }
}
