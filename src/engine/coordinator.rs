// src/engine/coordinator.rs

//! The coordinator: workflow creation, status queries and the coordination
//! loop.
//!
//! All shared state lives in the injected [`StoreGateway`]; the coordinator
//! itself only keeps the registry of local workers and the loop's
//! stop signal. Any number of coordinators may run against the same store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::audit::AuditRecorder;
use super::completion::finish_workflows;
use super::deps::{dead_dependencies, select_ready};
use super::dispatcher::{DispatchReport, Dispatcher};
use super::events::{CoordinatorEvent, EventBus};
use crate::errors::{CoordError, Result};
use crate::exec::{WorkerContext, WorkerRegistry};
use crate::state::{AuditAction, Task, TaskStatus, TaskTransition, Workflow, WorkflowStatus};
use crate::store::{StoreGateway, StoreResult, TaskOrder, TaskQuery, WorkflowQuery};
use crate::templates::TemplateRegistry;
use crate::types::{
    COORDINATOR_ACTOR, DEFAULT_TENANT, Payload, TaskId, TenantId, WorkerId, WorkflowId,
    error_payload,
};

/// Runtime options for a [`Coordinator`].
#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub tenant: TenantId,
    /// Sleep between coordination iterations.
    pub poll_interval: Duration,
    /// Leave the loop once no workflow of the tenant can make progress.
    pub exit_when_idle: bool,
    /// Capacity of the lifecycle event channel.
    pub event_capacity: usize,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            tenant: DEFAULT_TENANT.to_string(),
            poll_interval: Duration::from_secs(1),
            exit_when_idle: false,
            event_capacity: 256,
        }
    }
}

/// A workflow and every coordination entry belonging to it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowSnapshot {
    pub workflow: Workflow,
    /// Oldest first.
    pub tasks: Vec<Task>,
}

impl WorkflowSnapshot {
    /// Dispatchable tasks owned by `worker` (data entries excluded).
    pub fn tasks_for<'a>(&'a self, worker: &'a str) -> impl Iterator<Item = &'a Task> + 'a {
        self.tasks
            .iter()
            .filter(move |t| t.worker_id == worker && !t.is_data_entry())
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IterationReport {
    pub dispatch: DispatchReport,
    /// Workflows this iteration moved to a terminal status.
    pub finished: Vec<Workflow>,
}

impl IterationReport {
    pub fn is_empty(&self) -> bool {
        self.dispatch.is_empty() && self.finished.is_empty()
    }
}

/// A pending task none of whose missing dependencies can still complete.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockedTask {
    pub task_id: TaskId,
    pub workflow_id: WorkflowId,
    pub worker_id: WorkerId,
    pub dead_dependencies: Vec<WorkerId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub tenant: TenantId,
    pub running: bool,
    pub store_reachable: bool,
    pub store_error: Option<String>,
    pub registered_workers: Vec<WorkerId>,
    /// `assigned` tasks whose worker is not registered with this
    /// coordinator.
    pub orphaned_tasks: Vec<TaskId>,
    pub blocked_tasks: Vec<BlockedTask>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.store_reachable && self.orphaned_tasks.is_empty() && self.blocked_tasks.is_empty()
    }
}

/// Requests the coordination loop to stop after its current iteration.
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<watch::Sender<bool>>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.send_replace(true);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    /// No running workflows.
    Idle,
    /// Something is in flight or ready to dispatch.
    Busy,
    /// Running workflows exist but nothing can move.
    Stalled,
}

pub struct Coordinator {
    inner: Arc<Inner>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Debug)]
struct Inner {
    options: CoordinatorOptions,
    store: Arc<dyn StoreGateway>,
    workers: WorkerRegistry,
    templates: Arc<dyn TemplateRegistry>,
    audit: AuditRecorder,
    events: EventBus,
    dispatcher: Dispatcher,
    stop_tx: Arc<watch::Sender<bool>>,
    running: AtomicBool,
}

impl Coordinator {
    pub fn new(
        options: CoordinatorOptions,
        store: Arc<dyn StoreGateway>,
        workers: WorkerRegistry,
        templates: Arc<dyn TemplateRegistry>,
    ) -> Self {
        let audit = AuditRecorder::new(options.tenant.clone());
        let events = EventBus::new(options.event_capacity);
        let dispatcher = Dispatcher::new(
            Arc::clone(&store),
            workers.clone(),
            audit.clone(),
            events.clone(),
        );
        let (stop_tx, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                options,
                store,
                workers,
                templates,
                audit,
                events,
                dispatcher,
                stop_tx: Arc::new(stop_tx),
                running: AtomicBool::new(false),
            }),
            loop_handle: Mutex::new(None),
        }
    }

    pub fn tenant(&self) -> &str {
        &self.inner.options.tenant
    }

    pub fn options(&self) -> &CoordinatorOptions {
        &self.inner.options
    }

    pub fn store(&self) -> &Arc<dyn StoreGateway> {
        &self.inner.store
    }

    pub fn workers(&self) -> &WorkerRegistry {
        &self.inner.workers
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.inner.events.subscribe()
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(Arc::clone(&self.inner.stop_tx))
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Store surface acting as `worker_id` in this coordinator's tenant.
    pub fn worker_context(&self, worker_id: impl Into<WorkerId>) -> WorkerContext {
        self.inner.worker_context(worker_id)
    }

    /// Instantiate the template registered for `workflow_type`.
    ///
    /// The workflow row, one pending task per template entry and the
    /// `workflow_started` audit entry commit together.
    pub async fn start_workflow(&self, workflow_type: &str, context: Payload) -> Result<WorkflowId> {
        let inner = &self.inner;
        let template = inner
            .templates
            .template(workflow_type)
            .ok_or_else(|| CoordError::UnknownWorkflowType(workflow_type.to_string()))?;

        let tenant = inner.options.tenant.as_str();
        let workflow = Workflow::new(tenant, workflow_type, context);
        let workflow_id = workflow.id;

        let mut tx = inner.store.begin().await?;
        tx.insert_workflow(workflow.clone()).await?;
        for entry in &template.tasks {
            let task = Task::pending(
                tenant,
                workflow_id,
                entry.worker.as_str(),
                entry.task_type.as_str(),
                entry.data.clone(),
                entry.after.clone(),
            );
            tx.insert_task(task).await?;
        }
        inner
            .audit
            .record(
                tx.as_mut(),
                COORDINATOR_ACTOR,
                AuditAction::WorkflowStarted,
                json!({
                    "workflow_id": workflow_id,
                    "workflow_type": workflow_type,
                    "context": workflow.context,
                    "task_count": template.tasks.len(),
                }),
            )
            .await?;
        tx.commit().await?;

        info!(%workflow_id, workflow_type, tasks = template.tasks.len(), "workflow started");
        inner.events.publish(CoordinatorEvent::WorkflowStarted {
            workflow_id,
            workflow_type: workflow_type.to_string(),
            tenant: tenant.to_string(),
        });
        Ok(workflow_id)
    }

    pub async fn get_workflow_status(&self, workflow_id: WorkflowId) -> Result<WorkflowSnapshot> {
        let tenant = self.tenant();
        let mut tx = self.inner.store.begin().await?;
        let workflow = tx
            .get_workflow(tenant, workflow_id)
            .await?
            .ok_or(CoordError::WorkflowNotFound(workflow_id))?;
        let tasks = tx
            .query_tasks(
                &TaskQuery::for_tenant(tenant)
                    .in_workflow(workflow_id)
                    .order_by(TaskOrder::CreatedAsc),
            )
            .await?;
        tx.rollback().await?;

        Ok(WorkflowSnapshot { workflow, tasks })
    }

    /// One dispatch pass followed by one completion pass.
    pub async fn run_iteration(&self) -> Result<IterationReport> {
        self.inner.run_iteration().await
    }

    /// Run worker start hooks and spawn the coordination loop in the
    /// background. No-op if already running.
    pub async fn start(&self) -> Result<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            debug!("coordinator already running");
            return Ok(());
        }
        self.inner.stop_tx.send_replace(false);
        self.inner.start_workers().await;

        let rx = self.inner.stop_tx.subscribe();
        let handle = tokio::spawn(Arc::clone(&self.inner).run_loop(rx));
        *self
            .loop_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    /// Stop the loop after its current iteration, then run worker stop
    /// hooks. Tasks already handed to workers keep running.
    ///
    /// For a loop driven by [`Coordinator::run`] this only signals it; `run`
    /// runs the stop hooks itself once the loop exits.
    pub async fn stop(&self) -> Result<()> {
        if !self.inner.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.stop_tx.send_replace(true);

        let handle = self
            .loop_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return Ok(());
        };
        if let Err(e) = handle.await {
            warn!(error = %e, "coordination loop ended abnormally");
        }

        self.inner.stop_workers().await;
        self.inner.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Run the coordination loop on the current task until a
    /// [`StopHandle`] fires (or, with `exit_when_idle`, until nothing can
    /// make progress).
    pub async fn run(&self) -> Result<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(CoordError::Other(anyhow::anyhow!("coordinator is already running")));
        }
        self.inner.stop_tx.send_replace(false);
        self.inner.start_workers().await;

        let rx = self.inner.stop_tx.subscribe();
        Arc::clone(&self.inner).run_loop(rx).await;

        self.inner.stop_workers().await;
        self.inner.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub async fn health(&self) -> Result<HealthReport> {
        let inner = &self.inner;
        let tenant = inner.options.tenant.clone();
        let mut report = HealthReport {
            tenant: tenant.clone(),
            running: self.is_running(),
            store_reachable: true,
            store_error: None,
            registered_workers: inner.workers.ids(),
            orphaned_tasks: Vec::new(),
            blocked_tasks: Vec::new(),
        };

        if let Err(e) = inner.store.ping().await {
            report.store_reachable = false;
            report.store_error = Some(e.to_string());
            return Ok(report);
        }

        let mut tx = inner.store.begin().await?;
        let assigned = tx
            .query_tasks(&TaskQuery::for_tenant(&tenant).with_status(TaskStatus::Assigned))
            .await?;
        report.orphaned_tasks = assigned
            .iter()
            .filter(|t| !inner.workers.contains(&t.worker_id))
            .map(|t| t.id)
            .collect();

        let pending = tx
            .query_tasks(&TaskQuery::for_tenant(&tenant).with_status(TaskStatus::Pending))
            .await?;
        let mut siblings: HashMap<WorkflowId, Vec<Task>> = HashMap::new();
        for task in &pending {
            if !siblings.contains_key(&task.workflow_id) {
                let rows = tx
                    .query_tasks(&TaskQuery::for_tenant(&tenant).in_workflow(task.workflow_id))
                    .await?;
                siblings.insert(task.workflow_id, rows);
            }
            let rows = siblings.get(&task.workflow_id).map(Vec::as_slice).unwrap_or(&[]);
            let dead = dead_dependencies(task, rows);
            if !dead.is_empty() {
                report.blocked_tasks.push(BlockedTask {
                    task_id: task.id,
                    workflow_id: task.workflow_id,
                    worker_id: task.worker_id.clone(),
                    dead_dependencies: dead.into_iter().cloned().collect(),
                });
            }
        }
        tx.rollback().await?;

        Ok(report)
    }

    /// Operator action: fail a task that is still `pending`, typically one
    /// reported in [`HealthReport::blocked_tasks`]. Returns `false` if the
    /// task had already left `pending`.
    pub async fn fail_pending_task(&self, task_id: TaskId, reason: &str) -> Result<bool> {
        let inner = &self.inner;
        let tenant = self.tenant();
        let mut tx = inner.store.begin().await?;

        if tx.get_task(tenant, task_id).await?.is_none() {
            return Err(CoordError::TaskNotFound(task_id));
        }

        let transition = TaskTransition::fail(
            task_id,
            TaskStatus::Pending,
            error_payload(format!("failed by operator: {reason}"), None),
        );
        let Some(task) = tx.transition_task(tenant, &transition).await? else {
            tx.rollback().await?;
            return Ok(false);
        };

        inner
            .audit
            .status_changed(tx.as_mut(), COORDINATOR_ACTOR, &task)
            .await?;
        inner
            .audit
            .record(
                tx.as_mut(),
                COORDINATOR_ACTOR,
                AuditAction::OperatorIntervention,
                json!({
                    "coordination_id": task.id,
                    "workflow_id": task.workflow_id,
                    "reason": reason,
                }),
            )
            .await?;
        tx.commit().await?;

        info!(%task_id, reason, "pending task failed by operator");
        Ok(true)
    }
}

impl Inner {
    fn worker_context(&self, worker_id: impl Into<WorkerId>) -> WorkerContext {
        WorkerContext::new(worker_id, Arc::clone(&self.store), self.audit.clone())
    }

    async fn run_iteration(&self) -> Result<IterationReport> {
        let dispatch = self.dispatcher.dispatch().await?;
        let finished = finish_workflows(self.store.as_ref(), &self.audit).await?;

        for wf in &finished {
            self.events.publish(CoordinatorEvent::WorkflowCompleted {
                workflow_id: wf.id,
                workflow_type: wf.workflow_type.clone(),
                status: wf.status,
                tenant: wf.tenant.clone(),
            });
        }
        Ok(IterationReport { dispatch, finished })
    }

    async fn run_loop(self: Arc<Self>, mut stop_rx: watch::Receiver<bool>) {
        let tenant = self.options.tenant.clone();
        info!(
            tenant = %tenant,
            poll_interval = ?self.options.poll_interval,
            "coordination loop started"
        );
        self.events.publish(CoordinatorEvent::CoordinatorStarted {
            tenant: tenant.clone(),
        });

        loop {
            if *stop_rx.borrow() {
                break;
            }

            match self.run_iteration().await {
                Ok(report) if !report.is_empty() => debug!(?report, "iteration finished"),
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, transient = e.is_transient(), "coordination iteration failed; retrying next interval");
                    self.events.publish(CoordinatorEvent::LoopError {
                        message: e.to_string(),
                    });
                }
            }

            if self.options.exit_when_idle {
                match self.progress().await {
                    Ok(Progress::Idle) => {
                        info!("no running workflows left; leaving coordination loop");
                        break;
                    }
                    Ok(Progress::Stalled) => {
                        warn!("running workflows remain but no task can make progress; leaving coordination loop");
                        break;
                    }
                    Ok(Progress::Busy) => {}
                    Err(e) => debug!(error = %e, "progress check failed"),
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.options.poll_interval) => {}
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
            }
        }

        info!(tenant = %tenant, "coordination loop stopped");
        self.events.publish(CoordinatorEvent::CoordinatorStopped { tenant });
    }

    async fn progress(&self) -> StoreResult<Progress> {
        let tenant = self.options.tenant.as_str();
        let mut tx = self.store.begin().await?;

        let running = tx
            .query_workflows(&WorkflowQuery::for_tenant(tenant).with_status(WorkflowStatus::Running))
            .await?;
        if running.is_empty() {
            return Ok(Progress::Idle);
        }

        let mut siblings = HashMap::new();
        let mut pending = Vec::new();
        for wf in &running {
            let rows = tx
                .query_tasks(&TaskQuery::for_tenant(tenant).in_workflow(wf.id))
                .await?;
            let in_flight = rows.iter().any(|t| match t.status {
                TaskStatus::Running => true,
                TaskStatus::Assigned => self.workers.contains(&t.worker_id),
                _ => false,
            });
            if in_flight {
                return Ok(Progress::Busy);
            }
            pending.extend(rows.iter().filter(|t| t.status == TaskStatus::Pending).cloned());
            siblings.insert(wf.id, rows);
        }
        tx.rollback().await?;

        if select_ready(pending, &siblings).is_empty() {
            Ok(Progress::Stalled)
        } else {
            Ok(Progress::Busy)
        }
    }

    async fn start_workers(&self) {
        for (id, worker) in self.workers.entries() {
            let ctx = self.worker_context(id.as_str());
            if let Err(e) = worker.start(&ctx).await {
                warn!(worker = %id, error = %e, "worker start hook failed");
            }
            let entry = json!({ "worker_id": id, "tenant": self.options.tenant });
            if let Err(e) = ctx.log_activity(AuditAction::WorkerStarted, entry).await {
                warn!(worker = %id, error = %e, "could not record worker start");
            }
        }
    }

    async fn stop_workers(&self) {
        for (id, worker) in self.workers.entries() {
            let ctx = self.worker_context(id.as_str());
            if let Err(e) = worker.stop(&ctx).await {
                warn!(worker = %id, error = %e, "worker stop hook failed");
            }
            let entry = json!({ "worker_id": id, "tenant": self.options.tenant });
            if let Err(e) = ctx.log_activity(AuditAction::WorkerStopped, entry).await {
                warn!(worker = %id, error = %e, "could not record worker stop");
            }
        }
    }
}
