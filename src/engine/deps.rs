// src/engine/deps.rs

//! Dependency evaluation.
//!
//! Dependencies name *workers*, not tasks: a dependency on worker `W` is
//! satisfied as soon as any task owned by `W` in the same workflow is
//! `completed`. That includes data-sharing entries published by `W`.
//!
//! A dependency whose worker only ever fails is never satisfied; nothing here
//! propagates that failure to the dependent task.

use std::collections::HashMap;

use crate::state::{Task, TaskStatus};
use crate::types::{WorkerId, WorkflowId};

/// Whether every dependency of `task` has a completed sibling.
///
/// `siblings` may contain rows from other workflows; only rows sharing
/// `task.workflow_id` count. An empty dependency list is satisfied.
pub fn dependencies_satisfied(task: &Task, siblings: &[Task]) -> bool {
    task.dependencies
        .iter()
        .all(|dep| worker_has_completed(task.workflow_id, dep, siblings))
}

/// Dependencies of `task` that are not yet satisfied, in declaration order.
pub fn unsatisfied_dependencies<'a>(task: &'a Task, siblings: &[Task]) -> Vec<&'a WorkerId> {
    task.dependencies
        .iter()
        .filter(|dep| !worker_has_completed(task.workflow_id, dep, siblings))
        .collect()
}

/// Dependencies that can no longer be satisfied by anything already in the
/// store: the worker has no completed task and no task still in flight in
/// this workflow (either it only failed, or it never had a task at all).
pub fn dead_dependencies<'a>(task: &'a Task, siblings: &[Task]) -> Vec<&'a WorkerId> {
    task.dependencies
        .iter()
        .filter(|dep| {
            let mut owned = siblings
                .iter()
                .filter(|t| t.workflow_id == task.workflow_id && &t.worker_id == *dep);
            !owned.any(|t| t.status == TaskStatus::Completed || t.status.is_active())
        })
        .collect()
}

/// Filter `pending` (already in FIFO order) down to the tasks whose
/// dependencies are satisfied, preserving order.
pub fn select_ready(pending: Vec<Task>, siblings: &HashMap<WorkflowId, Vec<Task>>) -> Vec<Task> {
    pending
        .into_iter()
        .filter(|task| {
            task.status == TaskStatus::Pending
                && siblings
                    .get(&task.workflow_id)
                    .map(|rows| dependencies_satisfied(task, rows))
                    .unwrap_or(task.dependencies.is_empty())
        })
        .collect()
}

fn worker_has_completed(workflow_id: WorkflowId, worker: &str, siblings: &[Task]) -> bool {
    siblings.iter().any(|t| {
        t.workflow_id == workflow_id && t.worker_id == worker && t.status == TaskStatus::Completed
    })
}
