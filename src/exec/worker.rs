// src/exec/worker.rs

//! Worker abstraction and registry.
//!
//! A worker performs the domain work of tasks addressed to its id. The
//! surrounding contract (status transitions, audit entries, turning an
//! `Err` into a `failed` task) lives in [`super::runner`]; implementations
//! only produce a result payload or an error.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};

use super::context::WorkerContext;
use crate::state::Task;
use crate::types::{Payload, WorkerId};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait implemented by everything that can execute tasks.
///
/// Production code registers [`super::CommandWorker`]s built from the
/// configuration; tests register scripted fakes.
pub trait Worker: Send + Sync {
    /// Perform the work for one task that is already `running`.
    ///
    /// Returning `Err` marks the task `failed`; the error's message and
    /// cause chain end up in the task's error payload.
    fn perform<'a>(
        &'a self,
        task: &'a Task,
        ctx: &'a WorkerContext,
    ) -> BoxFuture<'a, anyhow::Result<Payload>>;

    /// Called once when the coordinator starts.
    fn start<'a>(&'a self, _ctx: &'a WorkerContext) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async { Ok(()) })
    }

    /// Called once when the coordinator stops. In-flight tasks are not
    /// cancelled.
    fn stop<'a>(&'a self, _ctx: &'a WorkerContext) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// Mapping from worker id to worker, shared by the coordinator and its
/// dispatcher. Cloning shares the underlying map.
#[derive(Clone, Default)]
pub struct WorkerRegistry {
    workers: Arc<RwLock<BTreeMap<WorkerId, Arc<dyn Worker>>>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `worker` under `id`, returning any worker it replaced.
    pub fn register(&self, id: impl Into<WorkerId>, worker: Arc<dyn Worker>) -> Option<Arc<dyn Worker>> {
        self.workers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.into(), worker)
    }

    pub fn unregister(&self, id: &str) -> Option<Arc<dyn Worker>> {
        self.workers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Worker>> {
        self.workers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.workers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<WorkerId> {
        self.workers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Point-in-time copy of the registrations, sorted by id.
    pub fn entries(&self) -> Vec<(WorkerId, Arc<dyn Worker>)> {
        self.workers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, w)| (id.clone(), Arc::clone(w)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.workers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerRegistry")
            .field("workers", &self.ids())
            .finish()
    }
}
