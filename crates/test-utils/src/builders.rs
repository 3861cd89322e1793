#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use agentcoord::engine::{Coordinator, CoordinatorOptions};
use agentcoord::exec::{Worker, WorkerRegistry};
use agentcoord::store::{InMemoryStore, StoreGateway};
use agentcoord::templates::{StaticTemplates, TaskTemplate, WorkflowTemplate};

pub const TEST_TENANT: &str = "test-tenant";

/// Builder for a `Coordinator` wired to an in-memory store, with a short
/// poll interval suited to tests.
pub struct CoordinatorBuilder {
    options: CoordinatorOptions,
    store: Option<Arc<dyn StoreGateway>>,
    workers: WorkerRegistry,
    templates: StaticTemplates,
}

impl CoordinatorBuilder {
    pub fn new() -> Self {
        Self {
            options: CoordinatorOptions {
                tenant: TEST_TENANT.to_string(),
                poll_interval: Duration::from_millis(10),
                exit_when_idle: false,
                event_capacity: 1024,
            },
            store: None,
            workers: WorkerRegistry::new(),
            templates: StaticTemplates::new(),
        }
    }

    pub fn tenant(mut self, tenant: &str) -> Self {
        self.options.tenant = tenant.to_string();
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.options.poll_interval = interval;
        self
    }

    pub fn exit_when_idle(mut self) -> Self {
        self.options.exit_when_idle = true;
        self
    }

    pub fn store(mut self, store: Arc<dyn StoreGateway>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn worker<W: Worker + 'static>(self, id: &str, worker: W) -> Self {
        self.workers.register(id, Arc::new(worker));
        self
    }

    /// Register a template; panics if it does not validate.
    pub fn workflow(mut self, workflow_type: &str, tasks: Vec<TaskTemplate>) -> Self {
        self.templates
            .insert(workflow_type, WorkflowTemplate::new(tasks))
            .expect("test template must be valid");
        self
    }

    pub fn build(self) -> Coordinator {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryStore::new()));
        Coordinator::new(self.options, store, self.workers, Arc::new(self.templates))
    }
}

impl Default for CoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Shorthand for `TaskTemplate::new(worker, task_type)`.
pub fn task(worker: &str, task_type: &str) -> TaskTemplate {
    TaskTemplate::new(worker, task_type)
}
