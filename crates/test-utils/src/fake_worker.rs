use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agentcoord::exec::{BoxFuture, Worker, WorkerContext};
use agentcoord::state::Task;
use agentcoord::types::Payload;
use serde_json::json;
use tokio::sync::Semaphore;

#[derive(Debug, Clone)]
enum Outcome {
    Succeed(Payload),
    Fail(String),
    Panic,
}

/// A fake worker that:
/// - records every task it performs
/// - optionally publishes workflow data before finishing
/// - optionally waits for a permit (or a delay) before finishing
/// - then succeeds, fails or panics as scripted.
#[derive(Clone)]
pub struct ScriptedWorker {
    outcome: Outcome,
    publish: Option<(String, Payload)>,
    read_key: Option<String>,
    delay: Option<Duration>,
    gate: Option<Arc<Semaphore>>,
    performed: Arc<Mutex<Vec<Task>>>,
    read_back: Arc<Mutex<Vec<Option<Payload>>>>,
    starts: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
}

impl ScriptedWorker {
    /// Completes every task with `{"ok": true, "task_type": ...}`.
    pub fn succeeding() -> Self {
        Self::with_outcome(Outcome::Succeed(Payload::Null))
    }

    /// Completes every task with `result`.
    pub fn returning(result: Payload) -> Self {
        Self::with_outcome(Outcome::Succeed(result))
    }

    pub fn failing(message: &str) -> Self {
        Self::with_outcome(Outcome::Fail(message.to_string()))
    }

    pub fn panicking() -> Self {
        Self::with_outcome(Outcome::Panic)
    }

    fn with_outcome(outcome: Outcome) -> Self {
        Self {
            outcome,
            publish: None,
            read_key: None,
            delay: None,
            gate: None,
            performed: Arc::new(Mutex::new(Vec::new())),
            read_back: Arc::new(Mutex::new(Vec::new())),
            starts: Arc::new(AtomicUsize::new(0)),
            stops: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Publish `data` under `key` in the task's workflow while performing.
    pub fn publishing(mut self, key: &str, data: Payload) -> Self {
        self.publish = Some((key.to_string(), data));
        self
    }

    /// Read workflow data under `key` while performing; see [`Self::read_back`].
    pub fn reading(mut self, key: &str) -> Self {
        self.read_key = Some(key.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Block inside `perform` until a permit is added to `gate`.
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn performed(&self) -> Vec<Task> {
        self.performed.lock().unwrap().clone()
    }

    pub fn performed_count(&self) -> usize {
        self.performed.lock().unwrap().len()
    }

    pub fn read_back(&self) -> Vec<Option<Payload>> {
        self.read_back.lock().unwrap().clone()
    }

    pub fn start_calls(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl Worker for ScriptedWorker {
    fn perform<'a>(
        &'a self,
        task: &'a Task,
        ctx: &'a WorkerContext,
    ) -> BoxFuture<'a, anyhow::Result<Payload>> {
        Box::pin(async move {
            self.performed.lock().unwrap().push(task.clone());

            if let Some(key) = &self.read_key {
                let data = ctx.get_workflow_data(task.workflow_id, key, None).await?;
                self.read_back.lock().unwrap().push(data);
            }
            if let Some((key, data)) = &self.publish {
                ctx.store_workflow_data(task.workflow_id, key, data.clone())
                    .await?;
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(gate) = &self.gate {
                gate.acquire().await?.forget();
            }

            match &self.outcome {
                Outcome::Succeed(Payload::Null) => {
                    Ok(json!({ "ok": true, "task_type": task.task_type }))
                }
                Outcome::Succeed(result) => Ok(result.clone()),
                Outcome::Fail(message) => Err(anyhow::anyhow!(message.clone())),
                Outcome::Panic => panic!("scripted worker panic"),
            }
        })
    }

    fn start<'a>(&'a self, _ctx: &'a WorkerContext) -> BoxFuture<'a, anyhow::Result<()>> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }

    fn stop<'a>(&'a self, _ctx: &'a WorkerContext) -> BoxFuture<'a, anyhow::Result<()>> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }
}
