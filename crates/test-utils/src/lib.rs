pub mod builders;
pub mod fake_worker;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use agentcoord::engine::{Coordinator, WorkflowSnapshot};
use agentcoord::types::WorkflowId;
use tracing_subscriber::{EnvFilter, fmt};

pub use builders::{CoordinatorBuilder, TEST_TENANT, task};
pub use fake_worker::ScriptedWorker;

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer() // print only for failing tests unless --nocapture
            .with_target(true)
            .init();
    });
}

/// Run a future with a 5-second timeout.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    tokio::time::timeout(Duration::from_secs(5), f)
        .await
        .expect("Test timed out after 5 seconds")
}

/// Poll `check` every 10ms until it returns true; panics after 5 seconds.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    with_timeout(async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
}

/// Wait until `workflow_id` reaches a terminal status while a coordination
/// loop runs elsewhere.
pub async fn wait_for_workflow(coordinator: &Coordinator, workflow_id: WorkflowId) -> WorkflowSnapshot {
    with_timeout(async {
        loop {
            let snapshot = coordinator
                .get_workflow_status(workflow_id)
                .await
                .expect("workflow status");
            if snapshot.workflow.status.is_terminal() {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
}

/// Drive iterations by hand until `workflow_id` is terminal.
pub async fn drive_to_completion(
    coordinator: &Coordinator,
    workflow_id: WorkflowId,
) -> WorkflowSnapshot {
    with_timeout(async {
        loop {
            coordinator.run_iteration().await.expect("iteration");
            let snapshot = coordinator
                .get_workflow_status(workflow_id)
                .await
                .expect("workflow status");
            if snapshot.workflow.status.is_terminal() {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
}
