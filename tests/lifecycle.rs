// tests/lifecycle.rs

use std::sync::Arc;
use std::time::Duration;

use agentcoord::state::{AuditAction, TaskStatus, WorkflowStatus};
use agentcoord::store::InMemoryStore;
use agentcoord_test_utils::{
    CoordinatorBuilder, ScriptedWorker, eventually, init_tracing, task, wait_for_workflow,
    with_timeout,
};
use serde_json::json;
use tempfile::tempdir;
use tokio::sync::Semaphore;

#[tokio::test]
async fn start_and_stop_call_worker_hooks_and_audit_them() {
    init_tracing();

    let store = Arc::new(InMemoryStore::new());
    let worker = ScriptedWorker::succeeding();
    let coordinator = CoordinatorBuilder::new()
        .store(store.clone())
        .worker("a", worker.clone())
        .build();

    coordinator.start().await.unwrap();
    coordinator.start().await.unwrap();
    assert!(coordinator.is_running());
    coordinator.stop().await.unwrap();
    coordinator.stop().await.unwrap();
    assert!(!coordinator.is_running());

    assert_eq!(worker.start_calls(), 1);
    assert_eq!(worker.stop_calls(), 1);

    let actions: Vec<_> = store
        .all_audit()
        .await
        .into_iter()
        .filter(|e| e.actor == "a")
        .map(|e| e.action)
        .collect();
    assert_eq!(actions, vec![AuditAction::WorkerStarted, AuditAction::WorkerStopped]);
}

#[tokio::test]
async fn stop_does_not_cancel_in_flight_tasks() {
    init_tracing();

    let gate = Arc::new(Semaphore::new(0));
    let worker = ScriptedWorker::succeeding().gated(gate.clone());
    let coordinator = CoordinatorBuilder::new()
        .worker("slow", worker.clone())
        .workflow("solo", vec![task("slow", "wait")])
        .build();

    let id = coordinator.start_workflow("solo", json!({})).await.unwrap();
    coordinator.start().await.unwrap();
    eventually(|| async { worker.performed_count() == 1 }).await;
    coordinator.stop().await.unwrap();

    gate.add_permits(1);
    eventually(|| async {
        let snap = coordinator.get_workflow_status(id).await.unwrap();
        snap.tasks[0].status == TaskStatus::Completed
    })
    .await;

    // Nobody is evaluating completion while stopped.
    let snap = coordinator.get_workflow_status(id).await.unwrap();
    assert_eq!(snap.workflow.status, WorkflowStatus::Running);

    coordinator.start().await.unwrap();
    let snap = wait_for_workflow(&coordinator, id).await;
    coordinator.stop().await.unwrap();
    assert_eq!(snap.workflow.status, WorkflowStatus::Completed);
}

#[tokio::test]
async fn file_store_resumes_after_restart() {
    init_tracing();

    let dir = tempdir().unwrap();
    let path = dir.path().join("state.json");

    let id = {
        let store = Arc::new(InMemoryStore::open_file(&path).await.unwrap());
        let first = CoordinatorBuilder::new()
            .store(store)
            .workflow(
                "release",
                vec![task("builder", "build"), task("deployer", "deploy").after(["builder"])],
            )
            .build();
        first.start_workflow("release", json!({"v": 1})).await.unwrap()
    };

    let store = Arc::new(InMemoryStore::open_file(&path).await.unwrap());
    let second = CoordinatorBuilder::new()
        .store(store)
        .worker("builder", ScriptedWorker::succeeding())
        .worker("deployer", ScriptedWorker::succeeding())
        .workflow(
            "release",
            vec![task("builder", "build"), task("deployer", "deploy").after(["builder"])],
        )
        .build();

    second.start().await.unwrap();
    let snap = wait_for_workflow(&second, id).await;
    second.stop().await.unwrap();

    assert_eq!(snap.workflow.status, WorkflowStatus::Completed);
    assert_eq!(snap.workflow.context, json!({"v": 1}));
}

#[tokio::test]
async fn run_exits_when_idle() {
    init_tracing();

    let coordinator = CoordinatorBuilder::new()
        .exit_when_idle()
        .worker("a", ScriptedWorker::succeeding())
        .workflow("solo", vec![task("a", "one")])
        .build();

    let id = coordinator.start_workflow("solo", json!({})).await.unwrap();
    with_timeout(coordinator.run()).await.unwrap();

    let snap = coordinator.get_workflow_status(id).await.unwrap();
    assert_eq!(snap.workflow.status, WorkflowStatus::Completed);
    assert!(!coordinator.is_running());
}

#[tokio::test]
async fn run_exits_when_stalled() {
    init_tracing();

    let coordinator = CoordinatorBuilder::new()
        .exit_when_idle()
        .worker("a", ScriptedWorker::failing("nope"))
        .worker("b", ScriptedWorker::succeeding())
        .workflow("pair", vec![task("a", "one"), task("b", "two").after(["a"])])
        .build();

    let id = coordinator.start_workflow("pair", json!({})).await.unwrap();
    with_timeout(coordinator.run()).await.unwrap();

    let snap = coordinator.get_workflow_status(id).await.unwrap();
    assert_eq!(snap.workflow.status, WorkflowStatus::Running);
    assert_eq!(snap.count(TaskStatus::Failed), 1);
    assert_eq!(snap.count(TaskStatus::Pending), 1);
}

#[tokio::test]
async fn stop_handle_ends_foreground_run() {
    init_tracing();

    let coordinator = CoordinatorBuilder::new()
        .poll_interval(Duration::from_millis(50))
        .build();
    let stop = coordinator.stop_handle();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        stop.stop();
    });
    with_timeout(coordinator.run()).await.unwrap();
    assert!(!coordinator.is_running());
}
