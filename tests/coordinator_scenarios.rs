// tests/coordinator_scenarios.rs

use std::sync::Arc;

use agentcoord::engine::CoordinatorEvent;
use agentcoord::state::{AuditAction, TaskStatus, WorkflowStatus};
use agentcoord::store::{AuditQuery, InMemoryStore, StoreGateway};
use agentcoord_test_utils::{
    CoordinatorBuilder, ScriptedWorker, TEST_TENANT, drive_to_completion, init_tracing, task,
    wait_for_workflow,
};
use serde_json::json;
use tokio::sync::Semaphore;

#[tokio::test]
async fn fan_in_waits_for_every_dependency() {
    init_tracing();

    let gate = Arc::new(Semaphore::new(0));
    let scanner = ScriptedWorker::succeeding().gated(gate.clone());
    let builder = ScriptedWorker::succeeding();
    let deployer = ScriptedWorker::returning(json!({"deployed": true}));

    let coordinator = CoordinatorBuilder::new()
        .worker("scanner", scanner.clone())
        .worker("builder", builder.clone())
        .worker("deployer", deployer.clone())
        .workflow(
            "release",
            vec![
                task("scanner", "scan"),
                task("builder", "build"),
                task("deployer", "deploy").after(["scanner", "builder"]),
            ],
        )
        .build();

    let id = coordinator.start_workflow("release", json!({"env": "prod"})).await.unwrap();

    // First pass dispatches the two roots only.
    let report = coordinator.run_iteration().await.unwrap();
    assert_eq!(report.dispatch.dispatched.len(), 2);

    // Builder finishes, scanner is held at the gate: deployer must not start.
    agentcoord_test_utils::eventually(|| async { builder.performed_count() == 1 }).await;
    agentcoord_test_utils::eventually(|| async {
        let snap = coordinator.get_workflow_status(id).await.unwrap();
        snap.tasks_for("builder").all(|t| t.status == TaskStatus::Completed)
    })
    .await;
    for _ in 0..3 {
        coordinator.run_iteration().await.unwrap();
    }
    assert_eq!(deployer.performed_count(), 0);
    let snap = coordinator.get_workflow_status(id).await.unwrap();
    assert_eq!(snap.tasks_for("deployer").next().unwrap().status, TaskStatus::Pending);
    assert_eq!(snap.workflow.status, WorkflowStatus::Running);

    gate.add_permits(1);
    let snap = drive_to_completion(&coordinator, id).await;

    assert_eq!(snap.workflow.status, WorkflowStatus::Completed);
    assert!(snap.workflow.completed_at.is_some());
    assert_eq!(snap.count(TaskStatus::Completed), 3);
    let deploy = snap.tasks_for("deployer").next().unwrap();
    assert_eq!(deploy.result, Some(json!({"deployed": true})));
    assert_eq!(deployer.performed_count(), 1);
}

#[tokio::test]
async fn failed_dependency_leaves_dependent_pending() {
    init_tracing();

    let deployer = ScriptedWorker::succeeding();
    let coordinator = CoordinatorBuilder::new()
        .worker("builder", ScriptedWorker::failing("compiler crashed"))
        .worker("deployer", deployer.clone())
        .workflow(
            "release",
            vec![
                task("builder", "build"),
                task("deployer", "deploy").after(["builder"]),
            ],
        )
        .build();

    let id = coordinator.start_workflow("release", json!({})).await.unwrap();

    agentcoord_test_utils::eventually(|| async {
        coordinator.run_iteration().await.unwrap();
        let snap = coordinator.get_workflow_status(id).await.unwrap();
        snap.count(TaskStatus::Failed) == 1
    })
    .await;
    for _ in 0..3 {
        coordinator.run_iteration().await.unwrap();
    }

    let snap = coordinator.get_workflow_status(id).await.unwrap();
    let build = snap.tasks_for("builder").next().unwrap();
    assert_eq!(build.error.as_ref().unwrap()["error"], "compiler crashed");
    assert_eq!(snap.tasks_for("deployer").next().unwrap().status, TaskStatus::Pending);
    assert_eq!(snap.workflow.status, WorkflowStatus::Running);
    assert_eq!(deployer.performed_count(), 0);

    // Health reports the stuck task; an operator resolves it.
    let health = coordinator.health().await.unwrap();
    assert_eq!(health.blocked_tasks.len(), 1);
    assert_eq!(health.blocked_tasks[0].dead_dependencies, vec!["builder".to_string()]);
    assert!(!health.is_healthy());

    let blocked = health.blocked_tasks[0].task_id;
    assert!(coordinator.fail_pending_task(blocked, "builder failed").await.unwrap());

    let snap = drive_to_completion(&coordinator, id).await;
    assert_eq!(snap.workflow.status, WorkflowStatus::Failed);
    assert!(coordinator.health().await.unwrap().is_healthy());
}

#[tokio::test]
async fn background_loop_completes_workflow_and_emits_events() {
    init_tracing();

    let coordinator = CoordinatorBuilder::new()
        .worker("a", ScriptedWorker::succeeding())
        .worker("b", ScriptedWorker::succeeding())
        .workflow("pair", vec![task("a", "one"), task("b", "two").after(["a"])])
        .build();
    let mut events = coordinator.subscribe();

    coordinator.start().await.unwrap();
    let id = coordinator.start_workflow("pair", json!({})).await.unwrap();
    let snap = wait_for_workflow(&coordinator, id).await;
    coordinator.stop().await.unwrap();

    assert_eq!(snap.workflow.status, WorkflowStatus::Completed);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(seen.iter().any(|e| matches!(e, CoordinatorEvent::CoordinatorStarted { .. })));
    assert!(seen.iter().any(|e| matches!(e, CoordinatorEvent::WorkflowStarted { workflow_id, .. } if *workflow_id == id)));
    assert!(seen.iter().any(|e| matches!(
        e,
        CoordinatorEvent::WorkflowCompleted { workflow_id, status: WorkflowStatus::Completed, .. } if *workflow_id == id
    )));
    assert!(matches!(seen.last(), Some(CoordinatorEvent::CoordinatorStopped { .. })));
}

#[tokio::test]
async fn completion_is_audited_exactly_once() {
    init_tracing();

    let store = Arc::new(InMemoryStore::new());
    let coordinator = CoordinatorBuilder::new()
        .store(store.clone())
        .worker("a", ScriptedWorker::succeeding())
        .workflow("single", vec![task("a", "one")])
        .build();

    let id = coordinator.start_workflow("single", json!({})).await.unwrap();
    drive_to_completion(&coordinator, id).await;
    for _ in 0..3 {
        coordinator.run_iteration().await.unwrap();
    }

    let mut tx = store.begin().await.unwrap();
    let completed = tx
        .query_audit(&AuditQuery::for_tenant(TEST_TENANT).with_action(AuditAction::WorkflowCompleted))
        .await
        .unwrap();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].actor, "orchestrator");

    let started = tx
        .query_audit(&AuditQuery::for_tenant(TEST_TENANT).with_action(AuditAction::WorkflowStarted))
        .await
        .unwrap();
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].payload["task_count"], 1);
}

#[tokio::test]
async fn tenants_do_not_see_each_other() {
    init_tracing();

    let store: Arc<dyn StoreGateway> = Arc::new(InMemoryStore::new());
    let worker = ScriptedWorker::succeeding();

    let acme = CoordinatorBuilder::new()
        .tenant("acme")
        .store(store.clone())
        .worker("a", worker.clone())
        .workflow("single", vec![task("a", "one")])
        .build();
    let globex = CoordinatorBuilder::new()
        .tenant("globex")
        .store(store.clone())
        .worker("a", worker.clone())
        .workflow("single", vec![task("a", "one")])
        .build();

    let id = acme.start_workflow("single", json!({})).await.unwrap();

    for _ in 0..3 {
        let report = globex.run_iteration().await.unwrap();
        assert!(report.is_empty());
    }
    assert!(globex.get_workflow_status(id).await.is_err());

    let snap = drive_to_completion(&acme, id).await;
    assert_eq!(snap.workflow.status, WorkflowStatus::Completed);
    assert!(worker.performed().iter().all(|t| t.tenant == "acme"));
}
