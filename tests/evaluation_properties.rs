// tests/evaluation_properties.rs

//! Property tests for the pure evaluation rules.

use agentcoord::engine::{dependencies_satisfied, evaluate_completion};
use agentcoord::state::{Task, TaskStatus, WorkflowStatus};
use proptest::prelude::*;
use serde_json::json;
use uuid::Uuid;

const WORKERS: [&str; 4] = ["a", "b", "c", "d"];

fn status() -> impl Strategy<Value = TaskStatus> {
    prop_oneof![
        Just(TaskStatus::Pending),
        Just(TaskStatus::Assigned),
        Just(TaskStatus::Running),
        Just(TaskStatus::Completed),
        Just(TaskStatus::Failed),
    ]
}

fn rows(workflow: Uuid) -> impl Strategy<Value = Vec<Task>> {
    prop::collection::vec((0..WORKERS.len(), status()), 0..12).prop_map(move |specs| {
        specs
            .into_iter()
            .map(|(w, s)| {
                let mut t = Task::pending("t", workflow, WORKERS[w], "x", json!({}), vec![]);
                t.status = s;
                t
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn satisfied_iff_every_dependency_has_a_completed_task(
        deps in prop::collection::vec(0..WORKERS.len(), 0..4),
        siblings in rows(Uuid::nil()),
    ) {
        let deps: Vec<String> = deps.into_iter().map(|i| WORKERS[i].to_string()).collect();
        let task = Task::pending("t", Uuid::nil(), "z", "x", json!({}), deps.clone());

        let expected = deps.iter().all(|d| {
            siblings.iter().any(|s| &s.worker_id == d && s.status == TaskStatus::Completed)
        });
        prop_assert_eq!(dependencies_satisfied(&task, &siblings), expected);
    }

    #[test]
    fn adding_a_completed_row_never_unsatisfies(
        deps in prop::collection::vec(0..WORKERS.len(), 0..4),
        mut siblings in rows(Uuid::nil()),
        extra in 0..WORKERS.len(),
    ) {
        let deps: Vec<String> = deps.into_iter().map(|i| WORKERS[i].to_string()).collect();
        let task = Task::pending("t", Uuid::nil(), "z", "x", json!({}), deps);

        let before = dependencies_satisfied(&task, &siblings);
        let mut done = Task::pending("t", Uuid::nil(), WORKERS[extra], "x", json!({}), vec![]);
        done.status = TaskStatus::Completed;
        siblings.push(done);

        prop_assert!(!before || dependencies_satisfied(&task, &siblings));
    }

    #[test]
    fn completion_matches_the_status_rules(tasks in rows(Uuid::nil())) {
        let got = evaluate_completion(&tasks);

        if tasks.iter().any(|t| !t.status.is_terminal()) {
            prop_assert_eq!(got, None);
        } else if tasks.iter().any(|t| t.status == TaskStatus::Failed) {
            prop_assert_eq!(got, Some(WorkflowStatus::Failed));
        } else {
            prop_assert_eq!(got, Some(WorkflowStatus::Completed));
        }
    }
}
