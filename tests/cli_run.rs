// tests/cli_run.rs

//! End-to-end runs through `agentcoord::run`, with real shell workers.

#![cfg(unix)]

use std::io::Write;

use agentcoord::cli::CliArgs;
use agentcoord::run;
use agentcoord_test_utils::{init_tracing, with_timeout};
use tempfile::{NamedTempFile, tempdir};

fn args(config: &NamedTempFile, extra: &[&str]) -> CliArgs {
    use clap::Parser;
    let mut argv = vec!["agentcoord", "--config", config.path().to_str().unwrap()];
    argv.extend_from_slice(extra);
    CliArgs::parse_from(argv)
}

fn config(body: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(body.as_bytes()).unwrap();
    file
}

#[tokio::test]
async fn once_runs_started_workflow_to_completion() {
    init_tracing();

    let out = tempdir().unwrap();
    let marker = out.path().join("deployed");
    let cfg = config(&format!(
        r#"
[coordinator]
poll_interval = "10ms"

[worker.builder]
cmd = "echo built"

[worker.deployer]
cmd = "touch {}"

[workflow.release]
task = [
  {{ worker = "builder", task_type = "build" }},
  {{ worker = "deployer", task_type = "deploy", after = ["builder"] }},
]
"#,
        marker.display()
    ));

    with_timeout(run(args(&cfg, &["--once", "--start", "release"])))
        .await
        .unwrap();
    assert!(marker.exists());
}

#[tokio::test]
async fn once_reports_failed_workflows_as_error() {
    init_tracing();

    let cfg = config(
        r#"
[coordinator]
poll_interval = "10ms"

[worker.broken]
cmd = "exit 2"

[workflow.doomed]
task = [{ worker = "broken", task_type = "fail" }]
"#,
    );

    let err = with_timeout(run(args(&cfg, &["--once", "--start", "doomed"])))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("1 workflow(s) failed"), "{err}");
}

#[tokio::test]
async fn rejects_non_object_context_and_unknown_types() {
    init_tracing();

    let cfg = config(
        r#"
[worker.a]
cmd = "true"

[workflow.w]
task = [{ worker = "a", task_type = "x" }]
"#,
    );

    assert!(run(args(&cfg, &["--once", "--context", "[1,2]"])).await.is_err());
    assert!(run(args(&cfg, &["--once", "--start", "nope"])).await.is_err());
}

#[tokio::test]
async fn dry_run_executes_nothing() {
    init_tracing();

    let out = tempdir().unwrap();
    let marker = out.path().join("ran");
    let cfg = config(&format!(
        r#"
[worker.a]
cmd = "touch {}"

[workflow.w]
task = [{{ worker = "a", task_type = "x" }}]
"#,
        marker.display()
    ));

    run(args(&cfg, &["--dry-run", "--start", "w"])).await.unwrap();
    assert!(!marker.exists());
}
