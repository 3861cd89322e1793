// tests/config_loading.rs

use std::io::Write;
use std::time::Duration;

use agentcoord::config::{load_and_validate, load_from_path};
use agentcoord::errors::CoordError;
use agentcoord::templates::TemplateRegistry;
use agentcoord::types::StoreMode;
use serde_json::json;
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn full_config_loads_into_options_and_templates() {
    let file = write_config(
        r#"
[coordinator]
tenant = "acme"
poll_interval = "250ms"
event_capacity = 32

[store]
mode = "file"
path = "state/coord.json"

[worker.builder]
cmd = "make build"

[worker.deployer]
cmd = "./deploy.sh"
env = { REGION = "eu-west-1" }

[workflow.release]
task = [
  { worker = "builder", task_type = "build", data = { target = "release" } },
  { worker = "deployer", task_type = "deploy", after = ["builder"] },
]
"#,
    );

    let cfg = load_and_validate(file.path()).unwrap();
    let options = cfg.coordinator_options().unwrap();
    assert_eq!(options.tenant, "acme");
    assert_eq!(options.poll_interval, Duration::from_millis(250));
    assert_eq!(options.event_capacity, 32);
    assert_eq!(cfg.store.mode, StoreMode::File);
    assert_eq!(cfg.worker["deployer"].env["REGION"], "eu-west-1");

    let templates = cfg.templates().unwrap();
    let release = templates.template("release").unwrap();
    assert_eq!(release.tasks.len(), 2);
    assert_eq!(release.tasks[0].data, json!({"target": "release"}));
    assert_eq!(release.tasks[1].data, json!({}));
    assert_eq!(release.tasks[1].after, vec!["builder".to_string()]);
}

#[test]
fn array_of_tables_form_is_accepted() {
    let file = write_config(
        r#"
[[workflow.audit.task]]
worker = "scanner"
task_type = "scan"

[[workflow.audit.task]]
worker = "reporter"
task_type = "report"
after = ["scanner"]
"#,
    );

    let cfg = load_and_validate(file.path()).unwrap();
    assert_eq!(cfg.workflow["audit"].tasks.len(), 2);
    assert_eq!(cfg.coordinator.tenant, "default-tenant");
}

#[test]
fn cycle_is_rejected() {
    let file = write_config(
        r#"
[workflow.loop]
task = [
  { worker = "a", task_type = "x", after = ["c"] },
  { worker = "b", task_type = "x", after = ["a"] },
  { worker = "c", task_type = "x", after = ["b"] },
]
"#,
    );

    let err = load_and_validate(file.path()).unwrap_err();
    assert!(matches!(err, CoordError::DagCycle(_)), "{err}");
}

#[test]
fn unknown_after_worker_is_rejected() {
    let file = write_config(
        r#"
[workflow.w]
task = [{ worker = "a", task_type = "x", after = ["ghost"] }]
"#,
    );

    let err = load_and_validate(file.path()).unwrap_err();
    assert!(err.to_string().contains("ghost"), "{err}");
}

#[test]
fn reserved_task_type_is_rejected() {
    let file = write_config(
        r#"
[workflow.w]
task = [{ worker = "a", task_type = "data_storage" }]
"#,
    );

    assert!(matches!(
        load_and_validate(file.path()),
        Err(CoordError::ConfigError(_))
    ));
}

#[test]
fn bad_coordinator_settings_are_rejected() {
    for body in [
        "[coordinator]\npoll_interval = \"0s\"",
        "[coordinator]\npoll_interval = \"soon\"",
        "[coordinator]\npoll_interval = \"6000000000000000000h\"",
        "[coordinator]\ntenant = \"  \"",
        "[coordinator]\nevent_capacity = 0",
        "[worker.a]\ncmd = \"\"",
    ] {
        let file = write_config(body);
        let err = load_and_validate(file.path()).unwrap_err();
        assert!(matches!(err, CoordError::ConfigError(_)), "{body}: {err}");
    }
}

#[test]
fn malformed_toml_and_missing_file_surface_their_errors() {
    let file = write_config("[coordinator\n");
    assert!(matches!(load_from_path(file.path()), Err(CoordError::TomlError(_))));

    let err = load_and_validate("/definitely/not/here.toml").unwrap_err();
    assert!(matches!(err, CoordError::IoError(_)));
}
