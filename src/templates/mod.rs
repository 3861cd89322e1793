// src/templates/mod.rs

//! Workflow templates.
//!
//! A template names the tasks a workflow of that type starts with: which
//! worker performs each one, its task type and data, and which workers must
//! have completed something first (`after`).

use std::collections::BTreeMap;
use std::fmt;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use serde::{Deserialize, Serialize};

use crate::errors::{CoordError, Result};
use crate::types::{DATA_STORAGE_TASK_TYPE, Payload, WorkerId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTemplate {
    pub worker: WorkerId,
    pub task_type: String,
    /// Workers that must each have a completed task first.
    #[serde(default)]
    pub after: Vec<WorkerId>,
    #[serde(default = "empty_object")]
    pub data: Payload,
}

impl TaskTemplate {
    pub fn new(worker: impl Into<WorkerId>, task_type: impl Into<String>) -> Self {
        Self {
            worker: worker.into(),
            task_type: task_type.into(),
            after: Vec::new(),
            data: empty_object(),
        }
    }

    pub fn after<I, S>(mut self, workers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<WorkerId>,
    {
        self.after = workers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_data(mut self, data: Payload) -> Self {
        self.data = data;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    #[serde(rename = "task", default)]
    pub tasks: Vec<TaskTemplate>,
}

impl WorkflowTemplate {
    pub fn new(tasks: Vec<TaskTemplate>) -> Self {
        Self { tasks }
    }
}

/// Lookup from workflow type to template.
pub trait TemplateRegistry: Send + Sync + fmt::Debug {
    fn template(&self, workflow_type: &str) -> Option<WorkflowTemplate>;

    fn workflow_types(&self) -> Vec<String>;
}

/// Fixed set of validated templates, e.g. loaded from the config file.
#[derive(Debug, Clone, Default)]
pub struct StaticTemplates {
    templates: BTreeMap<String, WorkflowTemplate>,
}

impl StaticTemplates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and add `template` under `workflow_type`.
    pub fn insert(&mut self, workflow_type: impl Into<String>, template: WorkflowTemplate) -> Result<()> {
        let workflow_type = workflow_type.into();
        validate_template(&workflow_type, &template)?;
        self.templates.insert(workflow_type, template);
        Ok(())
    }

    pub fn with(mut self, workflow_type: impl Into<String>, template: WorkflowTemplate) -> Result<Self> {
        self.insert(workflow_type, template)?;
        Ok(self)
    }
}

impl TemplateRegistry for StaticTemplates {
    fn template(&self, workflow_type: &str) -> Option<WorkflowTemplate> {
        self.templates.get(workflow_type).cloned()
    }

    fn workflow_types(&self) -> Vec<String> {
        self.templates.keys().cloned().collect()
    }
}

/// Reject templates that could never finish or that collide with reserved
/// task types.
pub fn validate_template(workflow_type: &str, template: &WorkflowTemplate) -> Result<()> {
    if template.tasks.is_empty() {
        return Err(CoordError::ConfigError(format!(
            "workflow '{workflow_type}' must define at least one task"
        )));
    }

    for task in &template.tasks {
        if task.worker.trim().is_empty() {
            return Err(CoordError::ConfigError(format!(
                "workflow '{workflow_type}' has a task with an empty worker id"
            )));
        }
        if task.task_type == DATA_STORAGE_TASK_TYPE {
            return Err(CoordError::ConfigError(format!(
                "workflow '{workflow_type}': task type '{DATA_STORAGE_TASK_TYPE}' is reserved for shared data"
            )));
        }
        for dep in &task.after {
            if dep == &task.worker {
                return Err(CoordError::ConfigError(format!(
                    "workflow '{workflow_type}': worker '{dep}' cannot run after itself"
                )));
            }
            if !template.tasks.iter().any(|t| &t.worker == dep) {
                return Err(CoordError::ConfigError(format!(
                    "workflow '{workflow_type}': worker '{}' runs after unknown worker '{dep}'",
                    task.worker
                )));
            }
        }
    }

    // Edge direction: dep -> worker.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for task in &template.tasks {
        graph.add_node(task.worker.as_str());
        for dep in &task.after {
            graph.add_edge(dep.as_str(), task.worker.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_) => Ok(()),
        Err(cycle) => Err(CoordError::DagCycle(format!(
            "workflow '{workflow_type}' has a dependency cycle involving worker '{}'",
            cycle.node_id()
        ))),
    }
}

fn empty_object() -> Payload {
    Payload::Object(serde_json::Map::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deploy() -> WorkflowTemplate {
        WorkflowTemplate::new(vec![
            TaskTemplate::new("scanner", "scan"),
            TaskTemplate::new("builder", "build"),
            TaskTemplate::new("deployer", "deploy").after(["scanner", "builder"]),
        ])
    }

    #[test]
    fn valid_template_is_registered() {
        let templates = StaticTemplates::new().with("deploy", deploy()).unwrap();
        assert_eq!(templates.workflow_types(), vec!["deploy".to_string()]);
        assert_eq!(templates.template("deploy").unwrap().tasks.len(), 3);
        assert!(templates.template("other").is_none());
    }

    #[test]
    fn cycles_are_rejected() {
        let t = WorkflowTemplate::new(vec![
            TaskTemplate::new("a", "x").after(["b"]),
            TaskTemplate::new("b", "x").after(["a"]),
        ]);
        let err = validate_template("loop", &t).unwrap_err();
        assert!(matches!(err, CoordError::DagCycle(_)), "{err}");
    }

    #[test]
    fn unknown_and_self_dependencies_are_rejected() {
        let t = WorkflowTemplate::new(vec![TaskTemplate::new("a", "x").after(["ghost"])]);
        assert!(matches!(validate_template("w", &t), Err(CoordError::ConfigError(_))));

        let t = WorkflowTemplate::new(vec![TaskTemplate::new("a", "x").after(["a"])]);
        assert!(matches!(validate_template("w", &t), Err(CoordError::ConfigError(_))));
    }

    #[test]
    fn reserved_task_type_and_empty_templates_are_rejected() {
        let t = WorkflowTemplate::new(vec![TaskTemplate::new("a", DATA_STORAGE_TASK_TYPE)]);
        assert!(validate_template("w", &t).is_err());
        assert!(validate_template("w", &WorkflowTemplate::default()).is_err());
    }
}
