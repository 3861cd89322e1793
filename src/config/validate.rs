// src/config/validate.rs

use tracing::warn;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{CoordError, Result};
use crate::templates::validate_template;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = CoordError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

/// Validate an already-built config (e.g. one assembled in code).
pub fn validate_config(cfg: &ConfigFile) -> Result<()> {
    let raw = RawConfigFile {
        coordinator: cfg.coordinator.clone(),
        store: cfg.store.clone(),
        worker: cfg.worker.clone(),
        workflow: cfg.workflow.clone(),
    };
    validate_raw_config(&raw)
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_coordinator(cfg)?;
    validate_workers(cfg)?;
    validate_workflows(cfg)?;
    warn_unserved_workers(cfg);
    Ok(())
}

fn validate_coordinator(cfg: &RawConfigFile) -> Result<()> {
    if cfg.coordinator.tenant.trim().is_empty() {
        return Err(CoordError::ConfigError(
            "[coordinator].tenant must not be empty".to_string(),
        ));
    }

    let interval = cfg.coordinator.poll_interval()?;
    if interval.is_zero() {
        return Err(CoordError::ConfigError(
            "[coordinator].poll_interval must be greater than zero".to_string(),
        ));
    }

    if cfg.coordinator.event_capacity == 0 {
        return Err(CoordError::ConfigError(
            "[coordinator].event_capacity must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_workers(cfg: &RawConfigFile) -> Result<()> {
    for (id, worker) in &cfg.worker {
        if worker.cmd.trim().is_empty() {
            return Err(CoordError::ConfigError(format!(
                "[worker.{id}].cmd must not be empty"
            )));
        }
    }
    Ok(())
}

fn validate_workflows(cfg: &RawConfigFile) -> Result<()> {
    for (name, template) in &cfg.workflow {
        validate_template(name, template)?;
    }
    Ok(())
}

/// Workers can also be registered in code, so a template worker without a
/// `[worker.<id>]` section is only a warning. If nothing registers it, its
/// tasks are claimed and left `assigned`, and `health()` lists them as
/// orphaned.
fn warn_unserved_workers(cfg: &RawConfigFile) {
    for (name, template) in &cfg.workflow {
        for task in &template.tasks {
            if !cfg.worker.contains_key(&task.worker) {
                warn!(
                    workflow = %name,
                    worker = %task.worker,
                    "workflow addresses a worker with no [worker] section; unless it is registered in code its tasks will be claimed and stranded in assigned"
                );
            }
        }
    }
}
