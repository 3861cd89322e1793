// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::engine::CoordinatorOptions;
use crate::errors::{CoordError, Result};
use crate::templates::{StaticTemplates, WorkflowTemplate};
use crate::types::{DEFAULT_TENANT, StoreMode, WorkerId};

/// Configuration file as deserialized, before validation.
///
/// ```toml
/// [coordinator]
/// tenant = "acme"
/// poll_interval = "500ms"
///
/// [store]
/// mode = "file"
/// path = ".agentcoord/state.json"
///
/// [worker.builder]
/// cmd = "make build"
///
/// [worker.deployer]
/// cmd = "./deploy.sh"
///
/// [workflow.release]
/// task = [
///   { worker = "builder", task_type = "build" },
///   { worker = "deployer", task_type = "deploy", after = ["builder"] },
/// ]
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub coordinator: CoordinatorSection,

    #[serde(default)]
    pub store: StoreSection,

    /// Keyed by worker id.
    #[serde(default)]
    pub worker: BTreeMap<WorkerId, WorkerConfig>,

    /// Keyed by workflow type.
    #[serde(default)]
    pub workflow: BTreeMap<String, WorkflowTemplate>,
}

/// Validated configuration. Build it with `ConfigFile::try_from(raw)`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub coordinator: CoordinatorSection,
    pub store: StoreSection,
    pub worker: BTreeMap<WorkerId, WorkerConfig>,
    pub workflow: BTreeMap<String, WorkflowTemplate>,
}

impl ConfigFile {
    /// Construct without validation; callers go through `TryFrom`.
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            coordinator: raw.coordinator,
            store: raw.store,
            worker: raw.worker,
            workflow: raw.workflow,
        }
    }

    pub fn coordinator_options(&self) -> Result<CoordinatorOptions> {
        Ok(CoordinatorOptions {
            tenant: self.coordinator.tenant.clone(),
            poll_interval: self.coordinator.poll_interval()?,
            exit_when_idle: false,
            event_capacity: self.coordinator.event_capacity,
        })
    }

    pub fn templates(&self) -> Result<StaticTemplates> {
        let mut templates = StaticTemplates::new();
        for (name, template) in &self.workflow {
            templates.insert(name.as_str(), template.clone())?;
        }
        Ok(templates)
    }
}

/// `[coordinator]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorSection {
    #[serde(default = "default_tenant")]
    pub tenant: String,

    /// Duration string such as `"500ms"`, `"1s"` or `"2m"`.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,

    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl CoordinatorSection {
    pub fn poll_interval(&self) -> Result<Duration> {
        parse_duration(&self.poll_interval).map_err(|e| {
            CoordError::ConfigError(format!("[coordinator].poll_interval: {e}"))
        })
    }
}

impl Default for CoordinatorSection {
    fn default() -> Self {
        Self {
            tenant: default_tenant(),
            poll_interval: default_poll_interval(),
            event_capacity: default_event_capacity(),
        }
    }
}

fn default_tenant() -> String {
    DEFAULT_TENANT.to_string()
}

fn default_poll_interval() -> String {
    "1s".to_string()
}

fn default_event_capacity() -> usize {
    256
}

/// `[store]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    #[serde(default)]
    pub mode: StoreMode,

    /// Snapshot file used when `mode = "file"`.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            mode: StoreMode::default(),
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from(".agentcoord/state.json")
}

/// `[worker.<id>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Shell command run once per task.
    pub cmd: String,

    /// Extra environment for the command.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Parse `"<n>ms"`, `"<n>s"`, `"<n>m"` or `"<n>h"`.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    // Find the boundary between digits and suffix.
    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{num_part}': {e}"))?;

    let secs = |factor: u64| {
        value
            .checked_mul(factor)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration '{s}' is too large"))
    };

    match unit_part.trim().to_lowercase().as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => secs(60),
        "h" => secs(60 * 60),
        unit => Err(format!(
            "unsupported duration unit '{unit}'; expected ms, s, m, or h"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_supported_units() {
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration(" 2s "), Ok(Duration::from_secs(2)));
        assert_eq!(parse_duration("3m"), Ok(Duration::from_secs(180)));
        assert_eq!(parse_duration("1h"), Ok(Duration::from_secs(3600)));
    }

    #[test]
    fn rejects_malformed_durations() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("ms").is_err());
        assert!(parse_duration("5d").is_err());
        assert!(parse_duration("6000000000000000000m").is_err());
        assert!(parse_duration("6000000000000000000h").is_err());
    }

    #[test]
    fn empty_file_gets_defaults() {
        let raw: RawConfigFile = toml::from_str("").unwrap();
        assert_eq!(raw.coordinator.tenant, DEFAULT_TENANT);
        assert_eq!(raw.coordinator.poll_interval().unwrap(), Duration::from_secs(1));
        assert_eq!(raw.store.mode, StoreMode::Memory);
        assert!(raw.worker.is_empty());
    }
}
