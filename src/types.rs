// src/types.rs

//! Shared identifiers and small value types used across the crate.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of one workflow instance, generated at creation.
pub type WorkflowId = Uuid;

/// Identifier of one coordination entry (task).
pub type TaskId = Uuid;

/// Stable identity of a worker (e.g. `"security-scanner"`).
pub type WorkerId = String;

/// Tenant / isolation key. Every row in the store carries one.
pub type TenantId = String;

/// Opaque key-value payload (workflow context, task data, results, errors).
pub type Payload = serde_json::Value;

/// Task type reserved for data-sharing entries written directly in
/// `completed` state by workers.
pub const DATA_STORAGE_TASK_TYPE: &str = "data_storage";

/// Key inside a data-sharing task's payload that carries the caller-chosen
/// data key.
pub const DATA_KEY_FIELD: &str = "data_key";

/// Actor id used in audit entries written by the coordinator itself.
pub const COORDINATOR_ACTOR: &str = "orchestrator";

/// Tenant used when the configuration does not name one.
pub const DEFAULT_TENANT: &str = "default-tenant";

/// Where the store keeps its rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreMode {
    /// Rows live in process memory only (lost on restart).
    Memory,
    /// Rows are snapshotted to a JSON file on every commit.
    File,
}

impl Default for StoreMode {
    fn default() -> Self {
        StoreMode::Memory
    }
}

impl FromStr for StoreMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(StoreMode::Memory),
            "file" => Ok(StoreMode::File),
            other => Err(format!(
                "invalid store mode: {other} (expected \"memory\" or \"file\")"
            )),
        }
    }
}

/// Build the error payload recorded on a failed task.
///
/// `message` is the human-readable summary, `detail` the diagnostic chain.
pub fn error_payload(message: impl Into<String>, detail: Option<String>) -> Payload {
    let mut map = serde_json::Map::new();
    map.insert("error".to_string(), Payload::String(message.into()));
    if let Some(detail) = detail {
        map.insert("detail".to_string(), Payload::String(detail));
    }
    Payload::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_mode_parses_case_insensitively() {
        assert_eq!("File".parse::<StoreMode>(), Ok(StoreMode::File));
        assert_eq!(" memory ".parse::<StoreMode>(), Ok(StoreMode::Memory));
        assert!("redis".parse::<StoreMode>().is_err());
    }

    #[test]
    fn error_payload_omits_missing_detail() {
        let p = error_payload("boom", None);
        assert_eq!(p["error"], "boom");
        assert!(p.get("detail").is_none());

        let p = error_payload("boom", Some("stack".into()));
        assert_eq!(p["detail"], "stack");
    }
}
