// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

use crate::state::InvalidTransition;
use crate::store::StoreError;
use crate::types::{TaskId, WorkflowId};

#[derive(Error, Debug)]
pub enum CoordError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Cycle detected in workflow template: {0}")]
    DagCycle(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(WorkflowId),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Unknown workflow type: {0}")]
    UnknownWorkflowType(String),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CoordError {
    /// Transient store failures; the coordination loop retries these on the
    /// next interval.
    pub fn is_transient(&self) -> bool {
        matches!(self, CoordError::Store(e) if e.is_transient())
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, CoordError>;
