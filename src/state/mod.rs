// src/state/mod.rs

//! Durable record types and their lifecycle state machines.
//!
//! - [`workflow`]: one run of a named template, `running` until the
//!   completion evaluator moves it to `completed` or `failed`.
//! - [`task`]: one coordination entry targeted at a single worker.
//! - [`audit`]: append-only trace of every state-changing action.
//!
//! The transition tables live here so that every component performing a
//! transition (dispatcher, execution runner, completion evaluator, store)
//! checks the same rules.

pub mod audit;
pub mod task;
pub mod workflow;

pub use audit::{AuditAction, AuditEntry};
pub use task::{Task, TaskStatus, TaskTransition};
pub use workflow::{Workflow, WorkflowStatus};

use thiserror::Error;

/// A requested status change that the lifecycle rules do not allow.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("illegal {entity} transition {from} -> {to}")]
pub struct InvalidTransition {
    pub entity: &'static str,
    pub from: String,
    pub to: String,
}
