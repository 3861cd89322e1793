// src/engine/mod.rs

//! Coordination engine.
//!
//! - [`deps`] and [`completion`] hold the pure evaluation rules (when a task
//!   may be dispatched, when a workflow is finished) plus the store pass that
//!   applies completion.
//! - [`dispatcher`] claims ready tasks with a conditional update and hands
//!   them to workers.
//! - [`audit`] writes audit entries, normally inside the transaction that
//!   made the change.
//! - [`events`] is the in-process lifecycle notification bus.
//! - [`coordinator`] ties these together behind the public API and runs the
//!   coordination loop.

pub mod audit;
pub mod completion;
pub mod coordinator;
pub mod deps;
pub mod dispatcher;
pub mod events;

pub use audit::AuditRecorder;
pub use completion::evaluate_completion;
pub use coordinator::{
    BlockedTask, Coordinator, CoordinatorOptions, HealthReport, IterationReport, StopHandle,
    WorkflowSnapshot,
};
pub use deps::dependencies_satisfied;
pub use dispatcher::{DispatchReport, Dispatcher};
pub use events::{CoordinatorEvent, EventBus};
