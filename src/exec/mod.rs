// src/exec/mod.rs

//! Worker execution layer.
//!
//! - [`worker`] defines the `Worker` trait and the `WorkerRegistry` the
//!   coordinator dispatches through.
//! - [`context`] is the store surface handed to a running worker (data
//!   sharing, result queries, metrics, activity logging).
//! - [`runner`] wraps a worker's `perform` in the task status contract.
//! - [`command`] provides `CommandWorker`, which runs a shell command per
//!   task and is what the CLI registers from the configuration.

pub mod command;
pub mod context;
pub mod runner;
pub mod worker;

pub use command::CommandWorker;
pub use context::{WorkerContext, WorkerMetrics};
pub use runner::execute_task;
pub use worker::{BoxFuture, Worker, WorkerRegistry};
