// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod state;
pub mod store;
pub mod templates;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::loader::{default_config_path, load_and_validate};
use crate::config::model::{ConfigFile, StoreSection};
use crate::engine::{Coordinator, CoordinatorEvent};
use crate::exec::{CommandWorker, WorkerRegistry};
use crate::state::WorkflowStatus;
use crate::store::{InMemoryStore, StoreGateway};
use crate::types::{Payload, StoreMode, WorkflowId};

pub use engine::{CoordinatorOptions, HealthReport, WorkflowSnapshot};
pub use errors::CoordError;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the store (memory or file snapshot)
/// - one `CommandWorker` per `[worker.<id>]` section
/// - the coordinator and its loop
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = args
        .config
        .as_deref()
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);
    let cfg = load_and_validate(&config_path)
        .with_context(|| format!("loading config {}", config_path.display()))?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let context: Payload =
        serde_json::from_str(&args.context).context("--context must be valid JSON")?;
    if !context.is_object() {
        bail!("--context must be a JSON object");
    }

    let store = open_store(&cfg.store).await?;

    let workers = WorkerRegistry::new();
    for (id, worker) in &cfg.worker {
        let command = CommandWorker::new(worker.cmd.as_str()).with_env(worker.env.clone());
        workers.register(id.as_str(), Arc::new(command));
    }

    let mut options = cfg.coordinator_options()?;
    options.exit_when_idle = args.once;

    let coordinator = Coordinator::new(options, store, workers, Arc::new(cfg.templates()?));
    tokio::spawn(log_events(coordinator.subscribe()));

    let mut started = Vec::new();
    for workflow_type in &args.start {
        let id = coordinator
            .start_workflow(workflow_type, context.clone())
            .await
            .with_context(|| format!("starting workflow '{workflow_type}'"))?;
        started.push(id);
    }

    // Ctrl-C → graceful shutdown.
    {
        let stop = coordinator.stop_handle();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            info!("Ctrl-C received; stopping after the current iteration");
            stop.stop();
        });
    }

    coordinator.run().await?;

    report_started(&coordinator, &started).await
}

async fn open_store(section: &StoreSection) -> Result<Arc<dyn StoreGateway>> {
    let store: Arc<dyn StoreGateway> = match section.mode {
        StoreMode::Memory => Arc::new(InMemoryStore::new()),
        StoreMode::File => {
            let store = InMemoryStore::open_file(&section.path)
                .await
                .with_context(|| format!("opening store file {}", section.path.display()))?;
            info!(path = %section.path.display(), "using file-backed store");
            Arc::new(store)
        }
    };
    Ok(store)
}

async fn log_events(mut rx: broadcast::Receiver<CoordinatorEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => debug!(?event, "coordinator event"),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(missed = n, "event logger lagged behind")
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Print the final status of workflows started from the command line; fail
/// if any of them failed.
async fn report_started(coordinator: &Coordinator, started: &[WorkflowId]) -> Result<()> {
    let mut failed = 0;
    for id in started {
        let snapshot = coordinator.get_workflow_status(*id).await?;
        let wf = &snapshot.workflow;
        println!("{} {} {}", wf.id, wf.workflow_type, wf.status);
        for task in snapshot.tasks.iter().filter(|t| !t.is_data_entry()) {
            println!("  - {} ({}): {}", task.worker_id, task.task_type, task.status);
        }
        if wf.status == WorkflowStatus::Failed {
            failed += 1;
        }
    }

    if failed > 0 {
        bail!("{failed} workflow(s) failed");
    }
    Ok(())
}

/// Simple dry-run output: print coordinator settings, workers and templates.
fn print_dry_run(cfg: &ConfigFile) {
    println!("agentcoord dry-run");
    println!("  coordinator.tenant = {:?}", cfg.coordinator.tenant);
    println!("  coordinator.poll_interval = {:?}", cfg.coordinator.poll_interval);
    println!("  store.mode = {:?}", cfg.store.mode);
    if cfg.store.mode == StoreMode::File {
        println!("  store.path = {}", cfg.store.path.display());
    }
    println!();

    println!("workers ({}):", cfg.worker.len());
    for (id, worker) in &cfg.worker {
        println!("  - {id}");
        println!("      cmd: {}", worker.cmd);
    }
    println!();

    println!("workflows ({}):", cfg.workflow.len());
    for (name, template) in &cfg.workflow {
        println!("  - {name}");
        for task in &template.tasks {
            if task.after.is_empty() {
                println!("      {} ({})", task.worker, task.task_type);
            } else {
                println!("      {} ({}) after {:?}", task.worker, task.task_type, task.after);
            }
        }
    }

    debug!("dry-run complete (no execution)");
}
