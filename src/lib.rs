// src/lib.rs

pub mod backend;
pub mod channel;
pub mod cli;
pub mod config;
pub mod controller;
pub mod errors;
pub mod host;
pub mod logging;
pub mod manager;
pub mod params;
pub mod store;
pub mod types;
pub mod worker;
pub mod workers;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, info, warn};

pub use crate::backend::{ExecutionBackend, ProcessBackend, TaskBackend};
pub use crate::channel::{Endpoint, Message};
pub use crate::controller::WorkerController;
pub use crate::errors::{ErrorKind, ProcworkerError};
pub use crate::manager::Manager;
pub use crate::params::ParameterSet;
pub use crate::types::{BackendKind, WorkerExit, WorkerState, WorkerStatus};
pub use crate::worker::{Worker, WorkerContext, WorkerFuture, WorkerRegistry};

use crate::cli::{LogLevel, RunArgs};
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::config::parse_duration;

/// High-level entry point for `procworker run`.
///
/// Loads the config, registers one controller per `[worker.<name>]` (in name
/// order), starts them all, waits for them up to the timeout or Ctrl-C,
/// stops whatever is left and prints a status table.
///
/// Returns `true` when every worker started and exited gracefully with 0.
pub async fn run(args: RunArgs, log_level: Option<LogLevel>) -> Result<bool> {
    let cfg = load_and_validate(&args.config)
        .with_context(|| format!("loading config {}", args.config))?;

    let backend_kind = args.backend.unwrap_or(cfg.config.backend);
    let timeout = match args.timeout.as_deref() {
        Some(s) => Some(parse_duration(s).map_err(|e| anyhow!("--timeout: {e}"))?),
        None => cfg.timeout(),
    };

    if args.dry_run {
        print_dry_run(&cfg, backend_kind, timeout);
        return Ok(true);
    }

    let backend = build_backend(backend_kind, log_level)?;
    let mut manager = Manager::new();
    let mut names = Vec::with_capacity(cfg.worker.len());

    for (name, worker_cfg) in cfg.worker.iter() {
        let worker = workers::builtin(&worker_cfg.kind)
            .ok_or_else(|| anyhow!("worker '{name}' has unknown kind '{}'", worker_cfg.kind))?;

        let mut controller = WorkerController::new(worker, Arc::clone(&backend))
            .with_grace_period(cfg.grace_period_for(name));
        for (param, value) in worker_cfg.parameters().iter() {
            controller.set_parameter(param, value)?;
        }

        let index = manager.add_worker(controller)?;
        debug!(index, worker = %name, kind = %worker_cfg.kind, "configured worker");
        names.push(name.as_str());
    }

    info!(
        workers = names.len(),
        backend = backend.kind(),
        ?timeout,
        "starting workers"
    );

    let start_results = manager.start_all().await;
    for (index, res) in start_results.iter().enumerate() {
        if let Err(e) = res {
            error!(index, worker = %names[index], error = %e, "failed to start worker");
        }
    }

    let interrupted = tokio::select! {
        _ = manager.wait_for_all(timeout.unwrap_or(Duration::MAX)) => false,
        _ = ctrl_c() => true,
    };
    if interrupted {
        info!("Ctrl-C received; stopping workers");
    }

    let running = manager.running_indices();
    if !running.is_empty() {
        if !interrupted {
            warn!(running = running.len(), "timeout elapsed with workers still running");
        }
        manager.stop_all().await;
    }

    let statuses = manager.statuses();
    print_status_table(&cfg, &names, &statuses);

    let all_started = start_results.iter().all(|r| r.is_ok());
    let all_clean = statuses
        .iter()
        .all(|s| s.exit == Some(WorkerExit::Graceful(0)));
    Ok(all_started && all_clean)
}

fn build_backend(
    kind: BackendKind,
    log_level: Option<LogLevel>,
) -> Result<Arc<dyn ExecutionBackend>> {
    let backend: Arc<dyn ExecutionBackend> = match kind {
        BackendKind::Process => {
            let mut backend = ProcessBackend::current_exe()?.arg("host");
            if let Some(level) = log_level {
                backend = backend.env(logging::LOG_ENV, level.as_str());
            }
            Arc::new(backend)
        }
        BackendKind::Task => Arc::new(TaskBackend::new()),
    };
    Ok(backend)
}

/// Resolves on Ctrl-C; never resolves if the handler cannot be installed.
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}

fn print_status_table(cfg: &ConfigFile, names: &[&str], statuses: &[WorkerStatus]) {
    println!("{:<16} {:<10} {:<9} EXIT", "WORKER", "KIND", "STATE");
    for (name, status) in names.iter().zip(statuses) {
        let kind = cfg.worker.get(*name).map(|w| w.kind.as_str()).unwrap_or("?");
        let exit = status
            .exit
            .map(|e| e.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("{name:<16} {kind:<10} {:<9} {exit}", status.state.to_string());
    }
}

/// Simple dry-run output: print backend, timing and workers.
fn print_dry_run(cfg: &ConfigFile, backend: BackendKind, timeout: Option<Duration>) {
    println!("procworker dry-run");
    println!("  config.backend = {backend:?}");
    println!("  config.grace_period = {:?}", cfg.grace_period());
    match timeout {
        Some(t) => println!("  config.timeout = {t:?}"),
        None => println!("  config.timeout = none"),
    }
    println!();

    println!("workers ({}):", cfg.worker.len());
    for (name, worker) in cfg.worker.iter() {
        println!("  - {name}");
        println!("      kind: {}", worker.kind);
        println!("      grace_period: {:?}", cfg.grace_period_for(name));
        for (param, value) in worker.params.iter() {
            println!("      param {param} = {value}");
        }
    }

    debug!("dry-run complete (nothing started)");
}
