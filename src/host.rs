// src/host.rs

//! Child side of the process backend.
//!
//! A worker host is any binary that, when started by
//! [`ProcessBackend`](crate::backend::ProcessBackend), calls [`serve`] with a
//! registry of the workers it can run. `serve`:
//! 1. reads the worker name from [`WORKER_ENV`],
//! 2. reads the parameter snapshot from stdin,
//! 3. runs the worker with a channel over stdin/stdout,
//! 4. flushes the channel and returns the worker's exit status.
//!
//! stdout belongs to the channel; hosts must log to stderr only.

use tracing::{debug, info};

use crate::channel::{Endpoint, codec};
use crate::errors::{ProcworkerError, Result};
use crate::worker::{WorkerContext, WorkerRegistry};

/// Environment variable carrying the name of the worker to run.
pub const WORKER_ENV: &str = "PROCWORKER_WORKER";

/// Whether this process was started as a worker host.
pub fn is_worker_host() -> bool {
    std::env::var_os(WORKER_ENV).is_some()
}

/// Run the requested worker over this process's stdio.
pub async fn serve(registry: &WorkerRegistry) -> Result<i32> {
    let name = std::env::var(WORKER_ENV).map_err(|e| {
        ProcworkerError::ObjectDoesNotExist(format!("{WORKER_ENV} is not set: {e}"))
    })?;

    let worker = registry.get(&name).ok_or_else(|| {
        ProcworkerError::ObjectDoesNotExist(format!("no worker named '{name}' in this host"))
    })?;

    let mut stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let params = codec::read_parameters(&mut stdin).await.map_err(|e| {
        ProcworkerError::StrategyError(format!("reading parameters for worker '{name}': {e}"))
    })?;
    debug!(worker = %name, params = params.len(), "parameters received");

    let (channel, pumps) = Endpoint::over_io(stdin, stdout, format!("host:{name}"));

    info!(worker = %name, pid = std::process::id(), "worker host running");
    let code = worker.run(WorkerContext { params, channel }).await;

    // The worker's endpoint went away with its future; drain what it queued.
    pumps.finish().await;
    info!(worker = %name, code, "worker host finished");

    Ok(code)
}
