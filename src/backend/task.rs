// src/backend/task.rs

//! In-process backend: each worker runs as a Tokio task.
//!
//! Isolation is weaker than with child processes: a forced stop aborts the
//! task at its next `.await`, so a worker that spins without yielding cannot
//! be reclaimed.

use std::future::Future;
use std::pin::Pin;

use tracing::{debug, info, warn};

use super::{ExecutionBackend, ExitReporter, LaunchRequest, LaunchedContext};
use crate::channel;
use crate::errors::Result;
use crate::types::WorkerExit;
use crate::worker::WorkerContext;

#[derive(Debug, Clone, Copy, Default)]
pub struct TaskBackend;

impl TaskBackend {
    pub fn new() -> Self {
        TaskBackend
    }
}

impl ExecutionBackend for TaskBackend {
    fn kind(&self) -> &'static str {
        "task"
    }

    fn launch(
        &self,
        request: LaunchRequest,
    ) -> Pin<Box<dyn Future<Output = Result<LaunchedContext>> + Send + '_>> {
        Box::pin(async move {
            let LaunchRequest {
                worker,
                params,
                notifier,
            } = request;

            let name = worker.name().to_string();
            let (controller_side, worker_side) = channel::pair();
            let (mut reporter, handle) = ExitReporter::new(notifier);

            let mut join = tokio::spawn(worker.run(WorkerContext {
                params,
                channel: worker_side,
            }));

            info!(worker = %name, "worker task started");

            tokio::spawn(async move {
                let exit = tokio::select! {
                    res = &mut join => match res {
                        Ok(code) => WorkerExit::Graceful(code),
                        Err(e) if e.is_panic() => {
                            warn!(worker = %name, "worker task panicked");
                            WorkerExit::Abnormal
                        }
                        Err(e) => {
                            warn!(worker = %name, error = %e, "worker task cancelled externally");
                            WorkerExit::Abnormal
                        }
                    },
                    _ = reporter.kill_signal() => {
                        info!(worker = %name, "aborting worker task");
                        join.abort();
                        match join.await {
                            // Finished between the kill request and the abort.
                            Ok(code) => WorkerExit::Graceful(code),
                            Err(_) => WorkerExit::Forced,
                        }
                    }
                };

                debug!(worker = %name, %exit, "worker task ended");
                reporter.report(exit);
            });

            Ok(LaunchedContext {
                channel: controller_side,
                pumps: None,
                handle,
            })
        })
    }
}
