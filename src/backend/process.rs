// src/backend/process.rs

//! Child-process backend.
//!
//! Each launch starts a worker host binary (see [`crate::host`]) with the
//! worker's name in [`WORKER_ENV`]. The parameter snapshot is written to the
//! child's stdin, after which stdin/stdout carry the channel. The child's
//! stderr is forwarded to our log at debug level.

use std::ffi::OsString;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

use super::{ExecutionBackend, ExitReporter, LaunchRequest, LaunchedContext};
use crate::channel::{Endpoint, codec};
use crate::errors::{ProcworkerError, Result};
use crate::host::WORKER_ENV;
use crate::types::WorkerExit;

/// Launches workers in child processes of a worker host binary.
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    program: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
}

impl ProcessBackend {
    /// Use `program` as the worker host.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    /// Re-execute the running binary as the worker host.
    pub fn current_exe() -> Result<Self> {
        let exe = std::env::current_exe()
            .context("resolving current executable for worker host")
            .map_err(ProcworkerError::strategy)?;
        Ok(Self::new(exe))
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn command(&self, worker_name: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .env(WORKER_ENV, worker_name)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl ExecutionBackend for ProcessBackend {
    fn kind(&self) -> &'static str {
        "process"
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

            let mut child = self
                .command(&name)
                .spawn()
                .with_context(|| {
                    format!(
                        "spawning worker host '{}' for worker '{}'",
                        self.program.display(),
                        name
                    )
                })
                .map_err(ProcworkerError::strategy)?;
            let pid = child.id();

            let (mut stdin, stdout, stderr) =
                match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
                    (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
                    _ => {
                        reclaim(&mut child, &name).await;
                        return Err(ProcworkerError::StrategyError(format!(
                            "worker '{name}': child stdio was not captured"
                        )));
                    }
                };

            if let Err(e) = codec::write_parameters(&mut stdin, &params).await {
                reclaim(&mut child, &name).await;
                return Err(ProcworkerError::StrategyError(format!(
                    "worker '{name}': sending parameters to child failed: {e}"
                )));
            }

            info!(worker = %name, pid, params = params.len(), "worker process started");

            forward_stderr(name.clone(), pid, stderr);

            let (channel, pumps) = Endpoint::over_io(stdout, stdin, name.clone());
            let (reporter, handle) = ExitReporter::new(notifier);
            let handle = handle.with_pid(pid);
            tokio::spawn(monitor(child, name, pid, reporter));

            Ok(LaunchedContext {
                channel,
                pumps: Some(pumps),
                handle,
            })
        })
    }
}

/// Own the child until it exits or a kill is requested.
async fn monitor(mut child: Child, name: String, pid: Option<u32>, mut reporter: ExitReporter) {
    let exit = tokio::select! {
        status = child.wait() => match status {
            Ok(status) => exit_from_status(status),
            Err(e) => {
                error!(worker = %name, pid, error = %e, "waiting for worker process failed");
                WorkerExit::Abnormal
            }
        },
        _ = reporter.kill_signal() => force_exit(&mut child, &name, pid).await,
    };

    info!(worker = %name, pid, %exit, "worker process exited");
    reporter.report(exit);
}

async fn force_exit(child: &mut Child, name: &str, pid: Option<u32>) -> WorkerExit {
    // It may have exited on its own right before the kill request.
    if let Ok(Some(status)) = child.try_wait() {
        return exit_from_status(status);
    }

    info!(worker = %name, pid, "killing worker process");
    match child.kill().await {
        Ok(()) => WorkerExit::Forced,
        Err(e) => {
            warn!(worker = %name, pid, error = %e, "failed to kill worker process");
            match child.try_wait() {
                Ok(Some(status)) => exit_from_status(status),
                _ => WorkerExit::Forced,
            }
        }
    }
}

fn exit_from_status(status: ExitStatus) -> WorkerExit {
    match status.code() {
        Some(code) => WorkerExit::Graceful(code),
        // Terminated by a signal we did not send.
        None => WorkerExit::Abnormal,
    }
}

/// Kill and reap a child whose launch could not be completed.
async fn reclaim(child: &mut Child, name: &str) {
    if let Err(e) = child.kill().await {
        warn!(worker = %name, error = %e, "failed to reclaim half-launched worker process");
    }
}

fn forward_stderr(name: String, pid: Option<u32>, stderr: tokio::process::ChildStderr) {
    tokio::spawn(async move {
        let reader = BufReader::new(stderr);
        let mut lines = reader.lines();

        while let Ok(Some(line)) = lines.next_line().await {
            debug!(worker = %name, pid, "stderr: {}", line);
        }
    });
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::LaunchRequest;
    use crate::errors::ErrorKind;
    use crate::params::ParameterSet;
    use crate::worker::{Worker, WorkerContext, WorkerFuture};

    struct Nop;

    impl Worker for Nop {
        fn name(&self) -> &str {
            "nop"
        }

        fn run(&self, _ctx: WorkerContext) -> WorkerFuture {
            Box::pin(async { 0 })
        }
    }

    #[tokio::test]
    async fn missing_host_binary_is_a_strategy_error() {
        let backend = ProcessBackend::new("/nonexistent/procworker-host");
        let err = backend
            .launch(LaunchRequest {
                worker: Arc::new(Nop),
                params: ParameterSet::new(),
                notifier: None,
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::StrategyError);
        assert!(err.to_string().contains("nop"));
    }

    #[cfg(unix)]
    #[test]
    fn signal_termination_is_abnormal() {
        use std::os::unix::process::ExitStatusExt;

        assert_eq!(exit_from_status(ExitStatus::from_raw(0)), WorkerExit::Graceful(0));
        assert_eq!(exit_from_status(ExitStatus::from_raw(3 << 8)), WorkerExit::Graceful(3));
        // SIGTERM
        assert_eq!(exit_from_status(ExitStatus::from_raw(15)), WorkerExit::Abnormal);
    }
}
