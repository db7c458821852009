// src/backend/mod.rs

//! Execution backends.
//!
//! A backend knows how to launch a [`Worker`] in an isolated execution
//! context and hand back:
//! - the controller-side channel [`Endpoint`],
//! - a [`ContextHandle`] to observe termination and request a forced kill.
//!
//! Every launch spawns one monitor task that owns the context (the child
//! process or the worker's join handle). The monitor races natural
//! termination against a kill deadline, publishes the resulting
//! [`WorkerExit`] and then pokes the manager's completion channel. Because
//! the deadline lives in the monitor, a context is still killed on time when
//! whoever armed it stops waiting.
//!
//! - [`process`] runs each worker in a child process (worker host binary).
//! - [`task`] runs each worker as a Tokio task in the current process.

pub mod process;
pub mod task;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::debug;

use crate::channel::{Endpoint, PumpHandle};
use crate::errors::{ProcworkerError, Result};
use crate::params::ParameterSet;
use crate::types::WorkerExit;
use crate::worker::Worker;

pub use process::ProcessBackend;
pub use task::TaskBackend;

/// Strategy for creating a worker's execution context.
///
/// Production code uses [`ProcessBackend`] or [`TaskBackend`]; tests can
/// provide their own implementation.
pub trait ExecutionBackend: Send + Sync {
    /// Short name used in logs.
    fn kind(&self) -> &'static str;

    /// Launch `request.worker` with `request.params`.
    ///
    /// Fails with `StrategyError` when the context or its channel cannot be
    /// set up; in that case nothing is left running.
    fn launch(
        &self,
        request: LaunchRequest,
    ) -> Pin<Box<dyn Future<Output = Result<LaunchedContext>> + Send + '_>>;
}

/// Input to [`ExecutionBackend::launch`].
pub struct LaunchRequest {
    pub worker: Arc<dyn Worker>,
    /// Snapshot owned by the new context.
    pub params: ParameterSet,
    pub notifier: Option<CompletionNotifier>,
}

/// A freshly launched context.
#[derive(Debug)]
pub struct LaunchedContext {
    pub channel: Endpoint,
    /// Pump tasks bridging `channel` onto pipes, for stream-based backends.
    pub pumps: Option<PumpHandle>,
    pub handle: ContextHandle,
}

/// Tells a manager that the context of controller `index` terminated.
#[derive(Debug, Clone)]
pub struct CompletionNotifier {
    tx: mpsc::UnboundedSender<usize>,
    index: usize,
}

impl CompletionNotifier {
    pub fn new(tx: mpsc::UnboundedSender<usize>, index: usize) -> Self {
        Self { tx, index }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    fn notify(&self) {
        if self.tx.send(self.index).is_err() {
            debug!(index = self.index, "completion receiver gone; dropping notification");
        }
    }
}

/// Controller-side view of a running context.
///
/// Dropping a handle whose context is still alive requests a forced kill.
#[derive(Debug)]
pub struct ContextHandle {
    exit_rx: watch::Receiver<Option<WorkerExit>>,
    kill_tx: watch::Sender<Option<Instant>>,
    pid: Option<u32>,
}

impl ContextHandle {
    pub(crate) fn with_pid(mut self, pid: Option<u32>) -> Self {
        self.pid = pid;
        self
    }

    /// OS process id, for process-backed contexts.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Non-blocking: the exit of the context, if it has terminated.
    pub fn exit(&self) -> Option<WorkerExit> {
        *self.exit_rx.borrow()
    }

    /// Wait until the context has terminated.
    pub async fn wait(&mut self) -> Result<WorkerExit> {
        let exit = self
            .exit_rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| {
                ProcworkerError::StrategyError(
                    "context monitor ended without reporting an exit".to_string(),
                )
            })?;
        (*exit).ok_or_else(|| ProcworkerError::StrategyError("exit status missing".to_string()))
    }

    /// Ask the monitor to kill the context now.
    pub fn kill(&mut self) -> bool {
        self.kill_at(Instant::now())
    }

    /// Have the monitor kill the context at `deadline` unless it ends first.
    ///
    /// An earlier deadline already armed wins. Returns true if this call
    /// moved the kill time.
    pub fn kill_at(&mut self, deadline: Instant) -> bool {
        self.kill_tx.send_if_modified(|armed| match armed {
            Some(at) if *at <= deadline => false,
            _ => {
                *armed = Some(deadline);
                true
            }
        })
    }
}

impl Drop for ContextHandle {
    fn drop(&mut self) {
        if self.exit().is_none() && self.kill() {
            debug!("context handle dropped while running; kill requested");
        }
    }
}

/// Monitor-side counterpart of a [`ContextHandle`].
pub(crate) struct ExitReporter {
    exit_tx: watch::Sender<Option<WorkerExit>>,
    kill_rx: watch::Receiver<Option<Instant>>,
    notifier: Option<CompletionNotifier>,
}

impl ExitReporter {
    pub(crate) fn new(notifier: Option<CompletionNotifier>) -> (ExitReporter, ContextHandle) {
        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = watch::channel(None);
        (
            ExitReporter {
                exit_tx,
                kill_rx,
                notifier,
            },
            ContextHandle {
                exit_rx,
                kill_tx,
                pid: None,
            },
        )
    }

    /// Resolves once the armed kill deadline passes, or as soon as the
    /// handle is dropped. Cancel safe.
    pub(crate) async fn kill_signal(&mut self) {
        loop {
            let armed = *self.kill_rx.borrow_and_update();
            match armed {
                Some(at) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(at) => return,
                        changed = self.kill_rx.changed() => {
                            if changed.is_err() {
                                return;
                            }
                        }
                    }
                }
                None => {
                    if self.kill_rx.changed().await.is_err() {
                        return;
                    }
                }
            }
        }
    }

    /// Publish the exit first, then notify, so that whoever wakes up on the
    /// notification already sees the exit.
    pub(crate) fn report(self, exit: WorkerExit) {
        let _ = self.exit_tx.send(Some(exit));
        if let Some(notifier) = &self.notifier {
            notifier.notify();
        }
    }
}
