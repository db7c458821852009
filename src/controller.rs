// src/controller.rs

//! Lifecycle owner for a single worker.
//!
//! The public surface (parameters, observation, reset, channel traffic) is
//! usable by anyone holding the controller. Starting and stopping are
//! `pub(crate)`: only the [`Manager`](crate::manager::Manager) drives them.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::backend::{
    CompletionNotifier, ContextHandle, ExecutionBackend, LaunchRequest, LaunchedContext,
};
use crate::channel::{Endpoint, Message, PumpHandle};
use crate::errors::{ProcworkerError, Result};
use crate::params::ParameterSet;
use crate::types::{WorkerExit, WorkerState, WorkerStatus};
use crate::worker::Worker;

/// Time a worker gets to honour a stop message before it is killed.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Upper bound on waiting for a killed context to be reaped.
const KILL_TIMEOUT: Duration = Duration::from_secs(5);

pub struct WorkerController {
    worker: Arc<dyn Worker>,
    backend: Arc<dyn ExecutionBackend>,
    params: ParameterSet,
    grace_period: Duration,
    state: WorkerState,
    /// Controller-side endpoint. Kept after the worker stops so that
    /// messages it sent before exiting can still be drained.
    channel: Option<Endpoint>,
    pumps: Option<PumpHandle>,
    context: Option<ContextHandle>,
    stop_deadline: Option<Instant>,
    last_exit: Option<WorkerExit>,
}

impl WorkerController {
    pub fn new(worker: Arc<dyn Worker>, backend: Arc<dyn ExecutionBackend>) -> Self {
        Self {
            worker,
            backend,
            params: ParameterSet::new(),
            grace_period: DEFAULT_GRACE_PERIOD,
            state: WorkerState::Idle,
            channel: None,
            pumps: None,
            context: None,
            stop_deadline: None,
            last_exit: None,
        }
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn set_grace_period(&mut self, grace_period: Duration) {
        self.grace_period = grace_period;
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Set a parameter for the next run. Only allowed while idle.
    pub fn set_parameter(&mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Result<()> {
        if self.state != WorkerState::Idle {
            return Err(ProcworkerError::WrongState {
                operation: "set parameter",
                state: self.state,
            });
        }
        self.params.set(name, value);
        Ok(())
    }

    pub fn parameters(&self) -> &ParameterSet {
        &self.params
    }

    /// Last observed state; does not poll the context. See [`is_working`].
    ///
    /// [`is_working`]: WorkerController::is_working
    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Result of the last run, once stopped.
    pub fn last_exit(&self) -> Option<WorkerExit> {
        self.last_exit
    }

    /// Process id of the running worker's host, when it runs in a child.
    pub fn pid(&self) -> Option<u32> {
        self.context.as_ref().and_then(ContextHandle::pid)
    }

    pub fn status(&self) -> WorkerStatus {
        WorkerStatus {
            state: self.state,
            exit: self.last_exit,
        }
    }

    /// Non-blocking check whether the worker is still running.
    ///
    /// If the context has terminated on its own, the controller moves to
    /// `Stopped` and records the exit here.
    pub fn is_working(&mut self) -> bool {
        match self.state {
            WorkerState::Starting => true,
            WorkerState::Running => {
                let exit = match &self.context {
                    Some(context) => context.exit(),
                    None => {
                        warn!(worker = %self.name(), "running worker has no execution context");
                        Some(WorkerExit::Abnormal)
                    }
                };
                match exit {
                    Some(exit) => {
                        info!(worker = %self.name(), %exit, "worker completed on its own");
                        self.finish(Some(exit));
                        false
                    }
                    None => true,
                }
            }
            WorkerState::Idle | WorkerState::Stopped => false,
        }
    }

    /// Make a stopped controller reusable with the same worker and
    /// parameters.
    pub fn reset(&mut self) -> Result<()> {
        // A worker that already exited is not "still running".
        self.is_working();

        match self.state {
            WorkerState::Running => Err(ProcworkerError::ObjectExists(format!(
                "worker '{}' is still running",
                self.name()
            ))),
            // A launch that was abandoned midway left nothing behind.
            WorkerState::Starting if self.context.is_some() => Err(ProcworkerError::ObjectExists(
                format!("worker '{}' is starting", self.name()),
            )),
            WorkerState::Idle => Ok(()),
            WorkerState::Starting | WorkerState::Stopped => {
                self.channel = None;
                self.pumps = None;
                self.last_exit = None;
                self.state = WorkerState::Idle;
                debug!(worker = %self.name(), "controller reset to idle");
                Ok(())
            }
        }
    }

    /// The wrapped worker.
    pub fn worker(&self) -> &dyn Worker {
        self.worker.as_ref()
    }

    pub(crate) fn worker_arc(&self) -> &Arc<dyn Worker> {
        &self.worker
    }

    pub fn name(&self) -> &str {
        self.worker.name()
    }

    /// Send a data message to the running worker.
    pub fn send(&self, payload: impl Into<Vec<u8>>) -> Result<()> {
        if self.state != WorkerState::Running {
            return Err(self.not_running());
        }
        match &self.channel {
            Some(channel) => channel.send(Message::Data(payload.into())),
            None => Err(self.not_running()),
        }
    }

    /// Receive the next message from the worker, waiting up to `timeout`.
    ///
    /// Works while running and, to drain final messages, after the worker
    /// stopped; `Ok(None)` means the timeout elapsed.
    pub async fn receive(&mut self, timeout: Duration) -> Result<Option<Message>> {
        let missing = self.not_running();
        match self.channel.as_mut() {
            Some(channel) => channel.receive(timeout).await,
            None => Err(missing),
        }
    }

    /// Launch the worker with a snapshot of the current parameters.
    pub(crate) async fn start(&mut self, notifier: Option<CompletionNotifier>) -> Result<()> {
        if self.state != WorkerState::Idle {
            return Err(ProcworkerError::ObjectExists(format!(
                "worker '{}' is {}",
                self.name(),
                self.state
            )));
        }

        self.state = WorkerState::Starting;
        let request = LaunchRequest {
            worker: Arc::clone(&self.worker),
            params: self.params.clone(),
            notifier,
        };

        match self.backend.launch(request).await {
            Ok(LaunchedContext {
                channel,
                pumps,
                handle,
            }) => {
                self.channel = Some(channel);
                self.pumps = pumps;
                self.context = Some(handle);
                self.stop_deadline = None;
                self.last_exit = None;
                self.state = WorkerState::Running;
                info!(
                    worker = %self.name(),
                    backend = self.backend.kind(),
                    "worker started"
                );
                Ok(())
            }
            Err(e) => {
                self.state = WorkerState::Idle;
                error!(worker = %self.name(), error = %e, "failed to start worker");
                Err(e)
            }
        }
    }

    /// Send the stop message and arm the grace deadline, without waiting.
    pub(crate) fn request_stop(&mut self) -> Result<()> {
        if self.state != WorkerState::Running {
            return Err(self.not_running());
        }
        if self.stop_deadline.is_some() {
            return Ok(());
        }

        let exited = self.context.as_ref().and_then(ContextHandle::exit);
        if exited.is_none() {
            if let Some(channel) = &self.channel {
                if channel.send(Message::Stop).is_err() {
                    debug!(worker = %self.name(), "channel already closed; not sending stop");
                }
            }
            debug!(
                worker = %self.name(),
                grace_ms = self.grace_period.as_millis() as u64,
                "stop requested"
            );
        }

        let deadline = deadline_after(self.grace_period);
        if let Some(context) = self.context.as_mut() {
            context.kill_at(deadline);
        }
        self.stop_deadline = Some(deadline);
        Ok(())
    }

    /// Wait for the context to end, killing it once the grace deadline
    /// passes, and record the exit.
    pub(crate) async fn reap(&mut self) -> Result<WorkerExit> {
        if self.state != WorkerState::Running {
            return Err(self.not_running());
        }
        if self.stop_deadline.is_none() {
            self.request_stop()?;
        }
        let deadline = self.stop_deadline.unwrap_or_else(Instant::now);

        // The handle stays in place while waiting: if this future is dropped,
        // the monitor still kills at the deadline and `is_working` picks up
        // the exit.
        let Some(context) = self.context.as_mut() else {
            self.finish(None);
            return Err(ProcworkerError::StrategyError(format!(
                "worker '{}' has no execution context to reap",
                self.name()
            )));
        };

        let result = match tokio::time::timeout_at(deadline, context.wait()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    worker = %self.worker.name(),
                    grace_ms = self.grace_period.as_millis() as u64,
                    "grace period elapsed; forcing termination"
                );
                context.kill();
                match tokio::time::timeout(KILL_TIMEOUT, context.wait()).await {
                    Ok(result) => result,
                    Err(_) => Err(ProcworkerError::StrategyError(format!(
                        "worker '{}' did not terminate after being killed",
                        self.worker.name()
                    ))),
                }
            }
        };

        match result {
            Ok(exit) => {
                info!(worker = %self.name(), %exit, "worker stopped");
                self.finish(Some(exit));
                Ok(exit)
            }
            Err(e) => {
                error!(worker = %self.name(), error = %e, "failed to reap worker");
                self.finish(None);
                Err(e)
            }
        }
    }

    /// Ask the worker to stop and wait for it, escalating to a kill after
    /// the grace period.
    pub(crate) async fn stop(&mut self) -> Result<WorkerExit> {
        self.request_stop()?;
        self.reap().await
    }

    fn finish(&mut self, exit: Option<WorkerExit>) {
        self.context = None;
        self.stop_deadline = None;
        self.last_exit = exit;
        self.state = WorkerState::Stopped;
    }

    fn not_running(&self) -> ProcworkerError {
        ProcworkerError::ObjectDoesNotExist(format!(
            "worker '{}' is not running ({})",
            self.name(),
            self.state
        ))
    }
}

/// `now + timeout`, saturating to a point decades away.
pub(crate) fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or(now + Duration::from_secs(86400 * 365 * 30))
}

impl Drop for WorkerController {
    fn drop(&mut self) {
        if let Some(context) = self.context.as_mut() {
            if context.exit().is_none() {
                warn!(worker = %self.worker.name(), "controller dropped while worker running; killing it");
                context.kill();
            }
        }
    }
}

impl fmt::Debug for WorkerController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerController")
            .field("worker", &self.worker.name())
            .field("backend", &self.backend.kind())
            .field("state", &self.state)
            .field("params", &self.params.len())
            .field("last_exit", &self.last_exit)
            .finish_non_exhaustive()
    }
}
