// src/manager.rs

//! Joint control over many worker controllers.
//!
//! The manager owns its controllers in registration order and is the only
//! caller of their start/stop surface. Every context it starts gets a
//! [`CompletionNotifier`] that feeds one shared channel, so waiting for "any"
//! completion is a single receive no matter how many workers run.
//!
//! The manager is driven from one logical control task; its methods take
//! `&mut self`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::backend::CompletionNotifier;
use crate::controller::{WorkerController, deadline_after};
use crate::errors::{ProcworkerError, Result};
use crate::types::{WorkerExit, WorkerState, WorkerStatus};

struct Entry {
    controller: WorkerController,
    /// State as last observed by the manager; used to detect transitions.
    last_state: WorkerState,
    last_exit: Option<WorkerExit>,
}

impl Entry {
    fn sync(&mut self) {
        self.last_state = self.controller.state();
        self.last_exit = self.controller.last_exit();
    }

    fn status(&self) -> WorkerStatus {
        WorkerStatus {
            state: self.last_state,
            exit: self.last_exit,
        }
    }
}

pub struct Manager {
    entries: Vec<Entry>,
    completion_tx: mpsc::UnboundedSender<usize>,
    completion_rx: mpsc::UnboundedReceiver<usize>,
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}

impl Manager {
    pub fn new() -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        Self {
            entries: Vec::new(),
            completion_tx,
            completion_rx,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Register `controller` and return its index.
    ///
    /// Fails with `ObjectExists`, leaving the manager untouched, when the
    /// same worker instance is already registered.
    pub fn add_worker(&mut self, controller: WorkerController) -> Result<usize> {
        let duplicate = self
            .entries
            .iter()
            .any(|e| Arc::ptr_eq(e.controller.worker_arc(), controller.worker_arc()));
        if duplicate {
            return Err(ProcworkerError::ObjectExists(format!(
                "worker '{}' is already registered with this manager",
                controller.name()
            )));
        }

        let index = self.entries.len();
        debug!(index, worker = %controller.name(), "worker registered");
        let mut entry = Entry {
            controller,
            last_state: WorkerState::Idle,
            last_exit: None,
        };
        entry.sync();
        self.entries.push(entry);
        Ok(index)
    }

    pub fn controller(&self, index: usize) -> Option<&WorkerController> {
        self.entries.get(index).map(|e| &e.controller)
    }

    /// Mutable access for configuration, reset and channel traffic.
    pub fn controller_mut(&mut self, index: usize) -> Option<&mut WorkerController> {
        self.entries.get_mut(index).map(|e| &mut e.controller)
    }

    pub async fn start_worker(&mut self, index: usize) -> Result<()> {
        let notifier = CompletionNotifier::new(self.completion_tx.clone(), index);
        let entry = self.entry_mut(index)?;
        let result = entry.controller.start(Some(notifier)).await;
        entry.sync();
        result
    }

    /// Start every controller; one failure does not prevent the others.
    pub async fn start_all(&mut self) -> Vec<Result<()>> {
        let mut results = Vec::with_capacity(self.entries.len());
        for index in 0..self.entries.len() {
            results.push(self.start_worker(index).await);
        }

        let failed = results.iter().filter(|r| r.is_err()).count();
        info!(total = results.len(), failed, "start_all finished");
        results
    }

    pub async fn stop_worker(&mut self, index: usize) -> Result<WorkerExit> {
        let entry = self.entry_mut(index)?;
        let result = entry.controller.stop().await;
        entry.sync();
        result
    }

    /// Stop every controller and collect per-index outcomes.
    ///
    /// The stop message goes to every running worker before any of them is
    /// waited on, so their grace periods run concurrently.
    pub async fn stop_all(&mut self) -> Vec<Result<WorkerExit>> {
        let mut results: Vec<Option<Result<WorkerExit>>> =
            (0..self.entries.len()).map(|_| None).collect();
        let mut pending = Vec::new();

        for (index, entry) in self.entries.iter_mut().enumerate() {
            match entry.controller.request_stop() {
                Ok(()) => pending.push(index),
                Err(e) => results[index] = Some(Err(e)),
            }
        }

        for index in pending {
            let entry = &mut self.entries[index];
            let result = entry.controller.reap().await;
            entry.sync();
            results[index] = Some(result);
        }

        let results: Vec<Result<WorkerExit>> = results
            .into_iter()
            .map(|r| {
                r.unwrap_or_else(|| {
                    Err(ProcworkerError::StrategyError("stop was not attempted".to_string()))
                })
            })
            .collect();

        let forced = results
            .iter()
            .filter(|r| matches!(r, Ok(WorkerExit::Forced)))
            .count();
        info!(total = results.len(), forced, "stop_all finished");
        results
    }

    /// Wait until at least one running worker stops, or `timeout` elapses.
    ///
    /// Returns the indices that went from running to stopped; empty on
    /// timeout or when nothing is running.
    pub async fn wait_for_any(&mut self, timeout: Duration) -> Vec<usize> {
        let deadline = deadline_after(timeout);
        loop {
            let completed = self.collect_completed();
            if !completed.is_empty() || !self.any_running() {
                return completed;
            }

            match tokio::time::timeout_at(deadline, self.completion_rx.recv()).await {
                Ok(Some(index)) => debug!(index, "completion notification"),
                Ok(None) => return completed,
                Err(_) => return self.collect_completed(),
            }
        }
    }

    /// Wait until no worker is running, or `timeout` elapses, and return the
    /// status of every controller.
    pub async fn wait_for_all(&mut self, timeout: Duration) -> Vec<WorkerStatus> {
        let deadline = deadline_after(timeout);
        loop {
            self.collect_completed();
            if !self.any_running() {
                break;
            }

            match tokio::time::timeout_at(deadline, self.completion_rx.recv()).await {
                Ok(Some(index)) => debug!(index, "completion notification"),
                Ok(None) | Err(_) => {
                    self.collect_completed();
                    break;
                }
            }
        }
        self.statuses()
    }

    /// Current state and recorded exit of controller `index`.
    pub fn worker_status(&mut self, index: usize) -> Result<WorkerStatus> {
        let entry = self.entry_mut(index)?;
        entry.controller.is_working();
        entry.sync();
        Ok(entry.status())
    }

    /// Last observed status of every controller, without polling.
    pub fn statuses(&self) -> Vec<WorkerStatus> {
        self.entries.iter().map(Entry::status).collect()
    }

    pub fn running_indices(&self) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.last_state == WorkerState::Running)
            .map(|(i, _)| i)
            .collect()
    }

    /// Stop everything that still runs and consume the manager.
    pub async fn shutdown(mut self) -> Vec<Result<WorkerExit>> {
        let running = self.running_indices();
        if !running.is_empty() {
            info!(running = running.len(), "manager shutting down running workers");
        }
        self.stop_all().await
    }

    fn any_running(&self) -> bool {
        self.entries
            .iter()
            .any(|e| e.last_state == WorkerState::Running)
    }

    /// Poll every controller the manager believes is running and return
    /// those that have stopped since.
    fn collect_completed(&mut self) -> Vec<usize> {
        let mut completed = Vec::new();
        for (index, entry) in self.entries.iter_mut().enumerate() {
            if entry.last_state != WorkerState::Running {
                continue;
            }
            if !entry.controller.is_working() {
                entry.sync();
                debug!(index, worker = %entry.controller.name(), exit = ?entry.last_exit, "worker completed");
                completed.push(index);
            }
        }
        completed
    }

    fn entry_mut(&mut self, index: usize) -> Result<&mut Entry> {
        let len = self.entries.len();
        self.entries.get_mut(index).ok_or_else(|| {
            ProcworkerError::ObjectDoesNotExist(format!(
                "no worker at index {index} (manager has {len})"
            ))
        })
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        let running = self
            .entries
            .iter()
            .filter(|e| e.controller.state() == WorkerState::Running)
            .count();
        if running > 0 {
            warn!(running, "manager dropped with running workers; they will be killed");
        }
    }
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field(
                "controllers",
                &self.entries.iter().map(|e| &e.controller).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::Instant;

    use super::*;
    use crate::backend::TaskBackend;
    use crate::errors::ErrorKind;
    use crate::workers::{SleepWorker, StubbornWorker};

    fn sleeper(ms: Option<u64>) -> WorkerController {
        let mut c = WorkerController::new(Arc::new(SleepWorker), Arc::new(TaskBackend::new()))
            .with_grace_period(Duration::from_millis(300));
        if let Some(ms) = ms {
            c.set_parameter("duration", format!("{ms}ms")).unwrap();
        }
        c
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_worker_is_rejected_without_side_effects() {
        let worker: Arc<dyn crate::worker::Worker> = Arc::new(SleepWorker);
        let backend = Arc::new(TaskBackend::new());
        let mut manager = Manager::new();

        manager
            .add_worker(WorkerController::new(Arc::clone(&worker), backend.clone()))
            .unwrap();
        let err = manager
            .add_worker(WorkerController::new(worker, backend))
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ObjectExists);
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.statuses().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_range_index_is_object_does_not_exist() {
        let mut manager = Manager::new();
        assert_eq!(
            manager.start_worker(3).await.unwrap_err().kind(),
            ErrorKind::ObjectDoesNotExist
        );
        assert_eq!(
            manager.worker_status(0).unwrap_err().kind(),
            ErrorKind::ObjectDoesNotExist
        );
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_any_with_nothing_running_returns_immediately() {
        let mut manager = Manager::new();
        manager.add_worker(sleeper(Some(10))).unwrap();

        let before = Instant::now();
        assert!(manager.wait_for_any(Duration::from_secs(10)).await.is_empty());
        assert_eq!(Instant::now(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn start_all_reports_per_index_and_continues() {
        let mut manager = Manager::new();
        manager.add_worker(sleeper(None)).unwrap();
        manager.add_worker(sleeper(None)).unwrap();
        manager.start_worker(0).await.unwrap();

        let results = manager.start_all().await;
        assert_eq!(results[0].as_ref().unwrap_err().kind(), ErrorKind::ObjectExists);
        assert!(results[1].is_ok());
        assert_eq!(manager.running_indices(), vec![0, 1]);

        let stops = manager.stop_all().await;
        assert!(stops.iter().all(|r| matches!(r, Ok(WorkerExit::Graceful(0)))));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_all_overlaps_grace_periods() {
        let mut manager = Manager::new();
        for _ in 0..3 {
            let c = WorkerController::new(Arc::new(StubbornWorker), Arc::new(TaskBackend::new()))
                .with_grace_period(Duration::from_millis(300));
            manager.add_worker(c).unwrap();
        }
        manager.start_all().await;

        let before = Instant::now();
        let results = manager.stop_all().await;
        let elapsed = Instant::now() - before;

        assert!(results.iter().all(|r| matches!(r, Ok(WorkerExit::Forced))));
        assert!(elapsed < Duration::from_millis(600), "took {elapsed:?}");
    }
}
