// src/worker.rs

//! The unit of work run by a controller.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::channel::Endpoint;
use crate::params::ParameterSet;

/// Future returned by [`Worker::run`]; resolves to the worker's exit status.
pub type WorkerFuture = Pin<Box<dyn Future<Output = i32> + Send + 'static>>;

/// Everything a worker gets when it starts.
#[derive(Debug)]
pub struct WorkerContext {
    /// Snapshot of the controller's parameters taken at start.
    pub params: ParameterSet,
    /// Worker-side end of the channel to the controller.
    pub channel: Endpoint,
}

/// A task body that can run under any execution backend.
///
/// Implementations run until their work is done, or until a
/// [`Message::Stop`](crate::channel::Message::Stop) arrives on the channel,
/// and return an exit status. A worker that ignores `Stop` is killed once the
/// controller's grace period elapses.
///
/// The returned future must own everything it uses; anything the worker needs
/// beyond the context should be cloned into it.
pub trait Worker: Send + Sync + 'static {
    /// Name used to find this worker inside a worker host process.
    fn name(&self) -> &str;

    fn run(&self, ctx: WorkerContext) -> WorkerFuture;
}

impl fmt::Debug for dyn Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name())
            .finish_non_exhaustive()
    }
}

/// Name-to-worker lookup used by worker host processes.
#[derive(Default)]
pub struct WorkerRegistry {
    workers: BTreeMap<String, Arc<dyn Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `worker` under its own name, replacing any previous entry.
    pub fn register(&mut self, worker: Arc<dyn Worker>) -> &mut Self {
        self.workers.insert(worker.name().to_string(), worker);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Worker>> {
        self.workers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.workers.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.workers.keys().map(String::as_str)
    }
}

impl fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerRegistry")
            .field("workers", &self.workers.keys().collect::<Vec<_>>())
            .finish()
    }
}
