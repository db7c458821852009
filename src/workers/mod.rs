// src/workers/mod.rs

//! Workers shipped with procworker.
//!
//! These back the `procworker run` CLI and double as fixtures for
//! lifecycle tests. Every one of them answers `Stop` except `stubborn`,
//! which exists to exercise forced termination.

mod echo;
mod record;
mod sleep;
mod stubborn;

use std::sync::Arc;

pub use echo::EchoWorker;
pub use record::RecordWorker;
pub use sleep::SleepWorker;
pub use stubborn::StubbornWorker;

use crate::worker::{Worker, WorkerRegistry};

pub const SLEEP: &str = "sleep";
pub const ECHO: &str = "echo";
pub const STUBBORN: &str = "stubborn";
pub const RECORD: &str = "record";

pub const BUILTIN_KINDS: &[&str] = &[SLEEP, ECHO, STUBBORN, RECORD];

/// Exit status of a built-in worker that could not set itself up, e.g.
/// because of a malformed parameter or an unusable record store.
pub const EXIT_SETUP_FAILED: i32 = 2;

/// A fresh instance of the built-in worker `kind`.
pub fn builtin(kind: &str) -> Option<Arc<dyn Worker>> {
    let worker: Arc<dyn Worker> = match kind {
        SLEEP => Arc::new(SleepWorker),
        ECHO => Arc::new(EchoWorker),
        STUBBORN => Arc::new(StubbornWorker),
        RECORD => Arc::new(RecordWorker),
        _ => return None,
    };
    Some(worker)
}

/// Registry holding every built-in worker, for use in a worker host.
pub fn builtin_registry() -> WorkerRegistry {
    let mut registry = WorkerRegistry::new();
    for kind in BUILTIN_KINDS {
        if let Some(worker) = builtin(kind) {
            registry.register(worker);
        }
    }
    registry
}
