// src/workers/sleep.rs

use std::time::Duration;

use tracing::{debug, error};

use super::{EXIT_SETUP_FAILED, SLEEP};
use crate::channel::Message;
use crate::config::parse_duration;
use crate::errors::{ProcworkerError, Result};
use crate::params::ParameterSet;
use crate::worker::{Worker, WorkerContext, WorkerFuture};

/// Sleeps for `duration` (forever when absent) and exits with `exit_code`,
/// or with `stop_code` when asked to stop first. Both codes default to 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct SleepWorker;

struct Settings {
    duration: Option<Duration>,
    exit_code: i32,
    stop_code: i32,
}

impl Settings {
    fn from_params(params: &ParameterSet) -> Result<Self> {
        let duration = params
            .get_str("duration")?
            .map(|s| {
                parse_duration(s).map_err(|e| {
                    ProcworkerError::ParameterError(format!("parameter 'duration': {e}"))
                })
            })
            .transpose()?;

        Ok(Self {
            duration,
            exit_code: params.get_parsed("exit_code")?.unwrap_or(0),
            stop_code: params.get_parsed("stop_code")?.unwrap_or(0),
        })
    }
}

impl Worker for SleepWorker {
    fn name(&self) -> &str {
        SLEEP
    }

    fn run(&self, ctx: WorkerContext) -> WorkerFuture {
        Box::pin(async move {
            let WorkerContext { params, mut channel } = ctx;
            let settings = match Settings::from_params(&params) {
                Ok(s) => s,
                Err(e) => {
                    error!(worker = SLEEP, error = %e, "bad parameters");
                    return EXIT_SETUP_FAILED;
                }
            };

            let nap = async {
                match settings.duration {
                    Some(d) => tokio::time::sleep(d).await,
                    None => std::future::pending().await,
                }
            };
            tokio::pin!(nap);

            loop {
                tokio::select! {
                    _ = &mut nap => return settings.exit_code,
                    msg = channel.recv() => match msg {
                        Ok(Message::Stop) => return settings.stop_code,
                        Ok(Message::Data(payload)) => {
                            debug!(worker = SLEEP, bytes = payload.len(), "ignoring data");
                        }
                        // Controller is gone; nobody is left to wait for.
                        Err(_) => return settings.stop_code,
                    },
                }
            }
        })
    }
}
