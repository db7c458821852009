// src/workers/echo.rs

use tracing::debug;

use super::ECHO;
use crate::channel::Message;
use crate::worker::{Worker, WorkerContext, WorkerFuture};

/// Sends every data message straight back. On `Stop` it reports how many
/// messages it echoed as a final `count=<n>` message and exits 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoWorker;

impl Worker for EchoWorker {
    fn name(&self) -> &str {
        ECHO
    }

    fn run(&self, ctx: WorkerContext) -> WorkerFuture {
        Box::pin(async move {
            let mut channel = ctx.channel;
            let mut count: u64 = 0;

            loop {
                match channel.recv().await {
                    Ok(Message::Data(payload)) => {
                        if channel.send(Message::Data(payload)).is_err() {
                            return 0;
                        }
                        count += 1;
                    }
                    Ok(Message::Stop) => {
                        debug!(worker = ECHO, count, "stop received");
                        // The controller may already be gone.
                        let _ = channel.send(Message::data(format!("count={count}")));
                        return 0;
                    }
                    Err(_) => return 0,
                }
            }
        })
    }
}
