// src/workers/stubborn.rs

use tracing::debug;

use super::STUBBORN;
use crate::channel::Message;
use crate::worker::{Worker, WorkerContext, WorkerFuture};

/// Never exits on its own and ignores `Stop`; only a forced kill ends it.
#[derive(Debug, Clone, Copy, Default)]
pub struct StubbornWorker;

impl Worker for StubbornWorker {
    fn name(&self) -> &str {
        STUBBORN
    }

    fn run(&self, ctx: WorkerContext) -> WorkerFuture {
        Box::pin(async move {
            let mut channel = ctx.channel;
            loop {
                match channel.recv().await {
                    Ok(Message::Stop) => debug!(worker = STUBBORN, "ignoring stop request"),
                    Ok(Message::Data(_)) => {}
                    Err(_) => return std::future::pending().await,
                }
            }
        })
    }
}
