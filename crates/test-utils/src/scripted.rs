use std::sync::{Arc, Mutex};
use std::time::Duration;

use procworker::channel::Message;
use procworker::errors::Result;
use procworker::{ParameterSet, Worker, WorkerContext, WorkerController, WorkerFuture};

/// One step of a [`ScriptedWorker`]'s run.
#[derive(Debug, Clone)]
pub enum Step {
    /// Send a data message to the controller.
    Send(Vec<u8>),
    /// Send `name=value` for every parameter the worker was started with.
    SendParams,
    /// Wait, while still honouring `Stop`.
    Sleep(Duration),
}

/// What a [`ScriptedWorker`] does when asked to stop.
#[derive(Debug, Clone, Copy)]
pub enum OnStop {
    Exit(i32),
    Ignore,
}

/// A worker whose behaviour is a fixed list of steps, for lifecycle tests.
///
/// After the last step it exits with `exit_code`, or waits for `Stop` when
/// no exit code is set. Every parameter snapshot it is started with is kept
/// for later inspection.
#[derive(Debug, Clone)]
pub struct ScriptedWorker {
    name: String,
    steps: Vec<Step>,
    exit_code: Option<i32>,
    on_stop: OnStop,
    seen: Arc<Mutex<Vec<ParameterSet>>>,
}

impl ScriptedWorker {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            steps: Vec::new(),
            exit_code: None,
            on_stop: OnStop::Exit(0),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn send(self, payload: impl Into<Vec<u8>>) -> Self {
        self.step(Step::Send(payload.into()))
    }

    pub fn sleep(self, duration: Duration) -> Self {
        self.step(Step::Sleep(duration))
    }

    pub fn exit_with(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    pub fn on_stop(mut self, on_stop: OnStop) -> Self {
        self.on_stop = on_stop;
        self
    }

    /// Handle to the parameter snapshots of every run so far.
    pub fn seen(&self) -> Arc<Mutex<Vec<ParameterSet>>> {
        Arc::clone(&self.seen)
    }
}

impl Worker for ScriptedWorker {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, ctx: WorkerContext) -> WorkerFuture {
        let steps = self.steps.clone();
        let exit_code = self.exit_code;
        let on_stop = self.on_stop;
        let seen = Arc::clone(&self.seen);

        Box::pin(async move {
            let WorkerContext { params, mut channel } = ctx;
            seen.lock().expect("seen lock poisoned").push(params.clone());

            for step in steps {
                match step {
                    Step::Send(payload) => {
                        let _ = channel.send(Message::Data(payload));
                    }
                    Step::SendParams => {
                        for (name, value) in params.iter() {
                            let mut line = format!("{name}=").into_bytes();
                            line.extend_from_slice(value);
                            let _ = channel.send(Message::Data(line));
                        }
                    }
                    Step::Sleep(duration) => {
                        let nap = tokio::time::sleep(duration);
                        tokio::pin!(nap);
                        loop {
                            tokio::select! {
                                _ = &mut nap => break,
                                msg = channel.recv() => {
                                    if let Some(code) = on_message(msg, on_stop).await {
                                        return code;
                                    }
                                }
                            }
                        }
                    }
                }
            }

            if let Some(code) = exit_code {
                return code;
            }
            loop {
                let msg = channel.recv().await;
                if let Some(code) = on_message(msg, on_stop).await {
                    return code;
                }
            }
        })
    }
}

/// `Some(code)` when the worker should exit now.
async fn on_message(msg: Result<Message>, on_stop: OnStop) -> Option<i32> {
    match (msg, on_stop) {
        (Ok(Message::Data(_)), _) => None,
        (Ok(Message::Stop), OnStop::Exit(code)) | (Err(_), OnStop::Exit(code)) => Some(code),
        (Ok(Message::Stop), OnStop::Ignore) => None,
        // Nobody left to talk to and told to ignore stops: hang until killed.
        (Err(_), OnStop::Ignore) => std::future::pending().await,
    }
}

/// Receive up to `n` data messages from `controller` as UTF-8 strings,
/// giving up on the first receive that takes longer than `timeout`.
pub async fn receive_text(
    controller: &mut WorkerController,
    n: usize,
    timeout: Duration,
) -> Vec<String> {
    let mut out = Vec::new();
    while out.len() < n {
        match controller.receive(timeout).await {
            Ok(Some(Message::Data(bytes))) => {
                out.push(String::from_utf8_lossy(&bytes).into_owned())
            }
            Ok(Some(Message::Stop)) => {}
            Ok(None) | Err(_) => break,
        }
    }
    out
}
