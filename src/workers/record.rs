// src/workers/record.rs

use tracing::{debug, error, info};

use super::{EXIT_SETUP_FAILED, RECORD};
use crate::channel::Message;
use crate::errors::{ProcworkerError, Result};
use crate::params::ParameterSet;
use crate::store::{FileRecordStore, RecordStore};
use crate::worker::{Worker, WorkerContext, WorkerFuture};

const DEFAULT_PREFIX: &str = "record";

/// Exit status when a record could not be written.
const EXIT_WRITE_FAILED: i32 = 1;

/// Stores every data message in a [`FileRecordStore`].
///
/// Parameters: `store_dir` (required) and `prefix` (default `record`).
/// Each message becomes record `<prefix>-<n>` with the first free `n`, is
/// flushed, and is acknowledged by sending the key back. Exits 0 on `Stop`
/// and [`EXIT_SETUP_FAILED`] when the store cannot be opened.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordWorker;

fn open_store(params: &ParameterSet) -> Result<(FileRecordStore, String)> {
    let dir = params.get_str("store_dir")?.ok_or_else(|| {
        ProcworkerError::ParameterError("parameter 'store_dir' is required".to_string())
    })?;
    let prefix = params.get_str("prefix")?.unwrap_or(DEFAULT_PREFIX).to_string();
    let store = FileRecordStore::open_or_create(dir, "records written by the record worker")?;
    Ok((store, prefix))
}

fn store_one(store: &mut FileRecordStore, key: &str, payload: &[u8]) -> Result<()> {
    store.insert(key, payload)?;
    store.flush(key)
}

impl Worker for RecordWorker {
    fn name(&self) -> &str {
        RECORD
    }

    fn run(&self, ctx: WorkerContext) -> WorkerFuture {
        Box::pin(async move {
            let WorkerContext { params, mut channel } = ctx;
            let (mut store, prefix) = match open_store(&params) {
                Ok(opened) => opened,
                Err(e) => {
                    error!(worker = RECORD, error = %e, "cannot open record store");
                    return EXIT_SETUP_FAILED;
                }
            };
            info!(
                worker = RECORD,
                dir = %store.directory().display(),
                existing = store.count(),
                "record store ready"
            );

            let mut next: u64 = 0;
            loop {
                match channel.recv().await {
                    Ok(Message::Data(payload)) => {
                        let mut key = format!("{prefix}-{next}");
                        while store.contains(&key) {
                            next += 1;
                            key = format!("{prefix}-{next}");
                        }
                        next += 1;

                        if let Err(e) = store_one(&mut store, &key, &payload) {
                            error!(worker = RECORD, key = %key, error = %e, "write failed");
                            return EXIT_WRITE_FAILED;
                        }
                        debug!(worker = RECORD, key = %key, bytes = payload.len(), "stored");
                        let _ = channel.send(Message::data(key));
                    }
                    Ok(Message::Stop) | Err(_) => {
                        info!(worker = RECORD, count = store.count(), "record worker stopping");
                        return 0;
                    }
                }
            }
        })
    }
}
