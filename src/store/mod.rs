// src/store/mod.rs

//! Keyed storage of opaque records used by worker bodies.
//!
//! Errors follow the lifecycle taxonomy: inserting an existing key is
//! `ObjectExists`, touching a missing key is `ObjectDoesNotExist`, a bad key
//! or an undersized read buffer is `ParameterError`, and an underlying I/O
//! failure is `StrategyError`.

mod file;

pub use file::FileRecordStore;

use crate::errors::Result;

pub trait RecordStore {
    /// Free-form text supplied when the store was created.
    fn description(&self) -> &str;

    /// Number of records currently stored.
    fn count(&self) -> u64;

    fn contains(&self, key: &str) -> bool;

    fn insert(&mut self, key: &str, data: &[u8]) -> Result<()>;

    /// Copy the record into `buf` and return its length.
    fn read(&self, key: &str, buf: &mut [u8]) -> Result<u64>;

    /// Size of the record in bytes.
    fn length(&self, key: &str) -> Result<u64>;

    fn remove(&mut self, key: &str) -> Result<()>;

    /// Overwrite an existing record.
    fn replace(&mut self, key: &str, data: &[u8]) -> Result<()>;

    /// Make the record durable.
    fn flush(&self, key: &str) -> Result<()>;

    /// Read the whole record into a new buffer.
    fn read_to_vec(&self, key: &str) -> Result<Vec<u8>> {
        let len = usize::try_from(self.length(key)?).map_err(|_| {
            crate::errors::ProcworkerError::StrategyError(format!(
                "record '{key}' does not fit in memory"
            ))
        })?;
        let mut buf = vec![0u8; len];
        let n = self.read(key, &mut buf)?;
        buf.truncate(n as usize);
        Ok(buf)
    }
}
