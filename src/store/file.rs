// src/store/file.rs

//! A record store kept in one directory: one file per record plus a small
//! TOML control file holding the description and record count.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::RecordStore;
use crate::errors::{ProcworkerError, Result};

const CONTROL_FILE: &str = ".control.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Control {
    description: String,
    count: u64,
}

#[derive(Debug)]
pub struct FileRecordStore {
    directory: PathBuf,
    control: Control,
}

impl FileRecordStore {
    /// Create a new store in `directory`, which must not exist yet.
    pub fn create(directory: impl AsRef<Path>, description: &str) -> Result<Self> {
        let directory = directory.as_ref();
        if directory.exists() {
            return Err(ProcworkerError::ObjectExists(format!(
                "record store directory {} already exists",
                directory.display()
            )));
        }

        fs::create_dir_all(directory)
            .with_context(|| format!("creating record store {}", directory.display()))
            .map_err(ProcworkerError::strategy)?;

        let store = Self {
            directory: directory.to_path_buf(),
            control: Control {
                description: description.to_string(),
                count: 0,
            },
        };
        store.write_control()?;
        debug!(dir = %directory.display(), "record store created");
        Ok(store)
    }

    /// Open an existing store.
    pub fn open(directory: impl AsRef<Path>) -> Result<Self> {
        let directory = directory.as_ref();
        let control_path = directory.join(CONTROL_FILE);
        if !control_path.is_file() {
            return Err(ProcworkerError::ObjectDoesNotExist(format!(
                "no record store at {}",
                directory.display()
            )));
        }

        let text = fs::read_to_string(&control_path)
            .with_context(|| format!("reading {}", control_path.display()))
            .map_err(ProcworkerError::strategy)?;
        let control: Control = toml::from_str(&text)
            .with_context(|| format!("parsing {}", control_path.display()))
            .map_err(ProcworkerError::strategy)?;

        debug!(dir = %directory.display(), count = control.count, "record store opened");
        Ok(Self {
            directory: directory.to_path_buf(),
            control,
        })
    }

    /// Open the store in `directory`, creating it when it does not exist.
    pub fn open_or_create(directory: impl AsRef<Path>, description: &str) -> Result<Self> {
        let directory = directory.as_ref();
        if directory.join(CONTROL_FILE).is_file() {
            Self::open(directory)
        } else if directory.is_dir() && is_empty_dir(directory)? {
            // An empty directory (e.g. a fresh temp dir) is adopted as-is.
            let store = Self {
                directory: directory.to_path_buf(),
                control: Control {
                    description: description.to_string(),
                    count: 0,
                },
            };
            store.write_control()?;
            Ok(store)
        } else {
            Self::create(directory, description)
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn record_path(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.directory.join(key))
    }

    fn existing_record(&self, key: &str) -> Result<PathBuf> {
        let path = self.record_path(key)?;
        if !path.is_file() {
            return Err(ProcworkerError::ObjectDoesNotExist(format!(
                "no record '{key}' in {}",
                self.directory.display()
            )));
        }
        Ok(path)
    }

    fn write_control(&self) -> Result<()> {
        let path = self.directory.join(CONTROL_FILE);
        let text = toml::to_string(&self.control)
            .context("serializing record store control data")
            .map_err(ProcworkerError::strategy)?;
        fs::write(&path, text)
            .with_context(|| format!("writing {}", path.display()))
            .map_err(ProcworkerError::strategy)
    }
}

impl RecordStore for FileRecordStore {
    fn description(&self) -> &str {
        &self.control.description
    }

    fn count(&self) -> u64 {
        self.control.count
    }

    fn contains(&self, key: &str) -> bool {
        self.record_path(key).map(|p| p.is_file()).unwrap_or(false)
    }

    fn insert(&mut self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.record_path(key)?;
        if path.exists() {
            return Err(ProcworkerError::ObjectExists(format!(
                "record '{key}' already exists in {}",
                self.directory.display()
            )));
        }

        fs::write(&path, data)
            .with_context(|| format!("writing record '{key}'"))
            .map_err(ProcworkerError::strategy)?;
        self.control.count += 1;
        self.write_control()
    }

    fn read(&self, key: &str, buf: &mut [u8]) -> Result<u64> {
        let len = self.length(key)?;
        if (buf.len() as u64) < len {
            return Err(ProcworkerError::ParameterError(format!(
                "buffer of {} bytes is too small for record '{key}' ({len} bytes)",
                buf.len()
            )));
        }

        let path = self.existing_record(key)?;
        let mut file = File::open(&path)
            .with_context(|| format!("opening record '{key}'"))
            .map_err(ProcworkerError::strategy)?;
        // `len` fits in `buf`, which is a usize-sized slice.
        file.read_exact(&mut buf[..len as usize])
            .with_context(|| format!("reading record '{key}'"))
            .map_err(ProcworkerError::strategy)?;
        Ok(len)
    }

    fn length(&self, key: &str) -> Result<u64> {
        let path = self.existing_record(key)?;
        let meta = fs::metadata(&path)
            .with_context(|| format!("stat of record '{key}'"))
            .map_err(ProcworkerError::strategy)?;
        Ok(meta.len())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        let path = self.existing_record(key)?;
        fs::remove_file(&path)
            .with_context(|| format!("removing record '{key}'"))
            .map_err(ProcworkerError::strategy)?;
        self.control.count = self.control.count.saturating_sub(1);
        self.write_control()
    }

    fn replace(&mut self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.existing_record(key)?;
        fs::write(&path, data)
            .with_context(|| format!("replacing record '{key}'"))
            .map_err(ProcworkerError::strategy)
    }

    fn flush(&self, key: &str) -> Result<()> {
        let path = self.existing_record(key)?;
        OpenOptions::new()
            .append(true)
            .open(&path)
            .and_then(|f| f.sync_all())
            .with_context(|| format!("syncing record '{key}'"))
            .map_err(ProcworkerError::strategy)
    }
}

/// Keys become file names, so they may not name anything outside the store
/// or collide with the control file.
fn validate_key(key: &str) -> Result<()> {
    let bad = key.is_empty()
        || key.starts_with('.')
        || key.contains(['/', '\\', '\0']);
    if bad {
        return Err(ProcworkerError::ParameterError(format!(
            "invalid record key {key:?}"
        )));
    }
    Ok(())
}

fn is_empty_dir(directory: &Path) -> Result<bool> {
    let mut entries = fs::read_dir(directory)
        .with_context(|| format!("listing {}", directory.display()))
        .map_err(ProcworkerError::strategy)?;
    Ok(entries.next().transpose().map_err(io_strategy)?.is_none())
}

fn io_strategy(e: io::Error) -> ProcworkerError {
    ProcworkerError::StrategyError(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    fn fresh() -> (tempfile::TempDir, FileRecordStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRecordStore::create(dir.path().join("rs"), "unit test").unwrap();
        (dir, store)
    }

    #[test]
    fn insert_read_replace_remove() {
        let (_dir, mut store) = fresh();

        store.insert("a", b"hello").unwrap();
        assert!(store.contains("a"));
        assert_eq!(store.count(), 1);
        assert_eq!(store.length("a").unwrap(), 5);

        let mut buf = [0u8; 16];
        let n = store.read("a", &mut buf).unwrap();
        assert_eq!(&buf[..n as usize], b"hello");

        store.replace("a", b"hi").unwrap();
        assert_eq!(store.read_to_vec("a").unwrap(), b"hi");
        assert_eq!(store.count(), 1);

        store.remove("a").unwrap();
        assert!(!store.contains("a"));
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn lifecycle_errors_use_the_taxonomy() {
        let (_dir, mut store) = fresh();
        store.insert("a", b"x").unwrap();

        assert_eq!(store.insert("a", b"y").unwrap_err().kind(), ErrorKind::ObjectExists);
        assert_eq!(store.remove("b").unwrap_err().kind(), ErrorKind::ObjectDoesNotExist);
        assert_eq!(
            store.replace("b", b"y").unwrap_err().kind(),
            ErrorKind::ObjectDoesNotExist
        );
        assert_eq!(store.flush("b").unwrap_err().kind(), ErrorKind::ObjectDoesNotExist);
    }

    #[test]
    fn undersized_buffer_is_a_parameter_error() {
        let (_dir, mut store) = fresh();
        store.insert("a", b"0123456789").unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(
            store.read("a", &mut buf).unwrap_err().kind(),
            ErrorKind::ParameterError
        );
    }

    #[test]
    fn keys_cannot_escape_the_directory() {
        let (_dir, mut store) = fresh();
        for key in ["", "../x", "a/b", ".control.toml", "c\\d"] {
            assert_eq!(
                store.insert(key, b"x").unwrap_err().kind(),
                ErrorKind::ParameterError,
                "key {key:?}"
            );
        }
    }

    #[test]
    fn reopen_keeps_description_and_count() {
        let (dir, mut store) = fresh();
        store.insert("a", b"1").unwrap();
        store.insert("b", b"2").unwrap();
        store.flush("b").unwrap();
        drop(store);

        let store = FileRecordStore::open(dir.path().join("rs")).unwrap();
        assert_eq!(store.description(), "unit test");
        assert_eq!(store.count(), 2);
        assert_eq!(store.read_to_vec("b").unwrap(), b"2");
    }

    #[test]
    fn create_and_open_check_existence() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            FileRecordStore::create(dir.path(), "x").unwrap_err().kind(),
            ErrorKind::ObjectExists
        );
        assert_eq!(
            FileRecordStore::open(dir.path().join("missing")).unwrap_err().kind(),
            ErrorKind::ObjectDoesNotExist
        );
    }

    #[test]
    fn open_or_create_adopts_an_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileRecordStore::open_or_create(dir.path(), "adopted").unwrap();
        store.insert("k", b"v").unwrap();

        let again = FileRecordStore::open_or_create(dir.path(), "ignored").unwrap();
        assert_eq!(again.description(), "adopted");
        assert_eq!(again.count(), 1);
    }
}
