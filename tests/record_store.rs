// tests/record_store.rs

use std::error::Error;

use procworker::errors::ErrorKind;
use procworker::store::{FileRecordStore, RecordStore};

type TestResult = Result<(), Box<dyn Error>>;

/// Exercise a store through the trait only.
fn fill_and_drain<S: RecordStore>(store: &mut S, n: usize) -> TestResult {
    for i in 0..n {
        store.insert(&format!("k{i}"), format!("value {i}").as_bytes())?;
    }
    assert_eq!(store.count(), n as u64);

    for i in 0..n {
        let key = format!("k{i}");
        let expected = format!("value {i}");
        assert_eq!(store.length(&key)?, expected.len() as u64);
        assert_eq!(store.read_to_vec(&key)?, expected.as_bytes());
    }

    for i in (0..n).step_by(2) {
        store.remove(&format!("k{i}"))?;
    }
    assert_eq!(store.count(), (n / 2) as u64);
    Ok(())
}

#[test]
fn test_trait_level_usage() -> TestResult {
    let dir = tempfile::tempdir()?;
    let mut store = FileRecordStore::create(dir.path().join("s"), "trait test")?;
    fill_and_drain(&mut store, 10)?;
    assert!(store.contains("k1"));
    assert!(!store.contains("k0"));
    Ok(())
}

#[test]
fn test_state_survives_reopen() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("s");
    {
        let mut store = FileRecordStore::create(&path, "persisted")?;
        fill_and_drain(&mut store, 4)?;
        store.replace("k1", b"changed")?;
        store.flush("k1")?;
    }

    let mut store = FileRecordStore::open(&path)?;
    assert_eq!(store.description(), "persisted");
    assert_eq!(store.count(), 2);
    assert_eq!(store.read_to_vec("k1")?, b"changed");

    let err = store.insert("k3", b"again").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ObjectExists);
    Ok(())
}

#[test]
fn test_read_into_exact_and_larger_buffers() -> TestResult {
    let dir = tempfile::tempdir()?;
    let mut store = FileRecordStore::create(dir.path().join("s"), "")?;
    store.insert("blob", &[7u8; 32])?;

    let mut exact = [0u8; 32];
    assert_eq!(store.read("blob", &mut exact)?, 32);

    let mut larger = [1u8; 40];
    assert_eq!(store.read("blob", &mut larger)?, 32);
    assert_eq!(&larger[32..], &[1u8; 8]);

    let mut small = [0u8; 31];
    assert_eq!(
        store.read("blob", &mut small).unwrap_err().kind(),
        ErrorKind::ParameterError
    );
    assert_eq!(
        store.read("nope", &mut exact).unwrap_err().kind(),
        ErrorKind::ObjectDoesNotExist
    );
    Ok(())
}
