// tests/process_backend.rs
//
// These run real worker hosts: the `procworker` binary in `host` mode.

mod common;
use crate::common::scripted::{ScriptedWorker, receive_text};
use crate::common::{init_tracing, with_timeout};

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use procworker::errors::ErrorKind;
use procworker::store::{FileRecordStore, RecordStore};
use procworker::workers::{EchoWorker, RecordWorker, SleepWorker, StubbornWorker};
use procworker::{Manager, ProcessBackend, Worker, WorkerController, WorkerExit, WorkerState};

type TestResult = Result<(), Box<dyn Error>>;

fn host_backend() -> Arc<ProcessBackend> {
    Arc::new(ProcessBackend::new(env!("CARGO_BIN_EXE_procworker")).arg("host"))
}

fn controller(worker: impl Worker) -> WorkerController {
    WorkerController::new(Arc::new(worker), host_backend())
        .with_grace_period(Duration::from_millis(500))
}

#[tokio::test]
async fn echo_round_trip_over_pipes() -> TestResult {
    init_tracing();
    let mut manager = Manager::new();
    let idx = manager.add_worker(controller(EchoWorker))?;
    manager.start_worker(idx).await?;

    let ctl = manager.controller_mut(idx).unwrap();
    assert!(ctl.is_working());
    ctl.send(b"\x00binary\xffpayload".to_vec())?;
    ctl.send("second")?;

    let first = with_timeout(ctl.receive(Duration::from_secs(5))).await?;
    assert_eq!(
        first,
        Some(procworker::Message::Data(b"\x00binary\xffpayload".to_vec()))
    );
    let second = receive_text(ctl, 1, Duration::from_secs(5)).await;
    assert_eq!(second, vec!["second"]);

    let exit = with_timeout(manager.stop_worker(idx)).await?;
    assert_eq!(exit, WorkerExit::Graceful(0));

    let ctl = manager.controller_mut(idx).unwrap();
    let tail = receive_text(ctl, 1, Duration::from_secs(5)).await;
    assert_eq!(tail, vec!["count=2"]);
    Ok(())
}

#[tokio::test]
async fn exit_status_and_parameters_cross_the_process_boundary() -> TestResult {
    init_tracing();
    let mut c = controller(SleepWorker);
    c.set_parameter("duration", "50ms")?;
    c.set_parameter("exit_code", "3")?;

    let mut manager = Manager::new();
    let idx = manager.add_worker(c)?;
    manager.start_worker(idx).await?;

    let done = with_timeout(manager.wait_for_any(Duration::from_secs(4))).await;
    assert_eq!(done, vec![idx]);

    let status = manager.worker_status(idx)?;
    assert_eq!(status.state, WorkerState::Stopped);
    assert_eq!(status.exit, Some(WorkerExit::Graceful(3)));
    Ok(())
}

#[tokio::test]
async fn stubborn_child_is_killed_after_grace_period() -> TestResult {
    init_tracing();
    let mut manager = Manager::new();
    let idx = manager.add_worker(controller(StubbornWorker))?;
    manager.start_worker(idx).await?;

    let before = std::time::Instant::now();
    let exit = with_timeout(manager.stop_worker(idx)).await?;
    assert_eq!(exit, WorkerExit::Forced);
    assert!(before.elapsed() >= Duration::from_millis(500));
    Ok(())
}

#[tokio::test]
async fn record_worker_writes_through_to_the_store() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let store_dir = dir.path().join("records");

    let mut c = controller(RecordWorker);
    c.set_parameter("store_dir", store_dir.to_str().unwrap())?;
    c.set_parameter("prefix", "img")?;

    let mut manager = Manager::new();
    let idx = manager.add_worker(c)?;
    manager.start_worker(idx).await?;

    let ctl = manager.controller_mut(idx).unwrap();
    ctl.send("alpha")?;
    ctl.send("beta")?;
    let acks = receive_text(ctl, 2, Duration::from_secs(5)).await;
    assert_eq!(acks, vec!["img-0", "img-1"]);

    assert_eq!(
        with_timeout(manager.stop_worker(idx)).await?,
        WorkerExit::Graceful(0)
    );

    let store = FileRecordStore::open(&store_dir)?;
    assert_eq!(store.count(), 2);
    assert_eq!(store.read_to_vec("img-0")?, b"alpha");
    Ok(())
}

#[tokio::test]
async fn record_worker_without_store_dir_exits_with_setup_failure() -> TestResult {
    init_tracing();
    let mut manager = Manager::new();
    let idx = manager.add_worker(controller(RecordWorker))?;
    manager.start_worker(idx).await?;

    let all = with_timeout(manager.wait_for_all(Duration::from_secs(4))).await;
    assert_eq!(
        all[idx].exit,
        Some(WorkerExit::Graceful(procworker::workers::EXIT_SETUP_FAILED))
    );
    Ok(())
}

#[tokio::test]
async fn worker_unknown_to_the_host_fails() -> TestResult {
    init_tracing();
    let mut manager = Manager::new();
    let idx = manager.add_worker(controller(ScriptedWorker::new("not-in-host")))?;

    // The host may exit before it has read the parameters, which surfaces
    // as a launch failure; otherwise it exits with status 1.
    match manager.start_worker(idx).await {
        Err(e) => assert_eq!(e.kind(), ErrorKind::StrategyError),
        Ok(()) => {
            let all = with_timeout(manager.wait_for_all(Duration::from_secs(4))).await;
            assert_eq!(all[idx].exit, Some(WorkerExit::Graceful(1)));
        }
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn process_exists(pid: u32) -> bool {
    std::path::Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn dropping_the_manager_reclaims_children() -> TestResult {
    init_tracing();
    let mut manager = Manager::new();
    let idx = manager.add_worker(controller(StubbornWorker))?;
    manager.start_worker(idx).await?;
    assert_eq!(manager.running_indices(), vec![idx]);

    let pid = manager
        .controller(idx)
        .and_then(WorkerController::pid)
        .ok_or("process-backed worker should report a pid")?;
    assert!(process_exists(pid));

    drop(manager);

    // The host ignores Stop, so only a kill gets rid of it.
    with_timeout(async {
        while process_exists(pid) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    Ok(())
}

#[tokio::test]
async fn oversized_message_is_refused_and_the_channel_keeps_working() -> TestResult {
    init_tracing();
    let mut manager = Manager::new();
    let idx = manager.add_worker(controller(EchoWorker))?;
    manager.start_worker(idx).await?;

    let ctl = manager.controller_mut(idx).unwrap();
    let err = ctl
        .send(vec![0u8; procworker::channel::codec::MAX_CHUNK_LEN + 1])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ParameterError);

    ctl.send("still here")?;
    assert_eq!(
        receive_text(ctl, 1, Duration::from_secs(5)).await,
        vec!["still here"]
    );

    assert_eq!(
        with_timeout(manager.stop_worker(idx)).await?,
        WorkerExit::Graceful(0)
    );
    // Only a delivered Stop makes the echo worker report its count.
    let ctl = manager.controller_mut(idx).unwrap();
    assert_eq!(
        receive_text(ctl, 1, Duration::from_secs(5)).await,
        vec!["count=1"]
    );
    Ok(())
}
