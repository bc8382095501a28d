//! Coordinator behavior when the engine misbehaves.

use recordlock_core::{LockConfig, LockCoordinator, LockError, LockRecord, Lockable, StorageError};
use recordlock_testkit::ScriptedGateway;
use std::sync::Arc;
use std::time::Duration;

fn create_coordinator() -> (Arc<ScriptedGateway>, LockCoordinator<ScriptedGateway>) {
    let gateway = Arc::new(ScriptedGateway::new());
    let coordinator = LockCoordinator::new(Arc::clone(&gateway), LockConfig::default());
    (gateway, coordinator)
}

fn record() -> LockRecord {
    LockRecord::new("account", "42", 5u64)
}

#[test]
fn one_row_is_success() {
    let (gateway, coordinator) = create_coordinator();
    let mut record = record();

    coordinator.acquire(&mut record).unwrap();
    coordinator.release(None, &record, ()).result.unwrap();

    assert_eq!(gateway.begun(), 1);
    assert_eq!(gateway.reads(), 1);
    assert_eq!(gateway.committed(), 1);
}

#[test]
fn zero_rows_is_conflict() {
    let (gateway, coordinator) = create_coordinator();
    gateway.set_row_count(0);
    let mut record = record();

    let err = coordinator.acquire(&mut record).unwrap_err();
    assert!(matches!(
        err,
        LockError::LockConflict { ref table, ref key, ref version }
            if table == "account" && key == "42" && version == "5"
    ));
    coordinator.release(None, &record, ()).result.unwrap();
    assert_eq!(gateway.open(), 0);
}

#[test]
fn several_rows_is_schema_violation() {
    let (gateway, coordinator) = create_coordinator();
    gateway.set_row_count(2);
    let mut record = record();

    let err = coordinator.acquire(&mut record).unwrap_err();
    assert!(matches!(
        err,
        LockError::SchemaInvariantViolation { rows: 2, .. }
    ));

    // The violating transaction stays registered until released.
    assert!(coordinator.is_locked(&record.lock_token().unwrap()));
    coordinator.release(None, &record, ()).result.unwrap();
}

#[test]
fn begin_failure_leaves_nothing_to_release() {
    let (gateway, coordinator) = create_coordinator();
    gateway.fail_next_begin(StorageError::Connection("refused".into()));
    let mut record = record();

    let err = coordinator.acquire(&mut record).unwrap_err();
    assert!(matches!(err, LockError::Storage(StorageError::Connection(_))));
    assert!(record.lock_token().is_none());
    assert_eq!(coordinator.active_locks(), 0);
    assert_eq!(gateway.begun(), 0);
}

#[test]
fn locking_read_timeout_keeps_token_releasable() {
    let (gateway, coordinator) = create_coordinator();
    gateway.fail_next_lock(StorageError::timeout(
        "locking read",
        Duration::from_millis(30),
    ));
    let mut record = record();

    let err = coordinator.acquire(&mut record).unwrap_err();
    assert!(err.is_timeout());
    assert!(record.lock_token().is_some());

    coordinator.release(None, &record, ()).result.unwrap();
    assert_eq!(gateway.committed(), 1);
    assert_eq!(gateway.open(), 0);
}

#[test]
fn commit_failure_beats_prior_error() {
    let (gateway, coordinator) = create_coordinator();
    let mut record = record();
    coordinator.acquire(&mut record).unwrap();

    gateway.fail_next_commit(StorageError::Query("could not serialize access".into()));
    let released = coordinator.release(
        Some(LockError::critical_section("caller failed")),
        &record,
        99,
    );

    match released.result {
        Err(LockError::CommitFailure { token, source }) => {
            assert_eq!(Some(token), record.lock_token());
            assert!(matches!(source, StorageError::Query(_)));
        }
        other => panic!("expected commit failure, got {other:?}"),
    }
    assert_eq!(released.passthrough, 99);

    // The entry is gone and the transaction was rolled back when dropped.
    assert_eq!(coordinator.active_locks(), 0);
    assert_eq!(gateway.rolled_back(), 1);
    assert!(matches!(
        coordinator.release(None, &record, ()).result,
        Err(LockError::LockNotFound { .. })
    ));
}

#[test]
fn lock_rolls_back_failed_acquire() {
    let (gateway, coordinator) = create_coordinator();
    gateway.set_row_count(0);
    let mut record = record();

    assert!(coordinator.lock(&mut record).is_err());
    assert_eq!(coordinator.active_locks(), 0);
    assert_eq!(gateway.committed(), 1);
    assert_eq!(gateway.open(), 0);
}

#[test]
fn guard_drop_logs_commit_failure() {
    let (gateway, coordinator) = create_coordinator();
    let mut record = record();

    {
        let _guard = coordinator.lock(&mut record).unwrap();
        gateway.fail_next_commit(StorageError::Connection("reset by peer".into()));
    }

    assert_eq!(coordinator.active_locks(), 0);
    assert_eq!(gateway.committed(), 0);
    assert_eq!(gateway.rolled_back(), 1);
}
