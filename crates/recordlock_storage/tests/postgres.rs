//! PostgreSQL gateway against a live server.
//!
//! Run with: `DATABASE_URL=postgres://... cargo test -p recordlock_storage
//! --features postgres -- --ignored`

#![cfg(feature = "postgres")]

use r2d2_postgres::postgres::{Client, NoTls};
use recordlock_storage::{
    IsolationLevel, LockQuery, LockedRow, PostgresConfig, PostgresGateway, PostgresTransaction,
    RecordKey, StorageError, StorageGateway, StorageResult, TableName, VersionStamp,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

static NEXT_TABLE: AtomicUsize = AtomicUsize::new(0);

fn database_url() -> Option<String> {
    std::env::var("DATABASE_URL").ok().filter(|url| !url.is_empty())
}

/// A freshly created table holding `id = 1, _version = 5`, dropped afterwards.
struct ScratchTable {
    admin: Client,
    name: TableName,
}

impl ScratchTable {
    fn create(url: &str, columns: &str) -> Self {
        let mut admin = Client::connect(url, NoTls).unwrap();
        let name = TableName::new(format!(
            "recordlock_it_{}_{}",
            std::process::id(),
            NEXT_TABLE.fetch_add(1, Ordering::SeqCst)
        ));
        admin
            .batch_execute(&format!(
                "DROP TABLE IF EXISTS {name}; \
                 CREATE TABLE {name} ({columns}); \
                 INSERT INTO {name} (id, _version) VALUES (1, 5)"
            ))
            .unwrap();
        Self { admin, name }
    }

    fn integer_keys(url: &str) -> Self {
        Self::create(url, "id integer PRIMARY KEY, _version integer NOT NULL")
    }

    fn version(&mut self) -> String {
        let row = self
            .admin
            .query_one(
                &format!("SELECT _version::text FROM {} WHERE id = 1", self.name),
                &[],
            )
            .unwrap();
        row.get(0)
    }

    /// Tries to lock the row from outside the pool without waiting.
    fn row_is_free(&mut self) -> bool {
        let mut txn = self.admin.transaction().unwrap();
        txn.batch_execute("SET LOCAL lock_timeout = 200").unwrap();
        let free = txn
            .query(
                &format!("SELECT id FROM {} WHERE id = 1 FOR UPDATE", self.name),
                &[],
            )
            .is_ok();
        let _ = txn.rollback();
        free
    }
}

impl Drop for ScratchTable {
    fn drop(&mut self) {
        let _ = self
            .admin
            .batch_execute(&format!("DROP TABLE IF EXISTS {}", self.name));
    }
}

fn create_gateway(url: &str) -> PostgresGateway {
    let config = PostgresConfig::new(url).with_max_connections(4);
    PostgresGateway::connect(config).unwrap()
}

fn lock(
    gateway: &PostgresGateway,
    txn: &mut PostgresTransaction,
    table: &TableName,
    key: &str,
    version: &str,
    deadline: Option<Instant>,
) -> StorageResult<Vec<LockedRow>> {
    let key = RecordKey::new(key);
    let version = VersionStamp::new(version);
    let query = LockQuery {
        table,
        key: &key,
        version: &version,
    };
    gateway.lock_rows(txn, &query, deadline)
}

fn session_timeouts(txn: &mut PostgresTransaction) -> (String, String) {
    let client = txn.client_mut();
    let lock_timeout = client.query_one("SHOW lock_timeout", &[]).unwrap().get(0);
    let statement_timeout = client
        .query_one("SHOW statement_timeout", &[])
        .unwrap()
        .get(0);
    (lock_timeout, statement_timeout)
}

fn soon(ms: u64) -> Option<Instant> {
    Some(Instant::now() + Duration::from_millis(ms))
}

#[test]
#[ignore = "requires DATABASE_URL"]
fn matching_version_locks_one_row() {
    let Some(url) = database_url() else { return };
    let table = ScratchTable::integer_keys(&url);
    let gateway = create_gateway(&url);

    let mut txn = gateway
        .begin_transaction(IsolationLevel::ReadCommitted, soon(5_000))
        .unwrap();
    let rows = lock(&gateway, &mut txn, &table.name, "1", "5", soon(5_000)).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].key, RecordKey::new("1"));
    assert_eq!(rows[0].version, VersionStamp::new("5"));

    gateway.commit(&mut txn).unwrap();
    assert!(!txn.is_active());
}

#[test]
#[ignore = "requires DATABASE_URL"]
fn text_keys_and_bigint_versions_lock() {
    let Some(url) = database_url() else { return };
    let table = ScratchTable::create(
        &url,
        "id varchar(36) PRIMARY KEY, _version bigint NOT NULL",
    );
    let gateway = create_gateway(&url);

    let mut txn = gateway
        .begin_transaction(IsolationLevel::ReadCommitted, None)
        .unwrap();
    let rows = lock(&gateway, &mut txn, &table.name, "1", "5", None).unwrap();
    assert_eq!(rows.len(), 1);
    gateway.commit(&mut txn).unwrap();
}

#[test]
#[ignore = "requires DATABASE_URL"]
fn stale_version_matches_no_rows() {
    let Some(url) = database_url() else { return };
    let table = ScratchTable::integer_keys(&url);
    let gateway = create_gateway(&url);

    let mut txn = gateway
        .begin_transaction(IsolationLevel::ReadCommitted, None)
        .unwrap();
    assert!(lock(&gateway, &mut txn, &table.name, "1", "4", None)
        .unwrap()
        .is_empty());
    assert!(lock(&gateway, &mut txn, &table.name, "2", "5", None)
        .unwrap()
        .is_empty());
    gateway.commit(&mut txn).unwrap();
}

#[test]
#[ignore = "requires DATABASE_URL"]
fn contended_row_times_out() {
    let Some(url) = database_url() else { return };
    let table = ScratchTable::integer_keys(&url);
    let gateway = create_gateway(&url);

    let mut holder = gateway
        .begin_transaction(IsolationLevel::ReadCommitted, None)
        .unwrap();
    assert_eq!(
        lock(&gateway, &mut holder, &table.name, "1", "5", None)
            .unwrap()
            .len(),
        1
    );

    let mut waiter = gateway
        .begin_transaction(IsolationLevel::ReadCommitted, None)
        .unwrap();
    let started = Instant::now();
    let err = lock(&gateway, &mut waiter, &table.name, "1", "5", soon(200)).unwrap_err();
    assert!(err.is_timeout(), "expected timeout, got {err:?}");
    assert!(started.elapsed() < Duration::from_secs(5));

    drop(waiter);
    gateway.commit(&mut holder).unwrap();
}

#[test]
#[ignore = "requires DATABASE_URL"]
fn unknown_table_is_reported_by_name() {
    let Some(url) = database_url() else { return };
    let gateway = create_gateway(&url);
    let missing = TableName::new(format!("recordlock_missing_{}", std::process::id()));

    let mut txn = gateway
        .begin_transaction(IsolationLevel::ReadCommitted, None)
        .unwrap();
    let err = lock(&gateway, &mut txn, &missing, "1", "5", None).unwrap_err();
    match err {
        StorageError::UnknownTable { table } => assert_eq!(table, missing.as_str()),
        other => panic!("expected unknown table, got {other:?}"),
    }
}

#[test]
#[ignore = "requires DATABASE_URL"]
fn timeouts_do_not_outlive_locking_read() {
    let Some(url) = database_url() else { return };
    let table = ScratchTable::integer_keys(&url);
    let gateway = create_gateway(&url);

    let mut txn = gateway
        .begin_transaction(IsolationLevel::ReadCommitted, None)
        .unwrap();
    let before = session_timeouts(&mut txn);

    lock(&gateway, &mut txn, &table.name, "1", "5", soon(300)).unwrap();
    assert_eq!(session_timeouts(&mut txn), before);

    // Well past the read's deadline, the transaction still commits.
    std::thread::sleep(Duration::from_millis(400));
    gateway.commit(&mut txn).unwrap();
}

#[test]
#[ignore = "requires DATABASE_URL"]
fn work_on_the_connection_commits_with_the_lock() {
    let Some(url) = database_url() else { return };
    let mut table = ScratchTable::integer_keys(&url);
    let gateway = create_gateway(&url);

    let mut txn = gateway
        .begin_transaction(IsolationLevel::ReadCommitted, None)
        .unwrap();
    lock(&gateway, &mut txn, &table.name, "1", "5", None).unwrap();
    txn.client_mut()
        .execute(
            &format!("UPDATE {} SET _version = 6 WHERE id = 1", table.name),
            &[],
        )
        .unwrap();
    gateway.commit(&mut txn).unwrap();

    assert_eq!(table.version(), "6");
}

#[test]
#[ignore = "requires DATABASE_URL"]
fn dropped_transaction_rolls_back() {
    let Some(url) = database_url() else { return };
    let mut table = ScratchTable::integer_keys(&url);
    let gateway = create_gateway(&url);

    {
        let mut txn = gateway
            .begin_transaction(IsolationLevel::ReadCommitted, None)
            .unwrap();
        lock(&gateway, &mut txn, &table.name, "1", "5", None).unwrap();
        txn.client_mut()
            .execute(
                &format!("UPDATE {} SET _version = 6 WHERE id = 1", table.name),
                &[],
            )
            .unwrap();
        assert!(!table.row_is_free());
    }

    assert!(table.row_is_free());
    assert_eq!(table.version(), "5");
}
