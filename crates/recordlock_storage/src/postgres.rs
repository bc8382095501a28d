//! PostgreSQL gateway backed by an r2d2 connection pool.
//!
//! Every transaction checks out its own pooled connection and keeps it until
//! commit or drop. The locking read is issued as `SELECT ... FOR UPDATE`
//! with the key and version bound as text parameters. The parameters are
//! converted to the column types on the server so the predicate stays
//! usable by the primary key index; the column types are looked up once per
//! table by preparing the untyped statement.

use crate::error::{StorageError, StorageResult};
use crate::gateway::{IsolationLevel, StorageGateway};
use crate::types::{LockQuery, LockedRow, RecordKey, TableName, VersionStamp};
use parking_lot::Mutex;
use r2d2::{Pool, PooledConnection};
use r2d2_postgres::postgres::error::SqlState;
use r2d2_postgres::postgres::types::Type;
use r2d2_postgres::postgres::{self, NoTls};
use r2d2_postgres::PostgresConnectionManager;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

type Manager = PostgresConnectionManager<NoTls>;

/// Restores the session timeouts once the locking read is done.
const RESET_TIMEOUTS: &str =
    "SET LOCAL lock_timeout = DEFAULT; SET LOCAL statement_timeout = DEFAULT";

/// Connection settings for [`PostgresGateway`].
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// PostgreSQL connection URL.
    pub url: String,
    /// Primary key column of lockable tables.
    pub key_column: String,
    /// Version stamp column of lockable tables.
    pub version_column: String,
    /// Maximum number of pooled connections.
    pub max_connections: u32,
    /// Pool checkout timeout used when the caller sets no deadline.
    pub connection_timeout: Duration,
}

impl PostgresConfig {
    /// Creates a configuration for the given URL with default columns.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            key_column: "id".into(),
            version_column: "_version".into(),
            max_connections: 10,
            connection_timeout: Duration::from_secs(30),
        }
    }

    /// Loads the configuration from environment variables.
    ///
    /// # Environment Variables
    /// - `DATABASE_URL` - connection string (required)
    /// - `DATABASE_MAX_CONNECTIONS` - pool size (default: 10)
    /// - `DATABASE_CONNECTION_TIMEOUT_SECS` - checkout timeout (default: 30)
    /// - `RECORDLOCK_KEY_COLUMN` - primary key column (default: `id`)
    /// - `RECORDLOCK_VERSION_COLUMN` - version column (default: `_version`)
    ///
    /// # Errors
    ///
    /// Returns an error if `DATABASE_URL` is missing or empty.
    pub fn from_env() -> StorageResult<Self> {
        let url = std::env::var("DATABASE_URL").unwrap_or_default();
        if url.is_empty() {
            return Err(StorageError::Invalid("DATABASE_URL is not set".into()));
        }
        let mut config = Self::new(url);

        if let Some(max) = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
        {
            config.max_connections = max.max(1);
        }
        if let Some(secs) = std::env::var("DATABASE_CONNECTION_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.connection_timeout = Duration::from_secs(secs);
        }
        if let Ok(column) = std::env::var("RECORDLOCK_KEY_COLUMN") {
            config.key_column = column;
        }
        if let Ok(column) = std::env::var("RECORDLOCK_VERSION_COLUMN") {
            config.version_column = column;
        }
        Ok(config)
    }

    /// Sets the primary key column.
    #[must_use]
    pub fn with_key_column(mut self, column: impl Into<String>) -> Self {
        self.key_column = column.into();
        self
    }

    /// Sets the version stamp column.
    #[must_use]
    pub fn with_version_column(mut self, column: impl Into<String>) -> Self {
        self.version_column = column.into();
        self
    }

    /// Sets the pool size.
    #[must_use]
    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max.max(1);
        self
    }
}

/// An open PostgreSQL transaction on a pooled connection.
pub struct PostgresTransaction {
    conn: PooledConnection<Manager>,
    isolation: IsolationLevel,
    active: bool,
}

impl PostgresTransaction {
    /// Returns the isolation level the transaction was opened with.
    #[must_use]
    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    /// Checks if the transaction is still open.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Returns the connection the transaction runs on.
    #[must_use]
    pub fn client(&self) -> &postgres::Client {
        &self.conn
    }

    /// Returns the connection for running statements inside the transaction.
    ///
    /// Statements executed here commit or roll back together with the lock.
    /// Do not issue `COMMIT` or `ROLLBACK` directly; the gateway ends the
    /// transaction.
    pub fn client_mut(&mut self) -> &mut postgres::Client {
        &mut self.conn
    }
}

impl fmt::Debug for PostgresTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresTransaction")
            .field("isolation", &self.isolation)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl Drop for PostgresTransaction {
    fn drop(&mut self) {
        if self.active {
            if let Err(err) = self.conn.batch_execute("ROLLBACK") {
                tracing::warn!(error = %err, "rollback of abandoned transaction failed");
            }
        }
    }
}

/// Gateway to a PostgreSQL database.
#[derive(Clone)]
pub struct PostgresGateway {
    pool: Pool<Manager>,
    config: PostgresConfig,
    /// Typed locking statements, keyed by table.
    statements: Arc<Mutex<HashMap<TableName, Arc<str>>>>,
}

impl PostgresGateway {
    /// Builds the connection pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the pool cannot be built.
    pub fn connect(config: PostgresConfig) -> StorageResult<Self> {
        let pg_config = config
            .url
            .parse::<postgres::Config>()
            .map_err(|e| StorageError::Invalid(format!("invalid database URL: {e}")))?;
        let manager = PostgresConnectionManager::new(pg_config, NoTls);
        let pool = Pool::builder()
            .max_size(config.max_connections)
            .connection_timeout(config.connection_timeout)
            .build(manager)
            .map_err(|e| StorageError::Connection(format!("failed to build pool: {e}")))?;
        Ok(Self {
            pool,
            config,
            statements: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &PostgresConfig {
        &self.config
    }

    /// Returns the locking statement for `table`.
    ///
    /// On first use the untyped statement is prepared so the server reports
    /// the key and version column types.
    fn locking_sql(
        &self,
        conn: &mut postgres::Client,
        table: &TableName,
        started: Instant,
    ) -> StorageResult<Arc<str>> {
        if let Some(sql) = self.statements.lock().get(table) {
            return Ok(Arc::clone(sql));
        }

        let untyped = locking_select(
            table,
            &self.config.key_column,
            &self.config.version_column,
            None,
        );
        let stmt = conn
            .prepare(&untyped)
            .map_err(|e| map_pg_error(e, "locking read", started, Some(table)))?;
        let [key_type, version_type] = stmt.params() else {
            return Err(StorageError::Query(format!(
                "locking read on {table} expects 2 parameters, server reported {}",
                stmt.params().len()
            )));
        };

        let sql: Arc<str> = locking_select(
            table,
            &self.config.key_column,
            &self.config.version_column,
            Some((key_type, version_type)),
        )
        .into();
        tracing::debug!(%table, %key_type, %version_type, "prepared locking read");
        self.statements.lock().insert(table.clone(), Arc::clone(&sql));
        Ok(sql)
    }
}

impl fmt::Debug for PostgresGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresGateway")
            .field("key_column", &self.config.key_column)
            .field("version_column", &self.config.version_column)
            .field("max_connections", &self.config.max_connections)
            .finish_non_exhaustive()
    }
}

impl StorageGateway for PostgresGateway {
    type Transaction = PostgresTransaction;

    fn begin_transaction(
        &self,
        isolation: IsolationLevel,
        deadline: Option<Instant>,
    ) -> StorageResult<PostgresTransaction> {
        let started = Instant::now();
        let checkout = match deadline {
            Some(deadline) => {
                let remaining = remaining_before(deadline)
                    .ok_or_else(|| StorageError::timeout("begin transaction", started.elapsed()))?;
                self.pool
                    .get_timeout(remaining)
                    .map_err(|_| StorageError::timeout("begin transaction", started.elapsed()))?
            }
            None => self
                .pool
                .get()
                .map_err(|e| StorageError::Connection(e.to_string()))?,
        };

        let mut txn = PostgresTransaction {
            conn: checkout,
            isolation,
            active: false,
        };
        txn.conn
            .batch_execute(&format!("BEGIN ISOLATION LEVEL {}", isolation.as_sql()))
            .map_err(|e| map_pg_error(e, "begin transaction", started, None))?;
        txn.active = true;
        Ok(txn)
    }

    fn lock_rows(
        &self,
        txn: &mut PostgresTransaction,
        query: &LockQuery<'_>,
        deadline: Option<Instant>,
    ) -> StorageResult<Vec<LockedRow>> {
        if !txn.active {
            return Err(StorageError::TransactionClosed);
        }
        let started = Instant::now();

        if let Some(deadline) = deadline {
            let remaining = remaining_before(deadline)
                .ok_or_else(|| StorageError::timeout("locking read", started.elapsed()))?;
            txn.conn
                .batch_execute(&timeout_statements(remaining))
                .map_err(|e| map_pg_error(e, "locking read", started, None))?;
        }

        let sql = self.locking_sql(&mut txn.conn, query.table, started)?;
        let rows = match txn
            .conn
            .query(&*sql, &[&query.key.as_str(), &query.version.as_str()])
        {
            Ok(rows) => rows,
            Err(err) => {
                let err = map_pg_error(err, "locking read", started, Some(query.table));
                // The table may have been dropped or altered since it was prepared.
                if !err.is_timeout() {
                    self.statements.lock().remove(query.table);
                }
                return Err(err);
            }
        };

        // SET LOCAL would otherwise bound every later statement, COMMIT included.
        if deadline.is_some() {
            txn.conn
                .batch_execute(RESET_TIMEOUTS)
                .map_err(|e| map_pg_error(e, "locking read", started, None))?;
        }

        rows.iter()
            .map(|row| {
                let key: String = row
                    .try_get(0)
                    .map_err(|e| StorageError::Query(e.to_string()))?;
                let version: String = row
                    .try_get(1)
                    .map_err(|e| StorageError::Query(e.to_string()))?;
                Ok(LockedRow {
                    key: RecordKey::new(key),
                    version: VersionStamp::new(version),
                })
            })
            .collect()
    }

    fn commit(&self, txn: &mut PostgresTransaction) -> StorageResult<()> {
        if !txn.active {
            return Err(StorageError::TransactionClosed);
        }
        let started = Instant::now();
        txn.conn
            .batch_execute("COMMIT")
            .map_err(|e| map_pg_error(e, "commit", started, None))?;
        txn.active = false;
        Ok(())
    }
}

/// Quotes an SQL identifier.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Returns the time left before `deadline`, or `None` if it has passed.
fn remaining_before(deadline: Instant) -> Option<Duration> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    (!remaining.is_zero()).then_some(remaining)
}

/// Transaction-scoped timeouts bounding the next statement.
fn timeout_statements(remaining: Duration) -> String {
    // 0 disables both settings in PostgreSQL.
    let ms = remaining.as_millis().max(1);
    format!("SET LOCAL lock_timeout = {ms}; SET LOCAL statement_timeout = {ms}")
}

/// Builds the locking read.
///
/// Without parameter types the statement is only fit for preparing, which
/// lets the server infer the column types. With them, the text parameters
/// are converted server-side and the columns are compared uncast.
fn locking_select(
    table: &TableName,
    key_column: &str,
    version_column: &str,
    param_types: Option<(&Type, &Type)>,
) -> String {
    let key = quote_ident(key_column);
    let version = quote_ident(version_column);
    let (key_param, version_param) = match param_types {
        Some((key_type, version_type)) => {
            (typed_param(1, key_type), typed_param(2, version_type))
        }
        None => ("$1".to_owned(), "$2".to_owned()),
    };
    format!(
        "SELECT {key}::text, {version}::text FROM {table} \
         WHERE {key} = {key_param} AND {version} = {version_param} FOR UPDATE",
        table = quote_ident(table.as_str()),
    )
}

/// A text parameter converted to `ty`.
fn typed_param(index: usize, ty: &Type) -> String {
    format!(
        "${index}::text::{}.{}",
        quote_ident(ty.schema()),
        quote_ident(ty.name())
    )
}

fn map_pg_error(
    err: postgres::Error,
    operation: &'static str,
    started: Instant,
    table: Option<&TableName>,
) -> StorageError {
    if err.is_closed() {
        return StorageError::Connection(err.to_string());
    }
    let message = match err.as_db_error() {
        Some(db) => db.message().to_owned(),
        None => err.to_string(),
    };
    map_sqlstate(err.code(), message, operation, started, table)
}

fn map_sqlstate(
    code: Option<&SqlState>,
    message: String,
    operation: &'static str,
    started: Instant,
    table: Option<&TableName>,
) -> StorageError {
    let Some(code) = code else {
        return StorageError::Query(message);
    };
    if *code == SqlState::UNDEFINED_TABLE {
        if let Some(table) = table {
            return StorageError::UnknownTable {
                table: table.to_string(),
            };
        }
    }
    if *code == SqlState::LOCK_NOT_AVAILABLE || *code == SqlState::QUERY_CANCELED {
        return StorageError::timeout(operation, started.elapsed());
    }
    // The key or version does not fit the column type.
    if *code == SqlState::INVALID_TEXT_REPRESENTATION
        || *code == SqlState::NUMERIC_VALUE_OUT_OF_RANGE
    {
        return StorageError::Invalid(message);
    }
    StorageError::Query(message)
}
