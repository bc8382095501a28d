//! Simulate command implementation.
//!
//! Runs workers against one shared counter record in the in-memory engine.
//! Each round a worker reads the current version, locks the record with
//! that version, holds the lock, writes the next version and releases.

use recordlock_core::{
    InMemoryGateway, IsolationLevel, LockConfig, LockCoordinator, LockError, LockRecord,
    LockResult, Lockable,
};
use serde::Serialize;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

const TABLE: &str = "counter";
const KEY: &str = "1";
const INITIAL_VERSION: u64 = 1;

/// Errors of the simulate command.
#[derive(Debug, Error)]
pub enum SimulateError {
    /// A command-line argument is out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The engine could not be set up.
    #[error(transparent)]
    Setup(#[from] recordlock_core::StorageError),

    /// A worker thread panicked.
    #[error("worker {0} panicked")]
    WorkerPanicked(usize),

    /// The report could not be rendered.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Simulation parameters.
#[derive(Debug, Clone)]
pub struct SimulateOptions {
    /// Number of worker threads.
    pub workers: usize,
    /// Rounds per worker.
    pub rounds: usize,
    /// Time each granted lock is held.
    pub hold: Duration,
    /// Lock timeout override (`Some(0)` disables the timeout).
    pub timeout_ms: Option<u64>,
    /// Isolation level override.
    pub isolation: Option<String>,
}

/// Simulation result.
#[derive(Debug, Serialize)]
pub struct SimulationReport {
    /// Number of worker threads.
    pub workers: usize,
    /// Rounds per worker.
    pub rounds: usize,
    /// Hold time per granted lock, in milliseconds.
    pub hold_ms: u64,
    /// Effective lock timeout in milliseconds (absent = none).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Effective isolation level.
    pub isolation: String,
    /// Total lock attempts.
    pub attempts: usize,
    /// Attempts that incremented the counter.
    pub successes: usize,
    /// Attempts refused because the version had moved on.
    pub conflicts: usize,
    /// Attempts that ran out of time.
    pub timeouts: usize,
    /// Attempts that failed otherwise.
    pub failures: usize,
    /// Counter version before the run.
    pub initial_version: u64,
    /// Counter version after the run.
    pub final_version: u64,
    /// Whether the counter grew by exactly the number of successes.
    pub consistent: bool,
    /// Wall-clock time of the run, in milliseconds.
    pub elapsed_ms: u128,
}

#[derive(Debug, Default, Clone, Copy)]
struct WorkerTally {
    successes: usize,
    conflicts: usize,
    timeouts: usize,
    failures: usize,
}

impl WorkerTally {
    fn record(&mut self, result: &LockResult<()>) {
        match result {
            Ok(()) => self.successes += 1,
            Err(err) if err.is_conflict() => self.conflicts += 1,
            Err(err) if err.is_timeout() => self.timeouts += 1,
            Err(err) => {
                tracing::warn!(error = %err, "round failed");
                self.failures += 1;
            }
        }
    }

    fn merge(&mut self, other: Self) {
        self.successes += other.successes;
        self.conflicts += other.conflicts;
        self.timeouts += other.timeouts;
        self.failures += other.failures;
    }
}

/// Runs the simulate command.
pub fn run(options: &SimulateOptions, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let report = simulate(options)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            print_text_output(&report);
        }
    }

    if report.consistent {
        Ok(())
    } else {
        Err("counter version does not match the number of successful rounds".into())
    }
}

/// Builds the coordinator configuration from the environment and overrides.
fn build_config(options: &SimulateOptions) -> Result<LockConfig, SimulateError> {
    let mut config = LockConfig::from_env();
    if let Some(name) = &options.isolation {
        let isolation = IsolationLevel::parse(name)
            .ok_or_else(|| SimulateError::InvalidArgument(format!("unknown isolation {name:?}")))?;
        config = config.isolation(isolation);
    }
    match options.timeout_ms {
        Some(0) => config = config.without_timeout(),
        Some(ms) => config = config.lock_timeout(Duration::from_millis(ms)),
        None => {}
    }
    Ok(config)
}

/// Runs the simulation and returns its report.
pub fn simulate(options: &SimulateOptions) -> Result<SimulationReport, SimulateError> {
    if options.workers == 0 {
        return Err(SimulateError::InvalidArgument("--workers must be at least 1".into()));
    }
    let config = build_config(options)?;

    let gateway = Arc::new(InMemoryGateway::new());
    gateway.create_table(TABLE);
    gateway.insert(TABLE, KEY, INITIAL_VERSION)?;
    let coordinator = Arc::new(LockCoordinator::new(Arc::clone(&gateway), config.clone()));

    tracing::info!(
        workers = options.workers,
        rounds = options.rounds,
        isolation = %config.isolation,
        "starting simulation"
    );

    let start = Instant::now();
    let handles: Vec<_> = (0..options.workers)
        .map(|worker| {
            let coordinator = Arc::clone(&coordinator);
            let gateway = Arc::clone(&gateway);
            let rounds = options.rounds;
            let hold = options.hold;

            thread::spawn(move || {
                let mut tally = WorkerTally::default();
                for round in 0..rounds {
                    let result = increment(&coordinator, &gateway, hold);
                    tracing::debug!(worker, round, ok = result.is_ok(), "round finished");
                    tally.record(&result);
                }
                tally
            })
        })
        .collect();

    let mut total = WorkerTally::default();
    for (worker, handle) in handles.into_iter().enumerate() {
        let tally = handle
            .join()
            .map_err(|_| SimulateError::WorkerPanicked(worker))?;
        total.merge(tally);
    }
    let elapsed = start.elapsed();

    let final_version = gateway
        .version_of(TABLE, KEY)
        .and_then(|v| v.as_counter())
        .unwrap_or_default();
    let consistent = final_version == INITIAL_VERSION + total.successes as u64;
    if !consistent {
        tracing::error!(final_version, successes = total.successes, "lost update detected");
    }

    Ok(SimulationReport {
        workers: options.workers,
        rounds: options.rounds,
        hold_ms: u64::try_from(options.hold.as_millis()).unwrap_or(u64::MAX),
        timeout_ms: config
            .lock_timeout
            .map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX)),
        isolation: config.isolation.to_string(),
        attempts: options.workers * options.rounds,
        successes: total.successes,
        conflicts: total.conflicts,
        timeouts: total.timeouts,
        failures: total.failures,
        initial_version: INITIAL_VERSION,
        final_version,
        consistent,
        elapsed_ms: elapsed.as_millis(),
    })
}

/// One round: read, lock, hold, write the next version, release.
fn increment(
    coordinator: &LockCoordinator<InMemoryGateway>,
    gateway: &InMemoryGateway,
    hold: Duration,
) -> LockResult<()> {
    let current = gateway
        .version_of(TABLE, KEY)
        .ok_or_else(|| LockError::invalid_record("counter row is missing"))?;
    let mut record = LockRecord::new(TABLE, KEY, current);
    let next = record
        .version()
        .next()
        .ok_or_else(|| LockError::invalid_record("counter version is not numeric"))?;

    coordinator.with_lock(&mut record, |record| {
        if !hold.is_zero() {
            thread::sleep(hold);
        }
        let token = record
            .lock_token()
            .ok_or(LockError::LockNotFound { token: None })?;
        coordinator
            .with_transaction(&token, |txn| gateway.stage_version(txn, TABLE, KEY, next))?
            .map_err(LockError::from)
    })
}

fn print_text_output(report: &SimulationReport) {
    println!("Simulation");
    println!("==========");
    println!();
    println!("Workers:        {}", report.workers);
    println!("Rounds:         {}", report.rounds);
    println!("Hold:           {} ms", report.hold_ms);
    match report.timeout_ms {
        Some(ms) => println!("Lock timeout:   {} ms", ms),
        None => println!("Lock timeout:   none"),
    }
    println!("Isolation:      {}", report.isolation);
    println!();
    println!("Attempts:       {}", report.attempts);
    println!("Successes:      {}", report.successes);
    println!("Conflicts:      {}", report.conflicts);
    println!("Timeouts:       {}", report.timeouts);
    println!("Failures:       {}", report.failures);
    println!();
    println!(
        "Version:        {} -> {} ({})",
        report.initial_version,
        report.final_version,
        if report.consistent {
            "consistent"
        } else {
            "LOST UPDATES"
        }
    );
    println!("Elapsed:        {} ms", report.elapsed_ms);
}
