//! Stress tests for recordlock.
//!
//! These runners drive a [`TestBed`] under sequential, parallel and
//! contended locking and tally how each attempt ended.

use crate::fixtures::{TestBed, TEST_TABLE};
use recordlock_core::{LockError, LockResult, Lockable};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// How a single lock attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Lock granted, work committed.
    Success,
    /// Version mismatch or missing record.
    Conflict,
    /// Deadline elapsed while waiting.
    Timeout,
    /// Any other error.
    Failure,
}

impl Outcome {
    /// Classifies the result of a lock attempt.
    pub fn of<T>(result: &LockResult<T>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(err) if err.is_conflict() => Self::Conflict,
            Err(err) if err.is_timeout() => Self::Timeout,
            Err(_) => Self::Failure,
        }
    }
}

/// Thread-safe outcome counters.
#[derive(Debug, Default)]
pub struct Tally {
    success: AtomicUsize,
    conflict: AtomicUsize,
    timeout: AtomicUsize,
    failure: AtomicUsize,
}

impl Tally {
    /// Records one outcome.
    pub fn record(&self, outcome: Outcome) {
        let counter = match outcome {
            Outcome::Success => &self.success,
            Outcome::Conflict => &self.conflict,
            Outcome::Timeout => &self.timeout,
            Outcome::Failure => &self.failure,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Builds a result from the current counts.
    pub fn finish(&self, duration: Duration) -> StressTestResult {
        StressTestResult::new(
            self.success.load(Ordering::Relaxed),
            self.conflict.load(Ordering::Relaxed),
            self.timeout.load(Ordering::Relaxed),
            self.failure.load(Ordering::Relaxed),
            duration,
        )
    }
}

/// Result of a stress test run.
#[derive(Debug, Clone, Serialize)]
pub struct StressTestResult {
    /// Total lock attempts.
    pub total_ops: usize,
    /// Attempts that were granted and committed.
    pub successful_ops: usize,
    /// Attempts refused for a version or existence conflict.
    pub conflicts: usize,
    /// Attempts that ran out of time.
    pub timeouts: usize,
    /// Attempts that failed otherwise.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Attempts per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(
        successful: usize,
        conflicts: usize,
        timeouts: usize,
        failed: usize,
        duration: Duration,
    ) -> Self {
        let total = successful + conflicts + timeouts + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            conflicts,
            timeouts,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Serializes the result as pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total attempts: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Conflicts: {}", self.conflicts);
        println!("Timeouts: {}", self.timeouts);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of lock attempts to perform (split across threads).
    pub operations: usize,
    /// Number of concurrent threads.
    pub threads: usize,
    /// Number of distinct keys.
    pub key_count: usize,
    /// Time spent inside each granted lock.
    pub hold: Duration,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 1_000,
            threads: 4,
            key_count: 100,
            hold: Duration::ZERO,
        }
    }
}

/// Reads the current version of `key`, locks it, bumps the version and
/// releases.
///
/// # Errors
///
/// Returns the acquisition error, or the commit failure.
pub fn increment(bed: &TestBed, key: &str, hold: Duration) -> LockResult<()> {
    let mut record = bed.fresh_record(key);
    let next = record
        .version()
        .next()
        .ok_or_else(|| LockError::invalid_record("version is not a counter"))?;

    let guard = bed.lock(&mut record)?;
    if !hold.is_zero() {
        thread::sleep(hold);
    }
    let staged = guard
        .with_transaction(|txn| bed.gateway.stage_version(txn, TEST_TABLE, key, next))
        .and_then(|staged| staged.map_err(LockError::from));
    guard.finish(staged)
}

/// Run a sequential increment stress test over all keys.
pub fn stress_sequential_locks(bed: &TestBed, config: &StressConfig) -> StressTestResult {
    let tally = Tally::default();
    let start = Instant::now();

    for i in 0..config.operations {
        let key = (i % config.key_count).to_string();
        tally.record(Outcome::of(&increment(bed, &key, config.hold)));
    }

    tally.finish(start.elapsed())
}

/// Run a concurrent stress test where each thread owns its keys.
///
/// No two threads ever touch the same key, so every attempt should succeed.
pub fn stress_disjoint_keys(bed: Arc<TestBed>, config: &StressConfig) -> StressTestResult {
    let tally = Arc::new(Tally::default());
    let ops_per_thread = config.operations / config.threads;
    let keys_per_thread = (config.key_count / config.threads).max(1);

    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let bed = Arc::clone(&bed);
            let tally = Arc::clone(&tally);
            let hold = config.hold;

            thread::spawn(move || {
                for i in 0..ops_per_thread {
                    let key = (t * keys_per_thread + i % keys_per_thread).to_string();
                    tally.record(Outcome::of(&increment(&bed, &key, hold)));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    tally.finish(start.elapsed())
}

/// Run a concurrent stress test where every thread increments key `"0"`.
///
/// Attempts that read a version another thread has already replaced end in
/// a conflict; the committed version grows by exactly the number of
/// successes.
pub fn stress_contended_key(bed: Arc<TestBed>, config: &StressConfig) -> StressTestResult {
    let tally = Arc::new(Tally::default());
    let ops_per_thread = config.operations / config.threads;

    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|_| {
            let bed = Arc::clone(&bed);
            let tally = Arc::clone(&tally);
            let hold = config.hold;

            thread::spawn(move || {
                for _ in 0..ops_per_thread {
                    tally.record(Outcome::of(&increment(&bed, "0", hold)));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    tally.finish(start.elapsed())
}
