//! Aggregate call statistics.
//!
//! [`StatsCollector`] is shared by every call of a pipeline. Totals sit
//! behind a short mutex; per-operation counters live in a `DashMap` so
//! calls for different operations do not contend.
//!
//! ```
//! use std::time::Duration;
//! use script_relay::stats::{CallSample, StatsCollector};
//! use script_relay::ErrorKind;
//!
//! let stats = StatsCollector::new();
//! stats.record(&CallSample::success("list_todos", Duration::from_millis(40), 1));
//! stats.record(&CallSample::failure(
//!     "list_todos",
//!     Duration::from_millis(60),
//!     2,
//!     ErrorKind::RuntimeTimeout,
//! ));
//!
//! let snapshot = stats.snapshot();
//! assert_eq!(snapshot.calls, 2);
//! assert_eq!(snapshot.retries, 1);
//! assert_eq!(snapshot.timeouts, 1);
//! assert_eq!(snapshot.operations[0].avg_duration_ms, 50.0);
//! ```

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::ErrorKind;

/// Outcome of one call, retries included.
#[derive(Debug, Clone)]
pub struct CallSample<'a> {
    /// Operation name.
    pub operation: &'a str,
    /// Total duration across attempts.
    pub duration: Duration,
    /// Attempts made (at least 1).
    pub attempts: u32,
    /// `None` on success.
    pub error: Option<ErrorKind>,
}

impl<'a> CallSample<'a> {
    /// A successful call.
    pub fn success(operation: &'a str, duration: Duration, attempts: u32) -> Self {
        Self {
            operation,
            duration,
            attempts,
            error: None,
        }
    }

    /// A failed call.
    pub fn failure(operation: &'a str, duration: Duration, attempts: u32, error: ErrorKind) -> Self {
        Self {
            operation,
            duration,
            attempts,
            error: Some(error),
        }
    }
}

#[derive(Debug, Default)]
struct Totals {
    calls: u64,
    successes: u64,
    failures: u64,
    retries: u64,
    timeouts: u64,
    errors_by_kind: HashMap<ErrorKind, u64>,
    total_duration: Duration,
    max_duration: Duration,
}

#[derive(Debug, Default, Clone, Copy)]
struct OperationTotals {
    calls: u64,
    failures: u64,
    retries: u64,
    total_duration: Duration,
}

/// Per-operation figures.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationSnapshot {
    /// Operation name.
    pub name: String,
    /// Calls made.
    pub calls: u64,
    /// Calls that failed.
    pub failures: u64,
    /// Retries performed.
    pub retries: u64,
    /// Mean call duration in milliseconds.
    pub avg_duration_ms: f64,
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    /// Calls made.
    pub calls: u64,
    /// Calls that succeeded.
    pub successes: u64,
    /// Calls that failed.
    pub failures: u64,
    /// Retries performed across all calls.
    pub retries: u64,
    /// Calls that ended in a timeout.
    pub timeouts: u64,
    /// Failed calls by error kind.
    pub errors_by_kind: BTreeMap<String, u64>,
    /// Sum of call durations in milliseconds.
    pub total_duration_ms: u64,
    /// Longest call in milliseconds.
    pub max_duration_ms: u64,
    /// Mean call duration in milliseconds.
    pub avg_duration_ms: f64,
    /// Per-operation figures, sorted by name.
    pub operations: Vec<OperationSnapshot>,
}

/// Thread-safe call statistics.
#[derive(Debug, Default)]
pub struct StatsCollector {
    totals: Mutex<Totals>,
    per_operation: DashMap<String, OperationTotals>,
}

impl StatsCollector {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one finished call.
    pub fn record(&self, sample: &CallSample<'_>) {
        let retries = u64::from(sample.attempts.saturating_sub(1));
        {
            let mut totals = self.totals.lock();
            totals.calls += 1;
            totals.retries += retries;
            totals.total_duration += sample.duration;
            totals.max_duration = totals.max_duration.max(sample.duration);
            match sample.error {
                None => totals.successes += 1,
                Some(kind) => {
                    totals.failures += 1;
                    if matches!(kind, ErrorKind::RuntimeTimeout | ErrorKind::ControllerTimeout) {
                        totals.timeouts += 1;
                    }
                    *totals.errors_by_kind.entry(kind).or_insert(0) += 1;
                },
            }
        }

        let mut op = self
            .per_operation
            .entry(sample.operation.to_string())
            .or_default();
        op.calls += 1;
        op.retries += retries;
        op.total_duration += sample.duration;
        if sample.error.is_some() {
            op.failures += 1;
        }
    }

    /// Copy of every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        let mut operations: Vec<OperationSnapshot> = self
            .per_operation
            .iter()
            .map(|entry| OperationSnapshot {
                name: entry.key().clone(),
                calls: entry.calls,
                failures: entry.failures,
                retries: entry.retries,
                avg_duration_ms: average_ms(entry.total_duration, entry.calls),
            })
            .collect();
        operations.sort_by(|a, b| a.name.cmp(&b.name));

        let totals = self.totals.lock();
        StatsSnapshot {
            calls: totals.calls,
            successes: totals.successes,
            failures: totals.failures,
            retries: totals.retries,
            timeouts: totals.timeouts,
            errors_by_kind: totals
                .errors_by_kind
                .iter()
                .map(|(kind, count)| (kind.to_string(), *count))
                .collect(),
            total_duration_ms: totals.total_duration.as_millis() as u64,
            max_duration_ms: totals.max_duration.as_millis() as u64,
            avg_duration_ms: average_ms(totals.total_duration, totals.calls),
            operations,
        }
    }

    /// Zero every counter.
    pub fn reset(&self) {
        *self.totals.lock() = Totals::default();
        self.per_operation.clear();
    }
}

fn average_ms(total: Duration, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        total.as_micros() as f64 / 1000.0 / count as f64
    }
}
