//! In-process settlement run statistics.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::ports::MetricsSink;

#[derive(Debug, Default, Clone)]
struct LastEvents {
    run_at: Option<DateTime<Utc>>,
    run_source: Option<String>,
    run_processed_count: u64,
    run_duration_ms: u64,
    run_error: Option<String>,
    lock_acquired_at: Option<DateTime<Utc>>,
    lock_acquired_source: Option<String>,
    lock_holder: Option<String>,
    lock_released_at: Option<DateTime<Utc>>,
    lock_released_source: Option<String>,
    lock_skipped_at: Option<DateTime<Utc>>,
    lock_skipped_source: Option<String>,
}

/// Counters plus the most recent run and lock events for one process.
#[derive(Default)]
pub struct SettlementMetrics {
    runs_total: AtomicU64,
    runs_succeeded: AtomicU64,
    runs_failed: AtomicU64,
    lock_skipped_total: AtomicU64,
    processed_total: AtomicU64,
    settled_total: AtomicU64,
    retried_total: AtomicU64,
    terminal_failed_total: AtomicU64,
    run_duration_total_ms: AtomicU64,
    last: Mutex<LastEvents>,
}

impl SettlementMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let last = self
            .last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let runs_total = self.runs_total.load(Ordering::Relaxed);
        let duration_total = self.run_duration_total_ms.load(Ordering::Relaxed);

        MetricsSnapshot {
            runs_total,
            runs_succeeded: self.runs_succeeded.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
            lock_skipped_total: self.lock_skipped_total.load(Ordering::Relaxed),
            processed_total: self.processed_total.load(Ordering::Relaxed),
            settled_total: self.settled_total.load(Ordering::Relaxed),
            retried_total: self.retried_total.load(Ordering::Relaxed),
            terminal_failed_total: self.terminal_failed_total.load(Ordering::Relaxed),
            average_run_duration_ms: if runs_total == 0 {
                0.0
            } else {
                duration_total as f64 / runs_total as f64
            },
            last_run_at: last.run_at,
            last_run_source: last.run_source,
            last_run_processed_count: last.run_processed_count,
            last_run_duration_ms: last.run_duration_ms,
            last_run_error: last.run_error,
            last_lock_acquired_at: last.lock_acquired_at,
            last_lock_acquired_source: last.lock_acquired_source,
            last_lock_holder: last.lock_holder,
            last_lock_released_at: last.lock_released_at,
            last_lock_released_source: last.lock_released_source,
            last_lock_skipped_at: last.lock_skipped_at,
            last_lock_skipped_source: last.lock_skipped_source,
        }
    }

    fn update_last(&self, f: impl FnOnce(&mut LastEvents)) {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut last);
    }

    fn record_run(&self, duration: Duration) {
        self.runs_total.fetch_add(1, Ordering::Relaxed);
        self.run_duration_total_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }
}

impl MetricsSink for SettlementMetrics {
    fn record_lock_acquired(&self, holder: &str, source: &str) {
        self.update_last(|last| {
            last.lock_acquired_at = Some(Utc::now());
            last.lock_acquired_source = Some(source.to_string());
            last.lock_holder = Some(holder.to_string());
        });
    }

    fn record_lock_released(&self, _holder: &str, source: &str) {
        self.update_last(|last| {
            last.lock_released_at = Some(Utc::now());
            last.lock_released_source = Some(source.to_string());
        });
    }

    fn record_lock_skipped(&self, source: &str) {
        self.lock_skipped_total.fetch_add(1, Ordering::Relaxed);
        self.update_last(|last| {
            last.lock_skipped_at = Some(Utc::now());
            last.lock_skipped_source = Some(source.to_string());
        });
    }

    fn record_run_completed(&self, source: &str, processed_count: u64, duration: Duration) {
        self.record_run(duration);
        self.runs_succeeded.fetch_add(1, Ordering::Relaxed);
        self.processed_total
            .fetch_add(processed_count, Ordering::Relaxed);
        self.update_last(|last| {
            last.run_at = Some(Utc::now());
            last.run_source = Some(source.to_string());
            last.run_processed_count = processed_count;
            last.run_duration_ms = duration.as_millis() as u64;
            last.run_error = None;
        });
    }

    fn record_run_failed(&self, source: &str, duration: Duration, error_category: &str) {
        self.record_run(duration);
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
        self.update_last(|last| {
            last.run_at = Some(Utc::now());
            last.run_source = Some(source.to_string());
            last.run_processed_count = 0;
            last.run_duration_ms = duration.as_millis() as u64;
            last.run_error = Some(error_category.to_string());
        });
    }

    fn record_transaction_settled(&self) {
        self.settled_total.fetch_add(1, Ordering::Relaxed);
    }

    fn record_transaction_retried(&self) {
        self.retried_total.fetch_add(1, Ordering::Relaxed);
    }

    fn record_transaction_terminal_failure(&self) {
        self.terminal_failed_total.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub runs_total: u64,
    pub runs_succeeded: u64,
    pub runs_failed: u64,
    pub lock_skipped_total: u64,
    pub processed_total: u64,
    pub settled_total: u64,
    pub retried_total: u64,
    pub terminal_failed_total: u64,
    pub average_run_duration_ms: f64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_run_source: Option<String>,
    pub last_run_processed_count: u64,
    pub last_run_duration_ms: u64,
    pub last_run_error: Option<String>,
    pub last_lock_acquired_at: Option<DateTime<Utc>>,
    pub last_lock_acquired_source: Option<String>,
    pub last_lock_holder: Option<String>,
    pub last_lock_released_at: Option<DateTime<Utc>>,
    pub last_lock_released_source: Option<String>,
    pub last_lock_skipped_at: Option<DateTime<Utc>>,
    pub last_lock_skipped_source: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_starts_empty() {
        let snapshot = SettlementMetrics::new().snapshot();
        assert_eq!(snapshot.runs_total, 0);
        assert_eq!(snapshot.average_run_duration_ms, 0.0);
        assert!(snapshot.last_run_at.is_none());
    }

    #[test]
    fn test_run_totals_and_average_duration() {
        let metrics = SettlementMetrics::new();
        metrics.record_run_completed("SCHEDULED", 3, Duration::from_millis(100));
        metrics.record_run_failed("MANUAL_TRIGGER", Duration::from_millis(300), "store_unavailable");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.runs_total, 2);
        assert_eq!(snapshot.runs_succeeded, 1);
        assert_eq!(snapshot.runs_failed, 1);
        assert_eq!(snapshot.processed_total, 3);
        assert_eq!(snapshot.average_run_duration_ms, 200.0);
        assert_eq!(snapshot.last_run_source.as_deref(), Some("MANUAL_TRIGGER"));
        assert_eq!(snapshot.last_run_error.as_deref(), Some("store_unavailable"));
    }

    #[test]
    fn test_lock_events() {
        let metrics = SettlementMetrics::new();
        metrics.record_lock_acquired("token", "SCHEDULED");
        metrics.record_lock_skipped("MANUAL_TRIGGER");
        metrics.record_lock_released("token", "SCHEDULED");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.lock_skipped_total, 1);
        assert_eq!(snapshot.last_lock_skipped_source.as_deref(), Some("MANUAL_TRIGGER"));
        assert!(snapshot.last_lock_acquired_at.is_some());
        assert_eq!(snapshot.last_lock_holder.as_deref(), Some("token"));
        assert!(snapshot.last_lock_released_at.is_some());
    }
}
