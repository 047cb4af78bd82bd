use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::error::AppError;
use crate::ports::MetricsSink;
use crate::services::delay::Delay;
use crate::services::lock::{LockManager, SETTLEMENT_LOCK_KEY};
use crate::services::transaction_processor::{TransactionProcessor, TriggerSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunOutcome {
    pub lock_acquired: bool,
    pub processed_count: u64,
}

/// Runs settlement passes under the cluster-wide settlement lock.
#[derive(Clone)]
pub struct RunCoordinator {
    processor: TransactionProcessor,
    locks: LockManager,
    metrics: Arc<dyn MetricsSink>,
    delay: Arc<dyn Delay>,
    lock_ttl: Duration,
}

impl RunCoordinator {
    pub fn new(
        processor: TransactionProcessor,
        locks: LockManager,
        metrics: Arc<dyn MetricsSink>,
        delay: Arc<dyn Delay>,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            processor,
            locks,
            metrics,
            delay,
            lock_ttl,
        }
    }

    /// Runs one pass if the lock is free. The locked section runs on its own
    /// task, so dropping the returned future does not leave the lock held.
    pub async fn run(
        &self,
        source: TriggerSource,
        min_lock_hold: Duration,
    ) -> Result<RunOutcome, AppError> {
        let coordinator = self.clone();
        tokio::spawn(async move { coordinator.run_locked(source, min_lock_hold).await })
            .await
            .map_err(|e| AppError::Internal(format!("settlement run task failed: {}", e)))?
    }

    async fn run_locked(
        &self,
        source: TriggerSource,
        min_lock_hold: Duration,
    ) -> Result<RunOutcome, AppError> {
        let attempted_at = Instant::now();
        let token = match self.locks.acquire_lock(SETTLEMENT_LOCK_KEY, self.lock_ttl).await {
            Ok(Some(token)) => token,
            Ok(None) => {
                self.metrics.record_lock_skipped(source.as_str());
                info!(event = "lock_skipped", trigger_source = %source, reason = "already_held");
                return Ok(RunOutcome {
                    lock_acquired: false,
                    processed_count: 0,
                });
            }
            Err(e) => {
                let err = AppError::from(e);
                self.metrics
                    .record_run_failed(source.as_str(), attempted_at.elapsed(), err.category());
                error!(
                    event = "settlement_run_failed",
                    trigger_source = %source,
                    error_type = err.category(),
                    message = %err
                );
                return Err(err);
            }
        };

        let acquired_at = Instant::now();
        self.metrics.record_lock_acquired(&token, source.as_str());

        let result = AssertUnwindSafe(self.processor.run_pass(source))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(AppError::Internal(panic_message(payload))));
        let duration = acquired_at.elapsed();

        match &result {
            Ok(processed_count) => {
                self.metrics
                    .record_run_completed(source.as_str(), *processed_count, duration);
                info!(
                    event = "settlement_run_completed",
                    trigger_source = %source,
                    processed_count,
                    duration_ms = duration.as_millis() as u64
                );
            }
            Err(err) => {
                self.metrics
                    .record_run_failed(source.as_str(), duration, err.category());
                error!(
                    event = "settlement_run_failed",
                    trigger_source = %source,
                    duration_ms = duration.as_millis() as u64,
                    error_type = err.category(),
                    message = %err
                );
            }
        }

        let remaining = min_lock_hold.saturating_sub(acquired_at.elapsed());
        if !remaining.is_zero() {
            self.delay.sleep(remaining).await;
        }

        match self.locks.release_lock(SETTLEMENT_LOCK_KEY, &token).await {
            Ok(true) => self.metrics.record_lock_released(&token, source.as_str()),
            Ok(false) => {}
            Err(e) => {
                // The TTL reclaims the key.
                warn!(event = "lock_release_failed", holder = %token, error = %e);
            }
        }

        result.map(|processed_count| RunOutcome {
            lock_acquired: true,
            processed_count,
        })
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("settlement pass panicked: {}", detail)
}
