use serde::Serialize;
use std::sync::Arc;

use crate::domain::{ReconciliationStatus, TransactionStatus};
use crate::error::AppError;
use crate::metrics::{MetricsSnapshot, SettlementMetrics};
use crate::ports::TransactionRepository;
use crate::services::lock::{LockManager, SETTLEMENT_LOCK_KEY};

#[derive(Debug, Clone, Serialize)]
pub struct SettlementStats {
    pub total_transactions: i64,
    pub captured: i64,
    pub processing: i64,
    pub settled: i64,
    pub failed: i64,
    pub exception_queued: i64,
    pub average_retry_count: f64,
    pub lock_held: bool,
    pub lock_holder: Option<String>,
    #[serde(flatten)]
    pub runs: MetricsSnapshot,
}

/// Aggregates store counts, lock state and run metrics.
#[derive(Clone)]
pub struct MonitoringService {
    repository: Arc<dyn TransactionRepository>,
    locks: LockManager,
    metrics: Arc<SettlementMetrics>,
}

impl MonitoringService {
    pub fn new(
        repository: Arc<dyn TransactionRepository>,
        locks: LockManager,
        metrics: Arc<SettlementMetrics>,
    ) -> Self {
        Self {
            repository,
            locks,
            metrics,
        }
    }

    pub async fn stats(&self) -> Result<SettlementStats, AppError> {
        let repo = &self.repository;

        Ok(SettlementStats {
            total_transactions: repo.count_all().await?,
            captured: repo.count_by_status(TransactionStatus::Captured).await?,
            processing: repo.count_by_status(TransactionStatus::Processing).await?,
            settled: repo.count_by_status(TransactionStatus::Settled).await?,
            failed: repo.count_by_status(TransactionStatus::Failed).await?,
            exception_queued: repo
                .count_by_reconciliation_status(ReconciliationStatus::ExceptionQueued)
                .await?,
            average_retry_count: repo.average_retry_count().await?,
            lock_held: self.locks.is_held(SETTLEMENT_LOCK_KEY).await?,
            lock_holder: self.locks.current_holder(SETTLEMENT_LOCK_KEY).await?,
            runs: self.metrics.snapshot(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{InMemoryLockStore, InMemoryTransactionRepository};
    use crate::domain::Transaction;
    use crate::ports::MetricsSink;
    use bigdecimal::BigDecimal;
    use std::time::Duration;

    #[tokio::test]
    async fn test_stats_combine_store_lock_and_runs() {
        let repo = Arc::new(InMemoryTransactionRepository::new());
        let mut failed = Transaction::new(BigDecimal::from(1), None, None, None);
        failed.status = TransactionStatus::Failed;
        failed.retry_count = 3;
        repo.insert(&failed).await.unwrap();
        repo.insert(&Transaction::new(BigDecimal::from(2), None, None, None))
            .await
            .unwrap();

        let locks = LockManager::new(Arc::new(InMemoryLockStore::new()), Duration::from_secs(1));
        let token = locks
            .acquire_lock(SETTLEMENT_LOCK_KEY, Duration::from_secs(30))
            .await
            .unwrap();
        let metrics = Arc::new(SettlementMetrics::new());
        metrics.record_run_completed("SCHEDULED", 2, Duration::from_millis(10));

        let stats = MonitoringService::new(repo, locks, metrics)
            .stats()
            .await
            .unwrap();
        assert_eq!(stats.total_transactions, 2);
        assert_eq!(stats.captured, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.average_retry_count, 1.5);
        assert!(stats.lock_held);
        assert_eq!(stats.lock_holder, token);
        assert_eq!(stats.runs.runs_succeeded, 1);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["runs_total"], 1);
    }
}
