//! Contracts for the collaborators the settlement core consumes.
//!
//! The core only ever talks to storage, the lock store and the metrics sink
//! through these traits, so the same services run against Postgres/Redis in
//! production and against the in-memory adapters in tests.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{ReconciliationStatus, SettlementLog, Transaction, TransactionStatus};

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Transaction not found: {0}")]
    NotFound(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Transactional repository for transactions and their settlement logs.
#[async_trait]
pub trait TransactionRepository: Send + Sync {
    async fn insert(&self, tx: &Transaction) -> RepositoryResult<Transaction>;

    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<Transaction>>;

    async fn find_by_id_and_status(
        &self,
        id: Uuid,
        status: TransactionStatus,
    ) -> RepositoryResult<Option<Transaction>>;

    async fn find_by_status(&self, status: TransactionStatus) -> RepositoryResult<Vec<Transaction>>;

    /// Ids only, ordered by creation time. Used to snapshot the backlog.
    async fn find_ids_by_status(&self, status: TransactionStatus) -> RepositoryResult<Vec<Uuid>>;

    /// Conditional CAPTURED -> PROCESSING update scoped to one row.
    ///
    /// Returns the number of rows affected: `1` when this caller won the
    /// claim, `0` when the row was no longer CAPTURED.
    async fn claim(&self, id: Uuid) -> RepositoryResult<u64>;

    /// Persists every mutable field of an existing transaction.
    async fn save(&self, tx: &Transaction) -> RepositoryResult<Transaction>;

    /// Saves the transaction and appends the log row as one atomic unit.
    async fn record_attempt(&self, tx: &Transaction, log: &SettlementLog) -> RepositoryResult<()>;

    async fn find_by_reconciliation_status(
        &self,
        status: ReconciliationStatus,
    ) -> RepositoryResult<Vec<Transaction>>;

    /// EXCEPTION_QUEUED transactions, oldest first.
    async fn find_exception_queue(&self) -> RepositoryResult<Vec<Transaction>>;

    async fn find_missing_reconciliation_status(&self) -> RepositoryResult<Vec<Transaction>>;

    async fn count_all(&self) -> RepositoryResult<i64>;

    async fn count_by_status(&self, status: TransactionStatus) -> RepositoryResult<i64>;

    async fn count_by_reconciliation_status(
        &self,
        status: ReconciliationStatus,
    ) -> RepositoryResult<i64>;

    /// Average `retry_count` across all transactions, `0.0` when empty.
    async fn average_retry_count(&self) -> RepositoryResult<f64>;

    async fn list_logs(&self, transaction_id: Uuid) -> RepositoryResult<Vec<SettlementLog>>;
}

#[derive(Error, Debug)]
pub enum LockStoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Lock store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Lock store unavailable: {0}")]
    Unavailable(String),
}

pub type LockStoreResult<T> = Result<T, LockStoreError>;

/// Shared key-value store backing the distributed lock.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Atomically sets `key` to `value` with a TTL only if `key` is absent.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> LockStoreResult<bool>;

    async fn get(&self, key: &str) -> LockStoreResult<Option<String>>;

    /// Atomically deletes `key` only if its current value equals `expected`.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> LockStoreResult<bool>;

    async fn exists(&self, key: &str) -> LockStoreResult<bool>;
}

/// Fire-and-forget sink for settlement events. Never read back for decisions.
pub trait MetricsSink: Send + Sync {
    fn record_lock_acquired(&self, holder: &str, source: &str);
    fn record_lock_released(&self, holder: &str, source: &str);
    fn record_lock_skipped(&self, source: &str);
    fn record_run_completed(&self, source: &str, processed_count: u64, duration: Duration);
    fn record_run_failed(&self, source: &str, duration: Duration, error_category: &str);
    fn record_transaction_settled(&self);
    fn record_transaction_retried(&self);
    fn record_transaction_terminal_failure(&self);
}
