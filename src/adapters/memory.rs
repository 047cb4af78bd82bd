//! In-memory adapters for the storage and lock ports.
//!
//! Used by the test suites and by single-process local runs. They honour the
//! same atomicity contracts as the Postgres and Redis adapters: `claim` is a
//! compare-and-swap under one mutex, and lock entries expire on read.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::domain::{ReconciliationStatus, SettlementLog, Transaction, TransactionStatus};
use crate::ports::{
    LockStore, LockStoreError, LockStoreResult, RepositoryError, RepositoryResult,
    TransactionRepository,
};

#[derive(Default)]
struct Rows {
    next_seq: u64,
    transactions: HashMap<Uuid, (u64, Transaction)>,
    logs: Vec<SettlementLog>,
}

impl Rows {
    /// Transactions matching `filter`, oldest first.
    fn select(&self, filter: impl Fn(&Transaction) -> bool) -> Vec<Transaction> {
        let mut matched: Vec<&(u64, Transaction)> = self
            .transactions
            .values()
            .filter(|(_, tx)| filter(tx))
            .collect();
        matched.sort_by_key(|(seq, tx)| (tx.created_at, *seq));
        matched.into_iter().map(|(_, tx)| tx.clone()).collect()
    }
}

/// Mutex-guarded transaction table plus append-only log.
#[derive(Default)]
pub struct InMemoryTransactionRepository {
    rows: Mutex<Rows>,
    unavailable: AtomicBool,
    claim_attempts: AtomicU64,
}

impl InMemoryTransactionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail as if the database were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Total number of `claim` calls, won or lost.
    pub fn claim_attempts(&self) -> u64 {
        self.claim_attempts.load(Ordering::SeqCst)
    }

    fn rows(&self) -> RepositoryResult<MutexGuard<'_, Rows>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        Ok(self.rows.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

#[async_trait]
impl TransactionRepository for InMemoryTransactionRepository {
    async fn insert(&self, tx: &Transaction) -> RepositoryResult<Transaction> {
        let mut rows = self.rows()?;
        let seq = rows.next_seq;
        rows.next_seq += 1;
        rows.transactions.insert(tx.id, (seq, tx.clone()));
        Ok(tx.clone())
    }

    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<Transaction>> {
        Ok(self.rows()?.transactions.get(&id).map(|(_, tx)| tx.clone()))
    }

    async fn find_by_id_and_status(
        &self,
        id: Uuid,
        status: TransactionStatus,
    ) -> RepositoryResult<Option<Transaction>> {
        Ok(self
            .rows()?
            .transactions
            .get(&id)
            .filter(|(_, tx)| tx.status == status)
            .map(|(_, tx)| tx.clone()))
    }

    async fn find_by_status(&self, status: TransactionStatus) -> RepositoryResult<Vec<Transaction>> {
        Ok(self.rows()?.select(|tx| tx.status == status))
    }

    async fn find_ids_by_status(&self, status: TransactionStatus) -> RepositoryResult<Vec<Uuid>> {
        Ok(self
            .rows()?
            .select(|tx| tx.status == status)
            .into_iter()
            .map(|tx| tx.id)
            .collect())
    }

    async fn claim(&self, id: Uuid) -> RepositoryResult<u64> {
        self.claim_attempts.fetch_add(1, Ordering::SeqCst);
        let mut rows = self.rows()?;
        match rows.transactions.get_mut(&id) {
            Some((_, tx)) if tx.status == TransactionStatus::Captured => {
                tx.status = TransactionStatus::Processing;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn save(&self, tx: &Transaction) -> RepositoryResult<Transaction> {
        let mut rows = self.rows()?;
        match rows.transactions.get_mut(&tx.id) {
            Some((_, stored)) => {
                *stored = tx.clone();
                Ok(tx.clone())
            }
            None => Err(RepositoryError::NotFound(tx.id.to_string())),
        }
    }

    async fn record_attempt(&self, tx: &Transaction, log: &SettlementLog) -> RepositoryResult<()> {
        let mut rows = self.rows()?;
        match rows.transactions.get_mut(&tx.id) {
            Some((_, stored)) => *stored = tx.clone(),
            None => return Err(RepositoryError::NotFound(tx.id.to_string())),
        }
        rows.logs.push(log.clone());
        Ok(())
    }

    async fn find_by_reconciliation_status(
        &self,
        status: ReconciliationStatus,
    ) -> RepositoryResult<Vec<Transaction>> {
        Ok(self
            .rows()?
            .select(|tx| tx.reconciliation_status == Some(status)))
    }

    async fn find_exception_queue(&self) -> RepositoryResult<Vec<Transaction>> {
        self.find_by_reconciliation_status(ReconciliationStatus::ExceptionQueued)
            .await
    }

    async fn find_missing_reconciliation_status(&self) -> RepositoryResult<Vec<Transaction>> {
        Ok(self.rows()?.select(|tx| tx.reconciliation_status.is_none()))
    }

    async fn count_all(&self) -> RepositoryResult<i64> {
        Ok(self.rows()?.transactions.len() as i64)
    }

    async fn count_by_status(&self, status: TransactionStatus) -> RepositoryResult<i64> {
        Ok(self.rows()?.select(|tx| tx.status == status).len() as i64)
    }

    async fn count_by_reconciliation_status(
        &self,
        status: ReconciliationStatus,
    ) -> RepositoryResult<i64> {
        Ok(self
            .rows()?
            .select(|tx| tx.reconciliation_status == Some(status))
            .len() as i64)
    }

    async fn average_retry_count(&self) -> RepositoryResult<f64> {
        let rows = self.rows()?;
        if rows.transactions.is_empty() {
            return Ok(0.0);
        }
        let total: i64 = rows
            .transactions
            .values()
            .map(|(_, tx)| tx.retry_count as i64)
            .sum();
        Ok(total as f64 / rows.transactions.len() as f64)
    }

    async fn list_logs(&self, transaction_id: Uuid) -> RepositoryResult<Vec<SettlementLog>> {
        Ok(self
            .rows()?
            .logs
            .iter()
            .filter(|log| log.transaction_id == transaction_id)
            .cloned()
            .collect())
    }
}

/// Process-local lock store with per-key expiry.
#[derive(Default)]
pub struct InMemoryLockStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
    unavailable: AtomicBool,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Locked map with expired entries already purged.
    fn live_entries(&self) -> LockStoreResult<MutexGuard<'_, HashMap<String, (String, Instant)>>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LockStoreError::Unavailable(
                "in-memory lock store marked unavailable".to_string(),
            ));
        }
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        Ok(entries)
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> LockStoreResult<bool> {
        let mut entries = self.live_entries()?;
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(true)
    }

    async fn get(&self, key: &str) -> LockStoreResult<Option<String>> {
        Ok(self.live_entries()?.get(key).map(|(value, _)| value.clone()))
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> LockStoreResult<bool> {
        let mut entries = self.live_entries()?;
        match entries.get(key) {
            Some((value, _)) if value == expected => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn exists(&self, key: &str) -> LockStoreResult<bool> {
        Ok(self.live_entries()?.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;

    #[tokio::test]
    async fn test_claim_is_compare_and_swap() {
        let repo = InMemoryTransactionRepository::new();
        let tx = repo
            .insert(&Transaction::new(BigDecimal::from(5), None, None, None))
            .await
            .unwrap();

        assert_eq!(repo.claim(tx.id).await.unwrap(), 1);
        assert_eq!(repo.claim(tx.id).await.unwrap(), 0);
        assert_eq!(repo.claim(Uuid::new_v4()).await.unwrap(), 0);
        assert_eq!(repo.claim_attempts(), 3);
    }

    #[tokio::test]
    async fn test_unavailable_store_errors() {
        let repo = InMemoryTransactionRepository::new();
        repo.set_unavailable(true);
        assert!(matches!(
            repo.count_all().await,
            Err(RepositoryError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_lock_entry_expires() {
        let store = InMemoryLockStore::new();
        assert!(store
            .set_if_absent("k", "a", Duration::from_millis(10))
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(!store.exists("k").await.unwrap());
        assert!(store
            .set_if_absent("k", "b", Duration::from_secs(5))
            .await
            .unwrap());
    }
}
