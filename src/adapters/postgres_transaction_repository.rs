//! Postgres implementation of TransactionRepository.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{
    AttemptResult, ReconciliationStatus, SettlementLog, Transaction, TransactionStatus,
};
use crate::ports::{RepositoryError, RepositoryResult, TransactionRepository};

const TRANSACTION_COLUMNS: &str = r#"
    id, amount, status, reconciliation_status, retry_count, max_retries,
    created_at, settled_at, reconciliation_updated_at, exception_reason,
    customer_id, merchant_id
"#;

/// Postgres-backed transaction repository.
#[derive(Clone)]
pub struct PostgresTransactionRepository {
    pool: PgPool,
}

impl PostgresTransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_where(
        &self,
        predicate: &str,
        bind: Option<&str>,
    ) -> RepositoryResult<Vec<Transaction>> {
        let sql = format!(
            "SELECT {} FROM transactions WHERE {} ORDER BY created_at ASC, id ASC",
            TRANSACTION_COLUMNS, predicate
        );
        let mut query = sqlx::query_as::<_, TransactionRow>(&sql);
        if let Some(value) = bind {
            query = query.bind(value);
        }
        let rows = query.fetch_all(&self.pool).await?;

        rows.into_iter().map(TransactionRow::into_domain).collect()
    }
}

#[async_trait]
impl TransactionRepository for PostgresTransactionRepository {
    async fn insert(&self, tx: &Transaction) -> RepositoryResult<Transaction> {
        let sql = format!(
            r#"
            INSERT INTO transactions (
                id, amount, status, reconciliation_status, retry_count, max_retries,
                created_at, settled_at, reconciliation_updated_at, exception_reason,
                customer_id, merchant_id
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        );
        let row = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(tx.id)
            .bind(&tx.amount)
            .bind(tx.status.as_str())
            .bind(tx.reconciliation_status.map(|s| s.as_str()))
            .bind(tx.retry_count)
            .bind(tx.max_retries)
            .bind(tx.created_at)
            .bind(tx.settled_at)
            .bind(tx.reconciliation_updated_at)
            .bind(&tx.exception_reason)
            .bind(tx.customer_id)
            .bind(tx.merchant_id)
            .fetch_one(&self.pool)
            .await?;

        row.into_domain()
    }

    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<Transaction>> {
        let sql = format!("SELECT {} FROM transactions WHERE id = $1", TRANSACTION_COLUMNS);
        let row = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(TransactionRow::into_domain).transpose()
    }

    async fn find_by_id_and_status(
        &self,
        id: Uuid,
        status: TransactionStatus,
    ) -> RepositoryResult<Option<Transaction>> {
        let sql = format!(
            "SELECT {} FROM transactions WHERE id = $1 AND status = $2",
            TRANSACTION_COLUMNS
        );
        let row = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(id)
            .bind(status.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(TransactionRow::into_domain).transpose()
    }

    async fn find_by_status(&self, status: TransactionStatus) -> RepositoryResult<Vec<Transaction>> {
        self.fetch_where("status = $1", Some(status.as_str())).await
    }

    async fn find_ids_by_status(&self, status: TransactionStatus) -> RepositoryResult<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM transactions WHERE status = $1 ORDER BY created_at ASC, id ASC",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn claim(&self, id: Uuid) -> RepositoryResult<u64> {
        let result = sqlx::query(
            "UPDATE transactions SET status = 'PROCESSING' WHERE id = $1 AND status = 'CAPTURED'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn save(&self, tx: &Transaction) -> RepositoryResult<Transaction> {
        let mut db_tx = self.pool.begin().await?;
        let saved = update_transaction(&mut db_tx, tx).await?;
        db_tx.commit().await?;
        Ok(saved)
    }

    async fn record_attempt(&self, tx: &Transaction, log: &SettlementLog) -> RepositoryResult<()> {
        let mut db_tx = self.pool.begin().await?;

        update_transaction(&mut db_tx, tx).await?;

        sqlx::query(
            r#"
            INSERT INTO settlement_logs (
                id, transaction_id, attempt_number, result, message, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(log.id)
        .bind(log.transaction_id)
        .bind(log.attempt_number)
        .bind(log.result.as_str())
        .bind(&log.message)
        .bind(log.created_at)
        .execute(&mut *db_tx)
        .await?;

        db_tx.commit().await?;
        Ok(())
    }

    async fn find_by_reconciliation_status(
        &self,
        status: ReconciliationStatus,
    ) -> RepositoryResult<Vec<Transaction>> {
        self.fetch_where("reconciliation_status = $1", Some(status.as_str()))
            .await
    }

    async fn find_exception_queue(&self) -> RepositoryResult<Vec<Transaction>> {
        self.find_by_reconciliation_status(ReconciliationStatus::ExceptionQueued)
            .await
    }

    async fn find_missing_reconciliation_status(&self) -> RepositoryResult<Vec<Transaction>> {
        self.fetch_where("reconciliation_status IS NULL", None).await
    }

    async fn count_all(&self) -> RepositoryResult<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM transactions")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn count_by_status(&self, status: TransactionStatus) -> RepositoryResult<i64> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM transactions WHERE status = $1")
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn count_by_reconciliation_status(
        &self,
        status: ReconciliationStatus,
    ) -> RepositoryResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM transactions WHERE reconciliation_status = $1",
        )
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn average_retry_count(&self) -> RepositoryResult<f64> {
        let avg = sqlx::query_scalar::<_, f64>(
            "SELECT COALESCE(AVG(retry_count), 0)::float8 FROM transactions",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(avg)
    }

    async fn list_logs(&self, transaction_id: Uuid) -> RepositoryResult<Vec<SettlementLog>> {
        let rows = sqlx::query_as::<_, SettlementLogRow>(
            r#"
            SELECT id, transaction_id, attempt_number, result, message, created_at
            FROM settlement_logs
            WHERE transaction_id = $1
            ORDER BY created_at ASC, attempt_number ASC
            "#,
        )
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SettlementLogRow::into_domain).collect()
    }
}

async fn update_transaction(
    db_tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    tx: &Transaction,
) -> RepositoryResult<Transaction> {
    let sql = format!(
        r#"
        UPDATE transactions SET
            status = $2,
            reconciliation_status = $3,
            retry_count = $4,
            settled_at = $5,
            reconciliation_updated_at = $6,
            exception_reason = $7
        WHERE id = $1
        RETURNING {}
        "#,
        TRANSACTION_COLUMNS
    );
    let row = sqlx::query_as::<_, TransactionRow>(&sql)
        .bind(tx.id)
        .bind(tx.status.as_str())
        .bind(tx.reconciliation_status.map(|s| s.as_str()))
        .bind(tx.retry_count)
        .bind(tx.settled_at)
        .bind(tx.reconciliation_updated_at)
        .bind(&tx.exception_reason)
        .fetch_optional(&mut **db_tx)
        .await?;

    row.ok_or_else(|| RepositoryError::NotFound(tx.id.to_string()))?
        .into_domain()
}

/// Internal row type for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    amount: BigDecimal,
    status: String,
    reconciliation_status: Option<String>,
    retry_count: i32,
    max_retries: i32,
    created_at: DateTime<Utc>,
    settled_at: Option<DateTime<Utc>>,
    reconciliation_updated_at: Option<DateTime<Utc>>,
    exception_reason: Option<String>,
    customer_id: Option<Uuid>,
    merchant_id: Option<Uuid>,
}

impl TransactionRow {
    fn into_domain(self) -> RepositoryResult<Transaction> {
        let status = self
            .status
            .parse::<TransactionStatus>()
            .map_err(RepositoryError::Corrupt)?;
        let reconciliation_status = self
            .reconciliation_status
            .as_deref()
            .map(str::parse::<ReconciliationStatus>)
            .transpose()
            .map_err(RepositoryError::Corrupt)?;

        Ok(Transaction {
            id: self.id,
            amount: self.amount,
            status,
            reconciliation_status,
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            created_at: self.created_at,
            settled_at: self.settled_at,
            reconciliation_updated_at: self.reconciliation_updated_at,
            exception_reason: self.exception_reason,
            customer_id: self.customer_id,
            merchant_id: self.merchant_id,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SettlementLogRow {
    id: Uuid,
    transaction_id: Uuid,
    attempt_number: i32,
    result: String,
    message: String,
    created_at: DateTime<Utc>,
}

impl SettlementLogRow {
    fn into_domain(self) -> RepositoryResult<SettlementLog> {
        Ok(SettlementLog {
            id: self.id,
            transaction_id: self.transaction_id,
            attempt_number: self.attempt_number,
            result: self
                .result
                .parse::<AttemptResult>()
                .map_err(RepositoryError::Corrupt)?,
            message: self.message,
            created_at: self.created_at,
        })
    }
}
