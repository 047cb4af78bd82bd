use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::domain::{ReconciliationStatus, Transaction, TransactionStatus};
use crate::error::AppError;
use crate::ports::TransactionRepository;
use crate::services::state_machine::TransactionStateMachine;

pub const MISSING_SETTLED_AT_REASON: &str = "SETTLED transaction missing settledAt timestamp";
pub const MAX_RETRIES_REASON: &str = "Settlement failed after max retries";

/// Audits settled and failed transactions and serves the exception queue.
#[derive(Clone)]
pub struct ReconciliationEngine {
    repository: Arc<dyn TransactionRepository>,
    state_machine: TransactionStateMachine,
}

impl ReconciliationEngine {
    pub fn new(repository: Arc<dyn TransactionRepository>) -> Self {
        Self {
            repository,
            state_machine: TransactionStateMachine::new(),
        }
    }

    /// Marks every row with an unset reconciliation status as PENDING.
    pub async fn initialize_missing_status(&self) -> Result<u64, AppError> {
        let missing = self.repository.find_missing_reconciliation_status().await?;
        let now = Utc::now();

        for mut tx in missing.iter().cloned() {
            tx.reconciliation_status = Some(ReconciliationStatus::Pending);
            tx.reconciliation_updated_at = Some(now);
            self.repository.save(&tx).await?;
        }

        if !missing.is_empty() {
            info!(
                event = "reconciliation_initialized",
                missing_status_count = missing.len()
            );
        }
        Ok(missing.len() as u64)
    }

    /// Decides every PENDING transaction that has reached an outcome.
    /// Returns how many rows were updated.
    pub async fn sweep_pending(&self) -> Result<u64, AppError> {
        let pending = self
            .repository
            .find_by_reconciliation_status(ReconciliationStatus::Pending)
            .await?;

        let mut updated = 0u64;
        for mut tx in pending {
            if !apply_reconciliation(&mut tx) {
                continue;
            }
            tx.reconciliation_updated_at = Some(Utc::now());
            self.repository.save(&tx).await?;
            updated += 1;
        }

        if updated > 0 {
            info!(event = "reconciliation_sweep", updated_count = updated);
        }
        Ok(updated)
    }

    /// Exception-queued transactions, oldest first.
    pub async fn exception_queue(&self) -> Result<Vec<Transaction>, AppError> {
        Ok(self.repository.find_exception_queue().await?)
    }

    /// Sends a queued transaction back for another settlement attempt.
    ///
    /// `retry_count` is left as is, so a FAILED transaction gets one more
    /// attempt before exhausting again.
    pub async fn retry(&self, id: Uuid) -> Result<Transaction, AppError> {
        let mut tx = self.find_queued(id).await?;

        tx.reconciliation_status = Some(ReconciliationStatus::Pending);
        tx.exception_reason = None;
        tx.reconciliation_updated_at = Some(Utc::now());

        if tx.status == TransactionStatus::Failed {
            self.state_machine
                .transition(&mut tx, TransactionStatus::Captured, "reconciliation-retry")?;
        }

        let saved = self.repository.save(&tx).await?;
        info!(
            event = "reconciliation_retry",
            transaction_id = %saved.id,
            status = %saved.status,
            reconciliation_status = ?saved.reconciliation_status
        );
        Ok(saved)
    }

    /// Closes a queued transaction. A blank note keeps the prior reason.
    pub async fn resolve(&self, id: Uuid, note: Option<&str>) -> Result<Transaction, AppError> {
        let mut tx = self.find_queued(id).await?;

        let note = note.map(str::trim).filter(|n| !n.is_empty());
        tx.reconciliation_status = Some(ReconciliationStatus::Resolved);
        if let Some(note) = note {
            tx.exception_reason = Some(note.to_string());
        }
        tx.reconciliation_updated_at = Some(Utc::now());

        let saved = self.repository.save(&tx).await?;
        info!(
            event = "reconciliation_resolve",
            transaction_id = %saved.id,
            status = %saved.status,
            note_present = note.is_some()
        );
        Ok(saved)
    }

    async fn find_queued(&self, id: Uuid) -> Result<Transaction, AppError> {
        let tx = self
            .repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Transaction not found: {}", id)))?;

        if tx.reconciliation_status != Some(ReconciliationStatus::ExceptionQueued) {
            let current = tx
                .reconciliation_status
                .map(|s| s.as_str())
                .unwrap_or("UNSET");
            return Err(AppError::InvalidState(format!(
                "Transaction is not in exception queue (reconciliation status: {})",
                current
            )));
        }
        Ok(tx)
    }
}

/// Applies the reconciliation rules to one PENDING row. Returns false when
/// the row has no outcome yet and must stay PENDING.
fn apply_reconciliation(tx: &mut Transaction) -> bool {
    match tx.status {
        TransactionStatus::Settled if tx.settled_at.is_some() => {
            tx.reconciliation_status = Some(ReconciliationStatus::Matched);
            tx.exception_reason = None;
        }
        TransactionStatus::Settled => {
            tx.reconciliation_status = Some(ReconciliationStatus::ExceptionQueued);
            tx.exception_reason = Some(MISSING_SETTLED_AT_REASON.to_string());
        }
        TransactionStatus::Failed => {
            tx.reconciliation_status = Some(ReconciliationStatus::ExceptionQueued);
            tx.exception_reason = Some(MAX_RETRIES_REASON.to_string());
        }
        TransactionStatus::Captured | TransactionStatus::Processing => return false,
    }
    true
}
