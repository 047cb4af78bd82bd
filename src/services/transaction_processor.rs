use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::{AttemptResult, ReconciliationStatus, SettlementLog, TransactionStatus};
use crate::error::AppError;
use crate::ports::{MetricsSink, TransactionRepository};
use crate::services::delay::Delay;
use crate::services::outcome::OutcomeDecider;
use crate::services::reconciliation::ReconciliationEngine;
use crate::services::state_machine::TransactionStateMachine;

/// What started a settlement run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerSource {
    Scheduled,
    ManualTrigger,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Scheduled => "SCHEDULED",
            TriggerSource::ManualTrigger => "MANUAL_TRIGGER",
        }
    }
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Claims and settles the CAPTURED backlog, one row at a time.
#[derive(Clone)]
pub struct TransactionProcessor {
    repository: Arc<dyn TransactionRepository>,
    decider: Arc<dyn OutcomeDecider>,
    reconciliation: ReconciliationEngine,
    metrics: Arc<dyn MetricsSink>,
    delay: Arc<dyn Delay>,
    state_machine: TransactionStateMachine,
    manual_visibility_hold: Duration,
}

impl TransactionProcessor {
    pub fn new(
        repository: Arc<dyn TransactionRepository>,
        decider: Arc<dyn OutcomeDecider>,
        reconciliation: ReconciliationEngine,
        metrics: Arc<dyn MetricsSink>,
        delay: Arc<dyn Delay>,
    ) -> Self {
        Self {
            repository,
            decider,
            reconciliation,
            metrics,
            delay,
            state_machine: TransactionStateMachine::new(),
            manual_visibility_hold: Duration::ZERO,
        }
    }

    /// Hold applied after each claim on manual runs so PROCESSING is observable.
    pub fn with_manual_visibility_hold(mut self, hold: Duration) -> Self {
        self.manual_visibility_hold = hold;
        self
    }

    /// Reverts every PROCESSING row left behind by a crashed run to CAPTURED.
    pub async fn recover_stuck_transactions(&self) -> Result<u64, AppError> {
        let stuck = self
            .repository
            .find_by_status(TransactionStatus::Processing)
            .await?;

        for mut tx in stuck.iter().cloned() {
            self.state_machine
                .transition(&mut tx, TransactionStatus::Captured, "startup-recovery")?;
            self.repository.save(&tx).await?;
        }

        if !stuck.is_empty() {
            info!(
                event = "settlement_recovery",
                recovered_processing_count = stuck.len()
            );
        }
        Ok(stuck.len() as u64)
    }

    /// Runs one settlement pass and returns how many rows this instance settled
    /// or failed. Rows claimed by a concurrent pass are skipped.
    pub async fn run_pass(&self, source: TriggerSource) -> Result<u64, AppError> {
        info!(event = "settlement_run_started", trigger_source = %source);

        let candidates = self
            .repository
            .find_ids_by_status(TransactionStatus::Captured)
            .await?;
        info!(
            event = "settlement_candidates_loaded",
            trigger_source = %source,
            captured_count = candidates.len()
        );

        let mut processed = 0u64;
        for id in candidates {
            if self.repository.claim(id).await? == 0 {
                debug!(event = "claim_skipped", transaction_id = %id);
                continue;
            }

            self.hold_for_visibility(source).await;

            if self.settle_claimed(id).await? {
                processed += 1;
            }
        }

        self.reconciliation.sweep_pending().await?;
        Ok(processed)
    }

    async fn hold_for_visibility(&self, source: TriggerSource) {
        if source == TriggerSource::ManualTrigger && !self.manual_visibility_hold.is_zero() {
            self.delay.sleep(self.manual_visibility_hold).await;
        }
    }

    async fn settle_claimed(&self, id: Uuid) -> Result<bool, AppError> {
        let Some(mut tx) = self
            .repository
            .find_by_id_and_status(id, TransactionStatus::Processing)
            .await?
        else {
            return Ok(false);
        };

        let now = Utc::now();
        let log = if self.decider.should_succeed() {
            let log = SettlementLog::new(&tx, AttemptResult::Settled, "Settlement successful");
            self.state_machine
                .transition(&mut tx, TransactionStatus::Settled, "settlement-success")?;
            tx.settled_at = Some(now);
            tx.reconciliation_status = Some(ReconciliationStatus::Pending);
            tx.exception_reason = None;
            tx.reconciliation_updated_at = Some(now);

            self.metrics.record_transaction_settled();
            info!(event = "transaction_settled", transaction_id = %tx.id);
            log
        } else {
            let log = SettlementLog::new(&tx, AttemptResult::Failed, "Settlement failed");
            tx.retry_count += 1;
            info!(
                event = "transaction_failed_attempt",
                transaction_id = %tx.id,
                attempt = tx.retry_count
            );

            if tx.retries_exhausted() {
                self.state_machine
                    .transition(&mut tx, TransactionStatus::Failed, "max-retries-exhausted")?;
                self.metrics.record_transaction_terminal_failure();
            } else {
                self.state_machine
                    .transition(&mut tx, TransactionStatus::Captured, "retry-remaining")?;
                self.metrics.record_transaction_retried();
            }
            tx.reconciliation_status = Some(ReconciliationStatus::Pending);
            tx.exception_reason = None;
            tx.reconciliation_updated_at = Some(now);
            log
        };

        self.repository.record_attempt(&tx, &log).await?;
        Ok(true)
    }
}
