use std::sync::Arc;
use std::time::Duration;

use crate::error::AppError;
use crate::services::coordinator::{RunCoordinator, RunOutcome};
use crate::services::idempotency::{IdempotencyResult, IdempotentTriggerGateway};
use crate::services::transaction_processor::TriggerSource;

pub const DUPLICATE_TRIGGER_MESSAGE: &str =
    "Settlement already running. Duplicate trigger skipped.";

/// Entry point for every settlement run, scheduled or manual.
#[derive(Clone)]
pub struct SettlementTrigger {
    gateway: Arc<IdempotentTriggerGateway>,
    coordinator: RunCoordinator,
    manual_min_lock_hold: Duration,
}

impl SettlementTrigger {
    pub fn new(
        gateway: Arc<IdempotentTriggerGateway>,
        coordinator: RunCoordinator,
        manual_min_lock_hold: Duration,
    ) -> Self {
        Self {
            gateway,
            coordinator,
            manual_min_lock_hold,
        }
    }

    pub async fn trigger(
        &self,
        source: TriggerSource,
        idempotency_key: Option<&str>,
    ) -> Result<IdempotencyResult, AppError> {
        let min_lock_hold = match source {
            TriggerSource::ManualTrigger => self.manual_min_lock_hold,
            TriggerSource::Scheduled => Duration::ZERO,
        };

        let coordinator = self.coordinator.clone();
        self.gateway
            .execute(idempotency_key, move || async move {
                let outcome = coordinator.run(source, min_lock_hold).await?;
                Ok(run_message(outcome))
            })
            .await
    }
}

fn run_message(outcome: RunOutcome) -> String {
    if outcome.lock_acquired {
        format!(
            "Settlement triggered successfully. Processed {} transaction(s).",
            outcome.processed_count
        )
    } else {
        DUPLICATE_TRIGGER_MESSAGE.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_messages() {
        assert_eq!(
            run_message(RunOutcome {
                lock_acquired: true,
                processed_count: 4
            }),
            "Settlement triggered successfully. Processed 4 transaction(s)."
        );
        assert_eq!(
            run_message(RunOutcome {
                lock_acquired: false,
                processed_count: 0
            }),
            DUPLICATE_TRIGGER_MESSAGE
        );
    }
}
