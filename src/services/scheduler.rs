use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{error, info};

use crate::services::transaction_processor::TriggerSource;
use crate::services::trigger::SettlementTrigger;

/// Fires a SCHEDULED settlement run every `interval`. Failures are logged and
/// the loop keeps going.
pub fn spawn_settlement_scheduler(trigger: SettlementTrigger, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        ticker.tick().await; // Skip first immediate tick

        info!(event = "scheduler_started", interval_secs = interval.as_secs());
        loop {
            ticker.tick().await;
            match trigger.trigger(TriggerSource::Scheduled, None).await {
                Ok(result) => info!(event = "scheduled_run_finished", message = %result.message),
                Err(e) => error!(
                    event = "scheduled_run_failed",
                    error_type = e.category(),
                    "Scheduled settlement run failed: {}",
                    e
                ),
            }
        }
    })
}
