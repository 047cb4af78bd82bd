pub mod coordinator;
pub mod delay;
pub mod idempotency;
pub mod lock;
pub mod monitoring;
pub mod outcome;
pub mod reconciliation;
pub mod scheduler;
pub mod state_machine;
pub mod transaction_processor;
pub mod trigger;

pub use coordinator::{RunCoordinator, RunOutcome};
pub use delay::{Delay, NoDelay, TokioDelay};
pub use idempotency::{IdempotencyResult, IdempotentTriggerGateway};
pub use lock::{LockManager, SETTLEMENT_LOCK_KEY};
pub use monitoring::{MonitoringService, SettlementStats};
pub use outcome::{OutcomeDecider, SettlementOutcomeDecider, SettlementOutcomeMode};
pub use reconciliation::ReconciliationEngine;
pub use scheduler::spawn_settlement_scheduler;
pub use state_machine::TransactionStateMachine;
pub use transaction_processor::{TransactionProcessor, TriggerSource};
pub use trigger::SettlementTrigger;
