pub mod transaction;

pub use transaction::{
    AttemptResult, ReconciliationStatus, SettlementLog, Transaction, TransactionStatus,
    DEFAULT_MAX_RETRIES,
};
