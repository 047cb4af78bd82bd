//! Transaction domain entity.
//! Framework-agnostic representation of a captured payment awaiting settlement.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub const DEFAULT_MAX_RETRIES: i32 = 3;

/// Settlement lifecycle of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Captured,
    Processing,
    Settled,
    Failed,
}

impl TransactionStatus {
    pub const ALL: [TransactionStatus; 4] = [
        TransactionStatus::Captured,
        TransactionStatus::Processing,
        TransactionStatus::Settled,
        TransactionStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Captured => "CAPTURED",
            TransactionStatus::Processing => "PROCESSING",
            TransactionStatus::Settled => "SETTLED",
            TransactionStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CAPTURED" => Ok(TransactionStatus::Captured),
            "PROCESSING" => Ok(TransactionStatus::Processing),
            "SETTLED" => Ok(TransactionStatus::Settled),
            "FAILED" => Ok(TransactionStatus::Failed),
            other => Err(format!("unknown transaction status: {}", other)),
        }
    }
}

/// Audit dimension, derived from `TransactionStatus` on every reconciliation sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconciliationStatus {
    Pending,
    Matched,
    ExceptionQueued,
    Resolved,
}

impl ReconciliationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconciliationStatus::Pending => "PENDING",
            ReconciliationStatus::Matched => "MATCHED",
            ReconciliationStatus::ExceptionQueued => "EXCEPTION_QUEUED",
            ReconciliationStatus::Resolved => "RESOLVED",
        }
    }
}

impl fmt::Display for ReconciliationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReconciliationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ReconciliationStatus::Pending),
            "MATCHED" => Ok(ReconciliationStatus::Matched),
            "EXCEPTION_QUEUED" => Ok(ReconciliationStatus::ExceptionQueued),
            "RESOLVED" => Ok(ReconciliationStatus::Resolved),
            other => Err(format!("unknown reconciliation status: {}", other)),
        }
    }
}

/// Domain entity representing a transaction.
///
/// `status` is only ever changed through
/// [`TransactionStateMachine`](crate::services::TransactionStateMachine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub amount: BigDecimal,
    pub status: TransactionStatus,
    pub reconciliation_status: Option<ReconciliationStatus>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
    pub reconciliation_updated_at: Option<DateTime<Utc>>,
    pub exception_reason: Option<String>,
    pub customer_id: Option<Uuid>,
    pub merchant_id: Option<Uuid>,
}

impl Transaction {
    pub fn new(
        amount: BigDecimal,
        max_retries: Option<i32>,
        customer_id: Option<Uuid>,
        merchant_id: Option<Uuid>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            amount,
            status: TransactionStatus::Captured,
            reconciliation_status: Some(ReconciliationStatus::Pending),
            retry_count: 0,
            max_retries: max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            created_at: now,
            settled_at: None,
            reconciliation_updated_at: Some(now),
            exception_reason: None,
            customer_id,
            merchant_id,
        }
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

/// Outcome recorded for a single settlement attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptResult {
    Settled,
    Failed,
}

impl AttemptResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptResult::Settled => "SETTLED",
            AttemptResult::Failed => "FAILED",
        }
    }
}

impl FromStr for AttemptResult {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SETTLED" => Ok(AttemptResult::Settled),
            "FAILED" => Ok(AttemptResult::Failed),
            other => Err(format!("unknown attempt result: {}", other)),
        }
    }
}

/// Append-only audit row, one per settlement attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementLog {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub attempt_number: i32,
    pub result: AttemptResult,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl SettlementLog {
    pub fn new(transaction: &Transaction, result: AttemptResult, message: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            transaction_id: transaction.id,
            attempt_number: transaction.retry_count + 1,
            result,
            message: message.to_string(),
            created_at: Utc::now(),
        }
    }
}
