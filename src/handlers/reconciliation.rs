use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{ReconciliationStatus, Transaction, TransactionStatus};
use crate::error::AppError;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ExceptionQueueItem {
    pub transaction_id: Uuid,
    pub amount: BigDecimal,
    pub status: TransactionStatus,
    pub reconciliation_status: Option<ReconciliationStatus>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub exception_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
    pub reconciliation_updated_at: Option<DateTime<Utc>>,
}

impl From<Transaction> for ExceptionQueueItem {
    fn from(tx: Transaction) -> Self {
        Self {
            transaction_id: tx.id,
            amount: tx.amount,
            status: tx.status,
            reconciliation_status: tx.reconciliation_status,
            retry_count: tx.retry_count,
            max_retries: tx.max_retries,
            exception_reason: tx.exception_reason,
            created_at: tx.created_at,
            settled_at: tx.settled_at,
            reconciliation_updated_at: tx.reconciliation_updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReconciliationRunResponse {
    pub updated: u64,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResolveRequest {
    pub note: Option<String>,
}

pub async fn run_reconciliation(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let updated = state.reconciliation.sweep_pending().await?;
    Ok(Json(ReconciliationRunResponse { updated }))
}

pub async fn list_exceptions(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let items: Vec<ExceptionQueueItem> = state
        .reconciliation
        .exception_queue()
        .await?
        .into_iter()
        .map(ExceptionQueueItem::from)
        .collect();
    Ok(Json(items))
}

pub async fn retry_exception(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let tx = state.reconciliation.retry(id).await?;
    Ok(Json(ExceptionQueueItem::from(tx)))
}

/// The body is optional; an empty request resolves without a note.
pub async fn resolve_exception(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<ResolveRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let request = body.map(|Json(req)| req).unwrap_or_default();
    let tx = state
        .reconciliation
        .resolve(id, request.note.as_deref())
        .await?;
    Ok(Json(ExceptionQueueItem::from(tx)))
}
