use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use bigdecimal::BigDecimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::Transaction;
use crate::error::AppError;
use crate::ports::TransactionRepository;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateTransactionRequest {
    pub amount: BigDecimal,
    pub max_retries: Option<i32>,
    pub customer_id: Option<Uuid>,
    pub merchant_id: Option<Uuid>,
}

pub async fn create_transaction(
    State(state): State<AppState>,
    Json(req): Json<CreateTransactionRequest>,
) -> Result<impl IntoResponse, AppError> {
    if req.amount <= BigDecimal::from(0) {
        return Err(AppError::BadRequest("amount must be positive".to_string()));
    }
    if matches!(req.max_retries, Some(n) if n < 1) {
        return Err(AppError::BadRequest(
            "max_retries must be at least 1".to_string(),
        ));
    }

    let tx = Transaction::new(req.amount, req.max_retries, req.customer_id, req.merchant_id);
    let created = state.repository.insert(&tx).await?;
    tracing::info!(event = "transaction_captured", transaction_id = %created.id);

    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let tx = state
        .repository
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Transaction {} not found", id)))?;
    Ok(Json(tx))
}

pub async fn list_settlement_logs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    if state.repository.find_by_id(id).await?.is_none() {
        return Err(AppError::NotFound(format!("Transaction {} not found", id)));
    }
    let logs = state.repository.list_logs(id).await?;
    Ok(Json(logs))
}
