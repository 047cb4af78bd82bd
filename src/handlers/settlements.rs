use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue},
    response::IntoResponse,
    Json,
};

use crate::error::AppError;
use crate::services::TriggerSource;
use crate::AppState;

pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";
pub const IDEMPOTENT_REPLAYED_HEADER: &str = "Idempotent-Replayed";

pub async fn trigger_settlement(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let key = match headers.get(IDEMPOTENCY_KEY_HEADER) {
        Some(value) => Some(value.to_str().map_err(|_| {
            AppError::BadRequest("Idempotency-Key must be visible ASCII".to_string())
        })?),
        None => None,
    };

    let result = state
        .trigger
        .trigger(TriggerSource::ManualTrigger, key)
        .await?;

    let mut response_headers = HeaderMap::new();
    if result.replayed {
        response_headers.insert(IDEMPOTENT_REPLAYED_HEADER, HeaderValue::from_static("true"));
    }

    Ok((response_headers, Json(result)))
}

pub async fn get_stats(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let stats = state.monitoring.stats().await?;
    Ok(Json(stats))
}
