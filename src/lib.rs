pub mod adapters;
pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod ports;
pub mod services;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::EngineSettings;
use crate::error::AppError;
use crate::metrics::SettlementMetrics;
use crate::ports::{LockStore, TransactionRepository};
use crate::services::{
    Delay, IdempotentTriggerGateway, LockManager, MonitoringService, OutcomeDecider,
    ReconciliationEngine, RunCoordinator, SettlementTrigger, TransactionProcessor,
};

/// Fully wired settlement engine, shared by the HTTP layer and the CLI.
#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<dyn TransactionRepository>,
    pub processor: TransactionProcessor,
    pub reconciliation: ReconciliationEngine,
    pub trigger: SettlementTrigger,
    pub monitoring: MonitoringService,
    pub metrics: Arc<SettlementMetrics>,
}

impl AppState {
    pub fn new(
        repository: Arc<dyn TransactionRepository>,
        lock_store: Arc<dyn LockStore>,
        decider: Arc<dyn OutcomeDecider>,
        delay: Arc<dyn Delay>,
        settings: &EngineSettings,
    ) -> Result<Self, AppError> {
        if settings.lock_ttl.is_zero() {
            return Err(AppError::Configuration(
                "Settlement lock TTL must be greater than zero.".to_string(),
            ));
        }

        let metrics = Arc::new(SettlementMetrics::new());
        let locks = LockManager::new(lock_store, settings.lock_operation_timeout);
        let reconciliation = ReconciliationEngine::new(repository.clone());

        let processor = TransactionProcessor::new(
            repository.clone(),
            decider,
            reconciliation.clone(),
            metrics.clone(),
            delay.clone(),
        )
        .with_manual_visibility_hold(settings.manual_processing_visibility_hold);

        let coordinator = RunCoordinator::new(
            processor.clone(),
            locks.clone(),
            metrics.clone(),
            delay,
            settings.lock_ttl,
        );
        let gateway = Arc::new(IdempotentTriggerGateway::new(
            settings.idempotency_ttl,
            settings.idempotency_wait_timeout,
        )?);
        let trigger = SettlementTrigger::new(gateway, coordinator, settings.manual_min_lock_hold);
        let monitoring = MonitoringService::new(repository.clone(), locks, metrics.clone());

        Ok(Self {
            repository,
            processor,
            reconciliation,
            trigger,
            monitoring,
            metrics,
        })
    }
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/settlement/trigger",
            post(handlers::settlements::trigger_settlement),
        )
        .route(
            "/api/settlements/stats",
            get(handlers::settlements::get_stats),
        )
        .route(
            "/api/reconciliation/run",
            post(handlers::reconciliation::run_reconciliation),
        )
        .route(
            "/api/reconciliation/exceptions",
            get(handlers::reconciliation::list_exceptions),
        )
        .route(
            "/api/reconciliation/exceptions/:id/retry",
            post(handlers::reconciliation::retry_exception),
        )
        .route(
            "/api/reconciliation/exceptions/:id/resolve",
            post(handlers::reconciliation::resolve_exception),
        )
        .route(
            "/transactions",
            post(handlers::transactions::create_transaction),
        )
        .route(
            "/transactions/:id",
            get(handlers::transactions::get_transaction),
        )
        .route(
            "/transactions/:id/logs",
            get(handlers::transactions::list_settlement_logs),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
