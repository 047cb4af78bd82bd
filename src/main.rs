use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use settlement_engine::adapters::{
    InMemoryLockStore, InMemoryTransactionRepository, PostgresTransactionRepository,
    RedisLockStore,
};
use settlement_engine::cli::{self, Cli, Commands, DbCommands};
use settlement_engine::config::{Config, LogFormat};
use settlement_engine::ports::{LockStore, TransactionRepository};
use settlement_engine::services::{spawn_settlement_scheduler, SettlementOutcomeDecider, TokioDelay};
use settlement_engine::{create_app, db, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    init_tracing(config.log_format);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(&config, cli.in_memory).await,
        Commands::RunOnce { idempotency_key } => {
            let state = build_state(&config, cli.in_memory).await?;
            cli::handle_run_once(&state, idempotency_key.as_deref()).await
        }
        Commands::Reconcile => {
            let state = build_state(&config, cli.in_memory).await?;
            cli::handle_reconcile(&state).await
        }
        Commands::Exceptions => {
            let state = build_state(&config, cli.in_memory).await?;
            cli::handle_exceptions(&state).await
        }
        Commands::Db(DbCommands::Migrate) => cli::handle_db_migrate(&config).await,
        Commands::Config => cli::handle_config_validate(&config),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let (json, text) = match format {
        LogFormat::Json => (Some(fmt::layer().json()), None),
        LogFormat::Text => (None, Some(fmt::layer())),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(text)
        .init();
}

async fn build_state(config: &Config, in_memory: bool) -> anyhow::Result<AppState> {
    let decider = Arc::new(SettlementOutcomeDecider::from_config(
        &config.outcome_mode,
        config.outcome_random_seed.as_deref(),
    )?);
    tracing::info!(outcome_mode = %decider.mode(), "Settlement outcome decider configured");

    let repository: Arc<dyn TransactionRepository>;
    let lock_store: Arc<dyn LockStore>;
    if in_memory {
        tracing::warn!("Using in-memory storage and locks; state is lost on exit");
        repository = Arc::new(InMemoryTransactionRepository::new());
        lock_store = Arc::new(InMemoryLockStore::new());
    } else {
        let pool = db::create_pool(config).await?;
        db::run_migrations(&pool).await?;
        repository = Arc::new(PostgresTransactionRepository::new(pool));
        lock_store = Arc::new(RedisLockStore::new(config.require_redis_url()?)?);
        tracing::info!("Redis lock store initialized");
    }

    let state = AppState::new(
        repository,
        lock_store,
        decider,
        Arc::new(TokioDelay),
        &config.engine_settings(),
    )?;
    Ok(state)
}

async fn serve(config: &Config, in_memory: bool) -> anyhow::Result<()> {
    let state = build_state(config, in_memory).await?;

    // Must finish before any trigger is accepted.
    state.processor.recover_stuck_transactions().await?;
    state.reconciliation.initialize_missing_status().await?;

    match config.settlement_interval() {
        Some(interval) => {
            spawn_settlement_scheduler(state.trigger.clone(), interval);
        }
        None => tracing::info!("Periodic settlement disabled"),
    }

    let app = create_app(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutdown signal received");
}
