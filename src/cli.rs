use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::services::TriggerSource;
use crate::AppState;

#[derive(Parser)]
#[command(name = "settlement-engine")]
#[command(about = "Settlement Engine - distributed transaction settlement and reconciliation", long_about = None)]
pub struct Cli {
    /// Use process-local storage and locks instead of Postgres and Redis
    #[arg(long, global = true)]
    pub in_memory: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Start the HTTP server and periodic settlement (default)
    Serve,

    /// Run a single manual settlement pass and exit
    RunOnce {
        /// Collapse with other runs carrying the same key
        #[arg(long)]
        idempotency_key: Option<String>,
    },

    /// Run the reconciliation sweep over PENDING transactions
    Reconcile,

    /// Print the reconciliation exception queue
    Exceptions,

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Configuration validation
    Config,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

pub async fn handle_run_once(state: &AppState, idempotency_key: Option<&str>) -> anyhow::Result<()> {
    let result = state
        .trigger
        .trigger(TriggerSource::ManualTrigger, idempotency_key)
        .await?;

    tracing::info!(event = "cli_run_once", replayed = result.replayed);
    println!("✓ {}", result.message);
    Ok(())
}

pub async fn handle_reconcile(state: &AppState) -> anyhow::Result<()> {
    let updated = state.reconciliation.sweep_pending().await?;
    println!("✓ Reconciliation updated {} transaction(s)", updated);
    Ok(())
}

pub async fn handle_exceptions(state: &AppState) -> anyhow::Result<()> {
    let queue = state.reconciliation.exception_queue().await?;

    if queue.is_empty() {
        println!("Exception queue is empty");
        return Ok(());
    }

    println!(
        "{:<38} {:<12} {:<10} {:<8} {}",
        "Transaction", "Amount", "Status", "Retries", "Reason"
    );
    println!("{}", "-".repeat(100));

    for tx in queue {
        println!(
            "{:<38} {:<12} {:<10} {:<8} {}",
            tx.id,
            tx.amount.to_string(),
            tx.status.as_str(),
            format!("{}/{}", tx.retry_count, tx.max_retries),
            tx.exception_reason.as_deref().unwrap_or("-")
        );
    }

    Ok(())
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    let pool = crate::db::create_pool(config).await?;

    tracing::info!("Running database migrations...");
    crate::db::run_migrations(&pool).await?;

    println!("✓ Database migrations completed");
    Ok(())
}

pub fn handle_config_validate(config: &Config) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");

    // Fails on an unknown mode or a non-numeric seed.
    crate::services::SettlementOutcomeDecider::from_config(
        &config.outcome_mode,
        config.outcome_random_seed.as_deref(),
    )?;

    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    println!("  Database URL: {}", mask_password(&config.database_url));
    println!("  Redis URL: {}", mask_password(&config.redis_url));
    println!("  Outcome Mode: {}", config.outcome_mode);
    println!("  Lock TTL: {}s", config.lock_ttl_secs);
    println!("  Idempotency TTL: {}s", config.idempotency_ttl_secs);
    match config.settlement_interval() {
        Some(interval) => println!("  Settlement Interval: {}s", interval.as_secs()),
        None => println!("  Settlement Interval: disabled"),
    }

    tracing::info!("Configuration is valid");
    println!("✓ Configuration is valid");

    Ok(())
}

fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(scheme_end) = url[..at_pos].find("//") {
            let credentials = &url[scheme_end + 2..at_pos];
            if let Some((user, _)) = credentials.split_once(':') {
                return format!("{}{}:****{}", &url[..scheme_end + 2], user, &url[at_pos..]);
            }
        }
    }
    url.to_string()
}
