use anyhow::Context;
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    pub redis_url: String,
    pub db_max_connections: u32,
    pub outcome_mode: String,
    pub outcome_random_seed: Option<String>,
    pub lock_ttl_secs: u64,
    pub lock_operation_timeout_ms: u64,
    pub manual_min_lock_hold_ms: u64,
    pub manual_processing_visibility_hold_ms: u64,
    pub idempotency_ttl_secs: u64,
    pub idempotency_wait_timeout_ms: u64,
    pub settlement_interval_secs: u64,
    pub log_format: LogFormat,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present

        Ok(Config {
            server_port: parse_var("SERVER_PORT", 3000)?,
            database_url: env::var("DATABASE_URL").unwrap_or_default(),
            redis_url: env::var("REDIS_URL").unwrap_or_default(),
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", 5)?,
            outcome_mode: env::var("SETTLEMENT_OUTCOME_MODE").unwrap_or_else(|_| "RANDOM".to_string()),
            outcome_random_seed: env::var("SETTLEMENT_OUTCOME_RANDOM_SEED").ok(),
            lock_ttl_secs: parse_var("SETTLEMENT_LOCK_TTL_SECS", 25)?,
            lock_operation_timeout_ms: parse_var("LOCK_OPERATION_TIMEOUT_MS", 2000)?,
            manual_min_lock_hold_ms: parse_var("MANUAL_TRIGGER_MIN_LOCK_HOLD_MS", 1200)?,
            manual_processing_visibility_hold_ms: parse_var(
                "MANUAL_PROCESSING_VISIBILITY_HOLD_MS",
                2500,
            )?,
            idempotency_ttl_secs: parse_var("IDEMPOTENCY_TTL_SECS", 600)?,
            idempotency_wait_timeout_ms: parse_var("IDEMPOTENCY_WAIT_TIMEOUT_MS", 5000)?,
            settlement_interval_secs: parse_var("SETTLEMENT_INTERVAL_SECS", 30)?,
            log_format: parse_log_format(&env::var("LOG_FORMAT").unwrap_or_default())?,
        })
    }

    /// Only the Postgres-backed runs need a database.
    pub fn require_database_url(&self) -> anyhow::Result<&str> {
        require("DATABASE_URL", &self.database_url)
    }

    pub fn require_redis_url(&self) -> anyhow::Result<&str> {
        require("REDIS_URL", &self.redis_url)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn lock_operation_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_operation_timeout_ms)
    }

    pub fn manual_min_lock_hold(&self) -> Duration {
        Duration::from_millis(self.manual_min_lock_hold_ms)
    }

    pub fn manual_processing_visibility_hold(&self) -> Duration {
        Duration::from_millis(self.manual_processing_visibility_hold_ms)
    }

    pub fn idempotency_ttl(&self) -> Duration {
        Duration::from_secs(self.idempotency_ttl_secs)
    }

    pub fn idempotency_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.idempotency_wait_timeout_ms)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            lock_ttl: self.lock_ttl(),
            lock_operation_timeout: self.lock_operation_timeout(),
            manual_min_lock_hold: self.manual_min_lock_hold(),
            manual_processing_visibility_hold: self.manual_processing_visibility_hold(),
            idempotency_ttl: self.idempotency_ttl(),
            idempotency_wait_timeout: self.idempotency_wait_timeout(),
        }
    }

    /// `None` disables the periodic trigger.
    pub fn settlement_interval(&self) -> Option<Duration> {
        (self.settlement_interval_secs > 0).then(|| Duration::from_secs(self.settlement_interval_secs))
    }
}

/// Timing knobs for the settlement engine, split out of [`Config`] so the
/// engine can be assembled without a database or Redis URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub lock_ttl: Duration,
    pub lock_operation_timeout: Duration,
    pub manual_min_lock_hold: Duration,
    pub manual_processing_visibility_hold: Duration,
    pub idempotency_ttl: Duration,
    pub idempotency_wait_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(25),
            lock_operation_timeout: Duration::from_millis(2000),
            manual_min_lock_hold: Duration::from_millis(1200),
            manual_processing_visibility_hold: Duration::from_millis(2500),
            idempotency_ttl: Duration::from_secs(600),
            idempotency_wait_timeout: Duration::from_millis(5000),
        }
    }
}

fn parse_var<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: {}", name, raw)),
        _ => Ok(default),
    }
}

fn require<'a>(name: &str, value: &'a str) -> anyhow::Result<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        anyhow::bail!("{} must be set", name);
    }
    Ok(value)
}

fn parse_log_format(raw: &str) -> anyhow::Result<LogFormat> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "text" | "pretty" => Ok(LogFormat::Text),
        "json" => Ok(LogFormat::Json),
        other => anyhow::bail!("LOG_FORMAT must be 'text' or 'json', got '{}'", other),
    }
}
