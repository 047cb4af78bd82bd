use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use crate::error::AppError;

/// Decides whether a single settlement attempt succeeded.
pub trait OutcomeDecider: Send + Sync {
    fn should_succeed(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementOutcomeMode {
    Random,
    AlwaysSuccess,
    AlwaysFail,
}

impl SettlementOutcomeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementOutcomeMode::Random => "RANDOM",
            SettlementOutcomeMode::AlwaysSuccess => "ALWAYS_SUCCESS",
            SettlementOutcomeMode::AlwaysFail => "ALWAYS_FAIL",
        }
    }
}

impl fmt::Display for SettlementOutcomeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettlementOutcomeMode {
    type Err = AppError;

    /// Blank selects `Random`; anything else must name a mode.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "" | "RANDOM" => Ok(SettlementOutcomeMode::Random),
            "ALWAYS_SUCCESS" => Ok(SettlementOutcomeMode::AlwaysSuccess),
            "ALWAYS_FAIL" => Ok(SettlementOutcomeMode::AlwaysFail),
            _ => Err(AppError::Configuration(format!(
                "Invalid settlement outcome mode: {}. Allowed values: RANDOM, ALWAYS_SUCCESS, ALWAYS_FAIL",
                raw
            ))),
        }
    }
}

/// Configurable stand-in for the external payment network's verdict.
pub struct SettlementOutcomeDecider {
    mode: SettlementOutcomeMode,
    rng: Mutex<StdRng>,
}

impl SettlementOutcomeDecider {
    pub fn new(mode: SettlementOutcomeMode, seed: Option<i64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed as u64),
            None => StdRng::from_entropy(),
        };
        Self {
            mode,
            rng: Mutex::new(rng),
        }
    }

    /// Builds a decider from raw configuration strings, failing fast on bad input.
    pub fn from_config(mode: &str, seed: Option<&str>) -> Result<Self, AppError> {
        let mode = mode.parse::<SettlementOutcomeMode>()?;
        let seed = parse_seed(seed)?;
        Ok(Self::new(mode, seed))
    }

    pub fn mode(&self) -> SettlementOutcomeMode {
        self.mode
    }
}

impl OutcomeDecider for SettlementOutcomeDecider {
    fn should_succeed(&self) -> bool {
        match self.mode {
            SettlementOutcomeMode::AlwaysSuccess => true,
            SettlementOutcomeMode::AlwaysFail => false,
            SettlementOutcomeMode::Random => self
                .rng
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .gen_bool(0.5),
        }
    }
}

fn parse_seed(raw: Option<&str>) -> Result<Option<i64>, AppError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value.parse::<i64>().map(Some).map_err(|_| {
            AppError::Configuration(format!(
                "Invalid settlement outcome random seed: {}. Expected a numeric value.",
                value
            ))
        }),
    }
}
