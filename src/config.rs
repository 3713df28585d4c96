//! Configuration for the routing core.
//!
//! Everything is env-var driven: `Config::from_env()` reads overrides and
//! falls back to sensible defaults for local development.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

fn env_duration_secs(key: &str, default_secs: u64) -> Result<Duration, ConfigError> {
    match std::env::var(key) {
        Ok(v) => v
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string())),
        Err(_) => Ok(Duration::from_secs(default_secs)),
    }
}

fn env_duration_millis(key: &str, default_millis: u64) -> Result<Duration, ConfigError> {
    match std::env::var(key) {
        Ok(v) => v
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string())),
        Err(_) => Ok(Duration::from_millis(default_millis)),
    }
}

fn env_u32(key: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(key) {
        Ok(v) => v
            .parse::<u32>()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

fn env_u8(key: &str, default: u8) -> Result<u8, ConfigError> {
    match std::env::var(key) {
        Ok(v) => v
            .parse::<u8>()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

/// Whether the Router flips an account to `error` on the first provider
/// fault, or tolerates a few soft failures first.
///
/// Default is `HardFlip`, matching a single dedicated account flipping to
/// `error` on its first fault rather than absorbing several before the
/// Router gives up on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureModeOnProviderError {
    /// Flip to `error` after a single provider failure.
    HardFlip,
    /// Only flip to `error` after `max_consecutive_failures`, mirroring the
    /// Pool Manager's own health-check rule (Invariant 7).
    SoftCount,
}

impl FailureModeOnProviderError {
    fn from_env() -> Result<Self, ConfigError> {
        match std::env::var("FAILURE_MODE_ON_PROVIDER_ERROR").as_deref() {
            Ok("soft_count") => Ok(Self::SoftCount),
            Ok("hard_flip") | Err(_) => Ok(Self::HardFlip),
            Ok(other) => Err(ConfigError::InvalidValue(
                "FAILURE_MODE_ON_PROVIDER_ERROR".to_string(),
                other.to_string(),
            )),
        }
    }
}

/// Score weights for the Pool Manager's `score` formula.
#[derive(Debug, Clone, Copy)]
pub struct ScoreWeights {
    pub load: f64,
    pub health: f64,
    pub response_time: f64,
    pub recent_use: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            load: 0.4,
            health: 0.3,
            response_time: 0.2,
            recent_use: 0.1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    // Health-check loop
    pub health_check_interval: Duration,
    pub health_check_timeout: Duration,
    pub parallel_health_checks: u32,
    pub max_consecutive_failures: u32,

    // Pool-refresh loop
    pub pool_refresh_interval: Duration,
    pub min_healthy_accounts: u32,
    pub score_weights: ScoreWeights,

    // Router retry
    pub max_retries: u32,
    pub retry_delay_base: Duration,
    pub load_cap_percent: u8,
    pub load_decay_period: Duration,
    pub failure_mode: FailureModeOnProviderError,

    // Provider call
    pub provider_call_timeout: Duration,

    // HTTP surface
    pub host: String,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            health_check_interval: env_duration_secs("HEALTH_CHECK_INTERVAL_SECS", 300)?,
            health_check_timeout: env_duration_secs("HEALTH_CHECK_TIMEOUT_SECS", 10)?,
            parallel_health_checks: env_u32("PARALLEL_HEALTH_CHECKS", 5)?,
            max_consecutive_failures: env_u32("MAX_CONSECUTIVE_FAILURES", 3)?,

            pool_refresh_interval: env_duration_secs("POOL_REFRESH_INTERVAL_SECS", 120)?,
            min_healthy_accounts: env_u32("MIN_HEALTHY_ACCOUNTS", 2)?,
            score_weights: ScoreWeights::default(),

            max_retries: env_u32("MAX_RETRIES", 3)?,
            retry_delay_base: env_duration_millis("RETRY_DELAY_BASE_MS", 1000)?,
            load_cap_percent: env_u8("LOAD_CAP_PERCENT", 95)?,
            load_decay_period: env_duration_secs("LOAD_DECAY_PERIOD_SECS", 60)?,
            failure_mode: FailureModeOnProviderError::from_env()?,

            provider_call_timeout: env_duration_secs("PROVIDER_CALL_TIMEOUT_SECS", 30)?,

            host: std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .map_err(|e| ConfigError::InvalidValue("PORT".to_string(), format!("{}", e)))?,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(300),
            health_check_timeout: Duration::from_secs(10),
            parallel_health_checks: 5,
            max_consecutive_failures: 3,
            pool_refresh_interval: Duration::from_secs(120),
            min_healthy_accounts: 2,
            score_weights: ScoreWeights::default(),
            max_retries: 3,
            retry_delay_base: Duration::from_millis(1000),
            load_cap_percent: 95,
            load_decay_period: Duration::from_secs(60),
            failure_mode: FailureModeOnProviderError::HardFlip,
            provider_call_timeout: Duration::from_secs(30),
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}
