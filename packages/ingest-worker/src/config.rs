use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Worker configuration loaded from environment variables (§6
/// "Environment"): broker/DB connection strings are required, everything
/// else has a spec-given default.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub nats_url: String,
    pub parallel_files: usize,
    pub recovery_interval_secs: u64,
    pub max_tokens_per_unit: usize,
    pub preprocess_claim_timeout_secs: i64,
    pub graph_claim_timeout_secs: i64,
    pub lease_ttl_secs: u64,
    pub stale_batch_threshold_secs: u64,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            nats_url: env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string()),
            parallel_files: env_or("PARALLEL_FILES", 1),
            recovery_interval_secs: env_or("RECOVERY_INTERVAL_SECS", 60),
            max_tokens_per_unit: env_or(
                "MAX_TOKENS_PER_UNIT",
                graph_core::stage::extract::DEFAULT_MAX_TOKENS,
            ),
            preprocess_claim_timeout_secs: env_or(
                "PREPROCESS_CLAIM_TIMEOUT_SECS",
                graph_core::batch::PREPROCESS_CLAIM_TIMEOUT_SECS,
            ),
            graph_claim_timeout_secs: env_or(
                "GRAPH_CLAIM_TIMEOUT_SECS",
                graph_core::batch::GRAPH_CLAIM_TIMEOUT_SECS,
            ),
            lease_ttl_secs: env_or("LEASE_TTL_SECS", 30),
            stale_batch_threshold_secs: env_or(
                "STALE_BATCH_THRESHOLD_SECS",
                graph_core::recovery::STALE_THRESHOLD.as_secs(),
            ),
        })
    }
}
