//! Application configuration management.
//!
//! This module handles loading configuration from environment variables.
//! It uses the `envy` crate to automatically deserialize environment variables into a type-safe struct.

use std::time::Duration;

use serde::Deserialize;

use crate::queue::{BackoffPolicy, JobOptions};

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `DATABASE_URL` (optional): PostgreSQL connection string. When unset the
///   server runs on the in-memory store and queue.
/// - `SERVER_PORT` (optional): HTTP server port, defaults to 3000
/// - `DATABASE_MAX_CONNECTIONS` (optional): pool size, defaults to 10
/// - `API_KEY_HASHES` (optional): comma-separated SHA-256 hex digests of accepted API keys
/// - `AUTH_DISABLED` (optional): skip API key checks, defaults to false
/// - `WORKER_ENABLED` (optional): run the batch worker in-process, defaults to true
/// - `WORKER_CONCURRENCY` (optional): jobs processed in parallel, defaults to 2
/// - `WORKER_POLL_INTERVAL_MS` (optional): idle poll interval, defaults to 500
/// - `JOB_ATTEMPTS` (optional): attempts per batch job, defaults to 3
/// - `JOB_BACKOFF_MS` (optional): exponential backoff base delay, defaults to 2000
/// - `ERP_FAILURE_RATE` (optional): simulated ERP failure probability, defaults to 0.1
/// - `ERP_LATENCY_MS` (optional): simulated ERP latency, defaults to 100
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: Option<String>,

    #[serde(default = "default_port")]
    pub server_port: u16,

    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,

    #[serde(default)]
    pub api_key_hashes: Vec<String>,

    #[serde(default)]
    pub auth_disabled: bool,

    #[serde(default = "default_true")]
    pub worker_enabled: bool,

    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    #[serde(default = "default_poll_interval_ms")]
    pub worker_poll_interval_ms: u64,

    #[serde(default = "default_job_attempts")]
    pub job_attempts: u32,

    #[serde(default = "default_job_backoff_ms")]
    pub job_backoff_ms: u64,

    #[serde(default = "default_erp_failure_rate")]
    pub erp_failure_rate: f64,

    #[serde(default = "default_erp_latency_ms")]
    pub erp_latency_ms: u64,
}

/// Default port if SERVER_PORT environment variable is not set.
fn default_port() -> u16 {
    3000
}

fn default_max_connections() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

fn default_worker_concurrency() -> usize {
    2
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_job_attempts() -> u32 {
    3
}

fn default_job_backoff_ms() -> u64 {
    2000
}

fn default_erp_failure_rate() -> f64 {
    0.1
}

fn default_erp_latency_ms() -> u64 {
    100
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// This method first attempts to load a `.env` file (which is optional),
    /// then reads environment variables and deserializes them into a Config struct.
    ///
    /// # Errors
    ///
    /// Returns an error if environment variable values cannot be parsed into expected types.
    pub fn from_env() -> Result<Self, envy::Error> {
        // Try to load .env file if it exists (does nothing if not found)
        dotenvy::dotenv().ok();

        // Field names are automatically converted: database_url -> DATABASE_URL
        envy::from_env::<Config>()
    }

    /// Retry policy applied to every enqueued batch job.
    pub fn job_options(&self) -> JobOptions {
        JobOptions {
            attempts: self.job_attempts.max(1),
            backoff: BackoffPolicy::Exponential {
                delay_ms: self.job_backoff_ms,
            },
        }
    }

    pub fn worker_poll_interval(&self) -> Duration {
        Duration::from_millis(self.worker_poll_interval_ms)
    }

    pub fn erp_latency(&self) -> Duration {
        Duration::from_millis(self.erp_latency_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_only_port_is_given() {
        let config: Config =
            envy::from_iter(vec![("SERVER_PORT".to_string(), "8080".to_string())]).unwrap();

        assert_eq!(config.server_port, 8080);
        assert!(config.database_url.is_none());
        assert!(config.api_key_hashes.is_empty());
        assert!(config.worker_enabled);
        assert_eq!(config.job_attempts, 3);
        assert_eq!(
            config.job_options().backoff,
            BackoffPolicy::Exponential { delay_ms: 2000 }
        );
    }

    #[test]
    fn api_key_hashes_are_comma_separated() {
        let config: Config = envy::from_iter(vec![(
            "API_KEY_HASHES".to_string(),
            "abc,def".to_string(),
        )])
        .unwrap();

        assert_eq!(config.api_key_hashes, vec!["abc", "def"]);
    }
}
