use std::collections::HashMap;

use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Optional: without a database the in-memory provider is used
    pub database_url: Option<String>,
    pub bind_address: String,
    /// Base URL for the HTTP-polling oracle provider
    pub oracle_api_base_url: String,
    /// Per-call oracle verification timeout (milliseconds)
    pub oracle_timeout_ms: u64,
    /// Retries per milestone after a failed oracle call
    pub oracle_retry_attempts: u32,
    /// Quorum required by the aggregator oracle
    pub aggregator_quorum: usize,
    /// Webhook nonce retention window (hours)
    pub webhook_nonce_retention_hours: i64,
    /// oracle_id -> shared HMAC secret for inbound webhooks
    pub webhook_secrets: HashMap<String, String>,
    /// Deadline poller interval (seconds)
    pub deadline_poll_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL").ok(),
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            oracle_api_base_url: std::env::var("ORACLE_API_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:9090".to_string()),
            oracle_timeout_ms: std::env::var("ORACLE_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10_000),
            oracle_retry_attempts: std::env::var("ORACLE_RETRY_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2),
            aggregator_quorum: std::env::var("AGGREGATOR_QUORUM")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1),
            webhook_nonce_retention_hours: std::env::var("WEBHOOK_NONCE_RETENTION_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(24),
            webhook_secrets: Self::parse_webhook_secrets(
                &std::env::var("ORACLE_WEBHOOK_SECRETS").unwrap_or_default(),
            ),
            deadline_poll_interval_secs: std::env::var("DEADLINE_POLL_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
        })
    }

    /// Format: "oracle_a:secret_a,oracle_b:secret_b"
    fn parse_webhook_secrets(raw: &str) -> HashMap<String, String> {
        raw.split(',')
            .filter_map(|pair| {
                let (oracle_id, secret) = pair.split_once(':')?;
                if oracle_id.is_empty() || secret.is_empty() {
                    return None;
                }
                Some((oracle_id.trim().to_string(), secret.trim().to_string()))
            })
            .collect()
    }
}
