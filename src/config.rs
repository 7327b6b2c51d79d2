use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;

use crate::error::{AppError, AppResult};

/// Which storage backend holds sessions, the processed set and the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

/// Which event source strategy feeds the reconciler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum EventSourceKind {
    Poll,
    Push,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    pub storage_backend: StorageBackend,
    pub event_source: EventSourceKind,

    // Chain
    pub chain_rpc_url: String,
    pub token_contract: String,
    pub token_decimals: u32,
    pub service_wallet: String,
    pub poll_interval_secs: u64,

    // Pricing
    pub rate_api_url: String,
    pub rate_asset_id: String,
    pub rate_refresh_secs: u64,
    pub fallback_rate: Decimal,
    pub fiat_currency: String,

    // Session policy
    pub fee_percent: Decimal,
    pub min_session_amount: Decimal,
    pub max_session_amount: Decimal,
    pub min_transfer_amount: Decimal,
    pub match_tolerance: Decimal,
    pub session_ttl_secs: i64,
    pub processed_retention_days: i64,

    // Payout
    pub max_payout_retries: u32,
    pub worker_poll_secs: u64,
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: Option<String>,
    pub chain_webhook_secret: Option<String>,
    pub http_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> AppResult<Self> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/offramp".to_string()),
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            storage_backend: match env_or("STORAGE_BACKEND", "postgres").as_str() {
                "postgres" => StorageBackend::Postgres,
                "memory" => StorageBackend::Memory,
                other => {
                    return Err(AppError::Config(format!(
                        "Unknown STORAGE_BACKEND: {}",
                        other
                    )))
                }
            },
            event_source: match env_or("EVENT_SOURCE", "poll").as_str() {
                "poll" => EventSourceKind::Poll,
                "push" => EventSourceKind::Push,
                other => {
                    return Err(AppError::Config(format!("Unknown EVENT_SOURCE: {}", other)))
                }
            },
            chain_rpc_url: std::env::var("CHAIN_RPC_URL")
                .unwrap_or_else(|_| "https://bsc-dataseed.binance.org".to_string()),
            token_contract: std::env::var("TOKEN_CONTRACT")
                .unwrap_or_default()
                .to_lowercase(),
            token_decimals: parse_env("TOKEN_DECIMALS", 18)?,
            service_wallet: std::env::var("SERVICE_WALLET_ADDRESS")
                .unwrap_or_default()
                .to_lowercase(),
            poll_interval_secs: parse_env("POLL_INTERVAL_SECS", 15)?,
            rate_api_url: env_or("RATE_API_URL", "https://api.coingecko.com"),
            rate_asset_id: std::env::var("RATE_ASSET_ID").unwrap_or_default(),
            rate_refresh_secs: parse_env("RATE_REFRESH_SECS", 30)?,
            fallback_rate: parse_decimal_env("FALLBACK_RATE", "0.0087")?,
            fiat_currency: env_or("FIAT_CURRENCY", "eur"),
            fee_percent: parse_decimal_env("FEE_PERCENT", "2.5")?,
            min_session_amount: parse_decimal_env("MIN_SESSION_AMOUNT", "10")?,
            max_session_amount: parse_decimal_env("MAX_SESSION_AMOUNT", "250000")?,
            min_transfer_amount: parse_decimal_env("MIN_TRANSFER_AMOUNT", "1")?,
            match_tolerance: parse_decimal_env("MATCH_TOLERANCE", "0.1")?,
            session_ttl_secs: parse_env("SESSION_TTL_SECS", 3600)?,
            processed_retention_days: parse_env("PROCESSED_RETENTION_DAYS", 30)?,
            max_payout_retries: parse_env("MAX_PAYOUT_RETRIES", 5)?,
            worker_poll_secs: parse_env("WORKER_POLL_SECS", 1)?,
            stripe_secret_key: std::env::var("STRIPE_SECRET_KEY").unwrap_or_default(),
            stripe_webhook_secret: std::env::var("STRIPE_WEBHOOK_SECRET").ok(),
            chain_webhook_secret: std::env::var("CHAIN_WEBHOOK_SECRET").ok(),
            http_timeout_secs: parse_env("HTTP_TIMEOUT_SECS", 15)?,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: FromStr>(key: &str, default: T) -> AppResult<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| AppError::Config(format!("Invalid value for {}: {}", key, raw))),
        Err(_) => Ok(default),
    }
}

fn parse_decimal_env(key: &str, default: &str) -> AppResult<Decimal> {
    let raw = env_or(key, default);
    Decimal::from_str(&raw)
        .map_err(|_| AppError::Config(format!("Invalid decimal for {}: {}", key, raw)))
}
