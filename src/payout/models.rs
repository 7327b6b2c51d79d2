use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unit of payout work queued for the worker
///
/// Carries everything the payout call needs so the worker never has to read
/// the session back before paying. `fiat_net` is the session's frozen value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutJob {
    pub session_id: Uuid,
    #[serde(with = "rust_decimal::serde::float")]
    pub token_amount: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub fiat_net: Decimal,
    pub payout_destination: String,
    pub tx_hash: String,
    pub retry_count: u32,
}

/// A job removed from active retry after exhausting its budget
///
/// Retained for manual inspection, never silently dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetteredJob {
    pub job: PayoutJob,
    pub last_error: String,
    pub failed_at: DateTime<Utc>,
}
