use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::session::models::{Session, SessionStatus};

/// POST /api/v1/session
#[derive(Debug, Deserialize, Validate)]
pub struct CreateSessionRequest {
    pub token_amount: Decimal,
    #[validate(length(min = 1, max = 128))]
    pub payout_destination: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: Uuid,
    /// Where the seller sends the tokens
    pub deposit_address: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub token_amount: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub fiat_net: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub fee_percent: Decimal,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct SessionStatusResponse {
    pub session_id: Uuid,
    pub status: SessionStatus,
    #[serde(with = "rust_decimal::serde::float")]
    pub token_amount: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub fiat_net: Decimal,
    pub created_at: DateTime<Utc>,
    pub matched_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer_id: Option<String>,
}

impl From<Session> for SessionStatusResponse {
    fn from(session: Session) -> Self {
        Self {
            session_id: session.id,
            status: session.status,
            token_amount: session.token_amount,
            fiat_net: session.fiat_net,
            created_at: session.created_at,
            matched_at: session.matched_at,
            paid_at: session.paid_at,
            tx_hash: session.tx_hash,
            transfer_id: session.transfer_id,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RateResponse {
    #[serde(with = "rust_decimal::serde::float")]
    pub rate: Decimal,
    pub currency: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub queue_depth: u64,
}

/// Mined-transaction push payload from the chain monitoring provider
#[derive(Debug, Deserialize)]
pub struct ChainWebhookPayload {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub event: Option<WebhookEvent>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub data: Option<WebhookData>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookData {
    pub block: Option<WebhookBlock>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookBlock {
    pub number: Option<String>,
    #[serde(default)]
    pub transactions: Vec<WebhookTransaction>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookTransaction {
    pub hash: String,
    pub from: Option<String>,
    pub to: Option<String>,
    pub input: Option<String>,
    #[serde(rename = "blockNumber")]
    pub block_number: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub accepted: bool,
    pub events: usize,
    pub message: String,
}
