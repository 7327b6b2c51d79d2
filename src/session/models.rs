use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use sqlx::Type;
use std::fmt;
use uuid::Uuid;

/// Session status enum
///
/// INVARIANT: transitions are forward-only:
/// waiting_transfer -> matched -> paid, or waiting_transfer -> expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "session_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    WaitingTransfer,
    Matched,
    Paid,
    Expired,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::WaitingTransfer => "waiting_transfer",
            SessionStatus::Matched => "matched",
            SessionStatus::Paid => "paid",
            SessionStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Sell session entity - a request to sell tokens for fiat
///
/// `fiat_net` is computed once at creation from the cached rate and the fee
/// and is never recomputed afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub id: Uuid,

    #[serde(with = "rust_decimal::serde::float")]
    pub token_amount: Decimal,

    /// Fiat owed to the seller after fee deduction, frozen at creation
    #[serde(with = "rust_decimal::serde::float")]
    pub fiat_net: Decimal,

    /// Opaque payout destination at the payment processor
    pub payout_destination: String,

    pub status: SessionStatus,

    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub matched_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,

    /// Sender address of the matched on-chain transfer
    pub observed_from: Option<String>,
    /// Transaction hash of the matched transfer; at most one, ever
    pub tx_hash: Option<String>,
    /// Processor payout reference, set when paid
    pub transfer_id: Option<String>,
}

impl Session {
    /// Still eligible for matching: waiting and not past its TTL
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status == SessionStatus::WaitingTransfer && self.expires_at > now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn session(status: SessionStatus, expires_at: DateTime<Utc>) -> Session {
        Session {
            id: Uuid::new_v4(),
            token_amount: dec!(10),
            fiat_net: dec!(0.0975),
            payout_destination: "acct_123".to_string(),
            status,
            created_at: Utc::now(),
            expires_at,
            matched_at: None,
            paid_at: None,
            observed_from: None,
            tx_hash: None,
            transfer_id: None,
        }
    }

    #[test]
    fn test_waiting_unexpired_is_active() {
        let s = session(
            SessionStatus::WaitingTransfer,
            Utc::now() + chrono::Duration::hours(1),
        );
        assert!(s.is_active(Utc::now()));
    }

    #[test]
    fn test_expired_or_progressed_is_inactive() {
        let past = Utc::now() - chrono::Duration::seconds(1);
        let future = Utc::now() + chrono::Duration::hours(1);

        assert!(!session(SessionStatus::WaitingTransfer, past).is_active(Utc::now()));
        assert!(!session(SessionStatus::Matched, future).is_active(Utc::now()));
        assert!(!session(SessionStatus::Paid, future).is_active(Utc::now()));
    }
}
