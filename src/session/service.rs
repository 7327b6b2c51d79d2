use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::{AppResult, SessionError};
use crate::pricing::RateCache;
use crate::session::models::{Session, SessionStatus};
use crate::storage::Store;

/// Creates and serves sell sessions
///
/// The fiat amount is computed from the cached rate at creation time and
/// frozen; later rate movements never change what a seller is owed.
pub struct SessionService {
    store: Arc<dyn Store>,
    rates: Arc<RateCache>,
    fee_percent: Decimal,
    min_amount: Decimal,
    max_amount: Decimal,
    ttl: Duration,
}

impl SessionService {
    pub fn new(
        store: Arc<dyn Store>,
        rates: Arc<RateCache>,
        fee_percent: Decimal,
        min_amount: Decimal,
        max_amount: Decimal,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            rates,
            fee_percent,
            min_amount,
            max_amount,
            ttl,
        }
    }

    pub fn fee_percent(&self) -> Decimal {
        self.fee_percent
    }

    pub async fn create(
        &self,
        token_amount: Decimal,
        payout_destination: &str,
    ) -> AppResult<Session> {
        if token_amount < self.min_amount {
            return Err(SessionError::BelowMinimum {
                amount: token_amount.to_string(),
                minimum: self.min_amount.to_string(),
            }
            .into());
        }
        if token_amount > self.max_amount {
            return Err(SessionError::AboveMaximum {
                amount: token_amount.to_string(),
                maximum: self.max_amount.to_string(),
            }
            .into());
        }
        if payout_destination.trim().is_empty() {
            return Err(SessionError::InvalidDestination("empty".to_string()).into());
        }

        let rate = self.rates.current_rate();
        let fiat_net =
            token_amount * rate * (Decimal::ONE - self.fee_percent / Decimal::from(100));

        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4(),
            token_amount,
            fiat_net,
            payout_destination: payout_destination.to_string(),
            status: SessionStatus::WaitingTransfer,
            created_at: now,
            expires_at: now + self.ttl,
            matched_at: None,
            paid_at: None,
            observed_from: None,
            tx_hash: None,
            transfer_id: None,
        };

        self.store.insert_session(&session).await?;
        info!(
            "Session {} created: {} tokens -> {} net at rate {}",
            session.id, token_amount, fiat_net, rate
        );
        Ok(session)
    }

    pub async fn get(&self, id: Uuid) -> AppResult<Session> {
        self.store
            .get_session(id)
            .await?
            .ok_or_else(|| SessionError::NotFound(id.to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::storage::MemoryStore;
    use rust_decimal_macros::dec;

    fn service() -> SessionService {
        let store = Arc::new(MemoryStore::new(Duration::days(30)));
        let rates = Arc::new(RateCache::new(dec!(0.01)));
        SessionService::new(store, rates, dec!(2.5), dec!(10), dec!(250000), Duration::hours(1))
    }

    #[tokio::test]
    async fn test_fiat_net_is_rate_minus_fee() {
        let service = service();
        let session = service.create(dec!(10), "acct_seller").await.unwrap();

        // 10 * 0.01 * 0.975
        assert_eq!(session.fiat_net, dec!(0.0975));
        assert_eq!(session.status, SessionStatus::WaitingTransfer);
        assert!(session.expires_at > session.created_at);
    }

    #[tokio::test]
    async fn test_amount_bounds_are_enforced() {
        let service = service();

        let too_small = service.create(dec!(9.99), "acct_seller").await;
        assert!(matches!(
            too_small,
            Err(AppError::Session(SessionError::BelowMinimum { .. }))
        ));

        let too_large = service.create(dec!(250001), "acct_seller").await;
        assert!(matches!(
            too_large,
            Err(AppError::Session(SessionError::AboveMaximum { .. }))
        ));
    }

    #[tokio::test]
    async fn test_destination_must_not_be_blank() {
        let service = service();
        let result = service.create(dec!(10), "   ").await;
        assert!(matches!(
            result,
            Err(AppError::Session(SessionError::InvalidDestination(_)))
        ));
    }

    #[tokio::test]
    async fn test_get_unknown_session_is_not_found() {
        let service = service();
        let result = service.get(Uuid::new_v4()).await;
        assert!(matches!(
            result,
            Err(AppError::Session(SessionError::NotFound(_)))
        ));
    }
}
