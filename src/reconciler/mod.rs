use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chain::models::TransferEvent;
use crate::error::{AppError, AppResult, SessionError};
use crate::payout::models::PayoutJob;
use crate::storage::Store;

/// What handling one transfer event amounted to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Below the minimum transfer amount; ignored
    Dust,
    /// Transaction hash already processed; discarded
    Duplicate,
    /// Claimed a session and enqueued a payout job
    Matched(Uuid),
    /// No session wanted this transfer; operational anomaly
    Unmatched,
}

/// Correlates observed transfers with waiting sessions
///
/// Delivery is at-least-once, so the processed-set insert happens before any
/// matching (write-before-act): of N concurrent deliveries of one hash,
/// exactly one proceeds past step two.
pub struct Reconciler {
    store: Arc<dyn Store>,
    min_transfer_amount: Decimal,
    match_tolerance: Decimal,
}

impl Reconciler {
    pub fn new(store: Arc<dyn Store>, min_transfer_amount: Decimal, match_tolerance: Decimal) -> Self {
        Self {
            store,
            min_transfer_amount,
            match_tolerance,
        }
    }

    pub async fn handle(&self, event: &TransferEvent) -> AppResult<ReconcileOutcome> {
        if event.amount < self.min_transfer_amount {
            debug!(
                "Ignoring dust transfer {} of {} from {}",
                event.tx_hash, event.amount, event.from
            );
            return Ok(ReconcileOutcome::Dust);
        }

        if !self.store.mark_processed(&event.tx_hash).await? {
            debug!("Transfer {} already processed, discarding", event.tx_hash);
            return Ok(ReconcileOutcome::Duplicate);
        }

        // Claim loop: finding and claiming are separate steps, so a
        // concurrent claim of the same candidate loses the CAS and retries
        // against the next one. Terminates because every lost race means
        // some session left waiting_transfer.
        loop {
            let candidate = match self
                .store
                .find_active_match(event.amount, self.match_tolerance)
                .await?
            {
                Some(session) => session,
                None => {
                    warn!(
                        "Unmatched transfer {}: {} tokens from {} at block {} - needs manual reconciliation",
                        event.tx_hash, event.amount, event.from, event.block_height
                    );
                    return Ok(ReconcileOutcome::Unmatched);
                }
            };

            match self.store.mark_matched(candidate.id, event).await {
                Ok(session) => {
                    let job = PayoutJob {
                        session_id: session.id,
                        token_amount: session.token_amount,
                        fiat_net: session.fiat_net,
                        payout_destination: session.payout_destination.clone(),
                        tx_hash: event.tx_hash.clone(),
                        retry_count: 0,
                    };
                    self.store.push_job(&job).await?;

                    info!(
                        "Matched transfer {} ({} tokens) to session {} - payout of {} queued",
                        event.tx_hash, event.amount, session.id, session.fiat_net
                    );
                    return Ok(ReconcileOutcome::Matched(session.id));
                }
                Err(AppError::Session(SessionError::InvalidState { .. })) => {
                    debug!(
                        "Lost claim race for session {}, retrying match",
                        candidate.id
                    );
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::models::{Session, SessionStatus};
    use crate::storage::MemoryStore;
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;

    fn store() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::new(Duration::days(30)))
    }

    fn reconciler(store: Arc<MemoryStore>) -> Reconciler {
        Reconciler::new(store, dec!(1), dec!(0.1))
    }

    fn waiting_session(token_amount: Decimal) -> Session {
        let now = Utc::now();
        Session {
            id: Uuid::new_v4(),
            token_amount,
            fiat_net: token_amount * dec!(0.01) * dec!(0.975),
            payout_destination: "acct_test".to_string(),
            status: SessionStatus::WaitingTransfer,
            created_at: now,
            expires_at: now + Duration::hours(1),
            matched_at: None,
            paid_at: None,
            observed_from: None,
            tx_hash: None,
            transfer_id: None,
        }
    }

    fn event(tx_hash: &str, amount: Decimal) -> TransferEvent {
        TransferEvent {
            tx_hash: tx_hash.to_string(),
            from: "0xseller".to_string(),
            amount,
            block_height: 1000,
        }
    }

    #[tokio::test]
    async fn test_repeated_delivery_yields_one_job_and_one_match() {
        let store = store();
        let reconciler = reconciler(store.clone());
        let session = waiting_session(dec!(10));
        store.insert_session(&session).await.unwrap();

        let ev = event("0xdead", dec!(10));
        let first = reconciler.handle(&ev).await.unwrap();
        assert_eq!(first, ReconcileOutcome::Matched(session.id));

        for _ in 0..4 {
            assert_eq!(
                reconciler.handle(&ev).await.unwrap(),
                ReconcileOutcome::Duplicate
            );
        }

        assert_eq!(store.queue_depth().await.unwrap(), 1);
        let stored = store.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Matched);
        assert_eq!(stored.tx_hash.as_deref(), Some("0xdead"));
        assert_eq!(stored.observed_from.as_deref(), Some("0xseller"));
    }

    #[tokio::test]
    async fn test_dust_is_ignored_without_marking_processed() {
        let store = store();
        let reconciler = reconciler(store.clone());
        let session = waiting_session(dec!(10));
        store.insert_session(&session).await.unwrap();

        assert_eq!(
            reconciler.handle(&event("0x01", dec!(0.5))).await.unwrap(),
            ReconcileOutcome::Dust
        );
        assert_eq!(store.queue_depth().await.unwrap(), 0);

        // The hash was not burned by the dust rejection
        assert!(store.mark_processed("0x01").await.unwrap());
    }

    #[tokio::test]
    async fn test_unmatched_transfer_is_an_anomaly_not_a_job() {
        let store = store();
        let reconciler = reconciler(store.clone());

        assert_eq!(
            reconciler.handle(&event("0x02", dec!(7))).await.unwrap(),
            ReconcileOutcome::Unmatched
        );
        assert_eq!(store.queue_depth().await.unwrap(), 0);

        // Redelivery of the same hash is still deduplicated
        assert_eq!(
            reconciler.handle(&event("0x02", dec!(7))).await.unwrap(),
            ReconcileOutcome::Duplicate
        );
    }

    #[tokio::test]
    async fn test_tolerance_matches_exactly_one_of_two_close_sessions() {
        let store = store();
        let reconciler = reconciler(store.clone());

        let mut first = waiting_session(dec!(10.0));
        first.created_at = Utc::now() - Duration::minutes(1);
        let second = waiting_session(dec!(10.3));
        store.insert_session(&first).await.unwrap();
        store.insert_session(&second).await.unwrap();

        // 10.05 is within 0.1 of 10.0 but not of 10.3
        let outcome = reconciler.handle(&event("0x03", dec!(10.05))).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Matched(first.id));

        let untouched = store.get_session(second.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, SessionStatus::WaitingTransfer);
        assert!(untouched.tx_hash.is_none());
        assert_eq!(store.queue_depth().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_two_transfers_drain_equal_sessions_oldest_first() {
        let store = store();
        let reconciler = reconciler(store.clone());

        let mut older = waiting_session(dec!(10));
        older.created_at = Utc::now() - Duration::minutes(2);
        let newer = waiting_session(dec!(10));
        store.insert_session(&older).await.unwrap();
        store.insert_session(&newer).await.unwrap();

        let first = reconciler.handle(&event("0x0a", dec!(10))).await.unwrap();
        let second = reconciler.handle(&event("0x0b", dec!(10))).await.unwrap();

        assert_eq!(first, ReconcileOutcome::Matched(older.id));
        assert_eq!(second, ReconcileOutcome::Matched(newer.id));
        assert_eq!(store.queue_depth().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_deliveries_match_once() {
        let store = store();
        let reconciler = Arc::new(reconciler(store.clone()));
        let session = waiting_session(dec!(10));
        store.insert_session(&session).await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let r = reconciler.clone();
                tokio::spawn(async move { r.handle(&event("0xcc", dec!(10))).await.unwrap() })
            })
            .collect();

        let outcomes = futures::future::join_all(handles).await;
        let matched = outcomes
            .iter()
            .filter(|o| matches!(o.as_ref().unwrap(), ReconcileOutcome::Matched(_)))
            .count();

        assert_eq!(matched, 1);
        assert_eq!(store.queue_depth().await.unwrap(), 1);
    }
}
