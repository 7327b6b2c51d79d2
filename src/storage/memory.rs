use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::chain::models::TransferEvent;
use crate::error::{AppResult, SessionError};
use crate::payout::models::{DeadLetteredJob, PayoutJob};
use crate::session::models::{Session, SessionStatus};
use crate::storage::Store;

/// In-memory store backend
///
/// Backs local development and the test harness. State does not survive a
/// restart, so production deployments use the Postgres backend.
pub struct MemoryStore {
    inner: RwLock<Inner>,
    processed_retention: Duration,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<Uuid, Session>,
    /// tx_hash -> marker expiry
    processed: HashMap<String, chrono::DateTime<Utc>>,
    cursor: Option<u64>,
    queue: VecDeque<PayoutJob>,
    dead: Vec<DeadLetteredJob>,
}

impl MemoryStore {
    pub fn new(processed_retention: Duration) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            processed_retention,
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_session(&self, session: &Session) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        inner.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> AppResult<Option<Session>> {
        let inner = self.inner.read().await;
        Ok(inner.sessions.get(&id).cloned())
    }

    async fn find_active_match(
        &self,
        amount: Decimal,
        tolerance: Decimal,
    ) -> AppResult<Option<Session>> {
        let now = Utc::now();
        let inner = self.inner.read().await;
        let found = inner
            .sessions
            .values()
            .filter(|s| s.is_active(now))
            .filter(|s| (s.token_amount - amount).abs() < tolerance)
            .min_by_key(|s| s.created_at)
            .cloned();
        Ok(found)
    }

    async fn mark_matched(&self, id: Uuid, event: &TransferEvent) -> AppResult<Session> {
        let mut inner = self.inner.write().await;
        let session = inner
            .sessions
            .get_mut(&id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;

        if session.status != SessionStatus::WaitingTransfer {
            return Err(SessionError::InvalidState {
                current: session.status.to_string(),
                expected: SessionStatus::WaitingTransfer.to_string(),
            }
            .into());
        }

        session.status = SessionStatus::Matched;
        session.matched_at = Some(Utc::now());
        session.observed_from = Some(event.from.clone());
        session.tx_hash = Some(event.tx_hash.clone());
        Ok(session.clone())
    }

    async fn mark_paid(&self, id: Uuid, transfer_id: &str) -> AppResult<Session> {
        let mut inner = self.inner.write().await;
        let session = inner
            .sessions
            .get_mut(&id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;

        if session.status != SessionStatus::Matched {
            return Err(SessionError::InvalidState {
                current: session.status.to_string(),
                expected: SessionStatus::Matched.to_string(),
            }
            .into());
        }

        session.status = SessionStatus::Paid;
        session.paid_at = Some(Utc::now());
        session.transfer_id = Some(transfer_id.to_string());
        Ok(session.clone())
    }

    async fn expire_stale_sessions(&self) -> AppResult<u64> {
        let now = Utc::now();
        let mut inner = self.inner.write().await;
        let mut expired = 0;
        for session in inner.sessions.values_mut() {
            if session.status == SessionStatus::WaitingTransfer && session.expires_at <= now {
                session.status = SessionStatus::Expired;
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn mark_processed(&self, tx_hash: &str) -> AppResult<bool> {
        let mut inner = self.inner.write().await;
        if inner.processed.contains_key(tx_hash) {
            return Ok(false);
        }
        let expiry = Utc::now() + self.processed_retention;
        inner.processed.insert(tx_hash.to_string(), expiry);
        Ok(true)
    }

    async fn prune_processed(&self) -> AppResult<u64> {
        let now = Utc::now();
        let mut inner = self.inner.write().await;
        let before = inner.processed.len();
        inner.processed.retain(|_, expiry| *expiry > now);
        Ok((before - inner.processed.len()) as u64)
    }

    async fn load_cursor(&self) -> AppResult<Option<u64>> {
        let inner = self.inner.read().await;
        Ok(inner.cursor)
    }

    async fn store_cursor(&self, height: u64) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        if inner.cursor.map_or(true, |current| height > current) {
            inner.cursor = Some(height);
        }
        Ok(())
    }

    async fn push_job(&self, job: &PayoutJob) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        inner.queue.push_back(job.clone());
        Ok(())
    }

    async fn pop_job(&self) -> AppResult<Option<PayoutJob>> {
        let mut inner = self.inner.write().await;
        Ok(inner.queue.pop_front())
    }

    async fn queue_depth(&self) -> AppResult<u64> {
        let inner = self.inner.read().await;
        Ok(inner.queue.len() as u64)
    }

    async fn push_dead_letter(&self, job: &PayoutJob, last_error: &str) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        inner.dead.push(DeadLetteredJob {
            job: job.clone(),
            last_error: last_error.to_string(),
            failed_at: Utc::now(),
        });
        Ok(())
    }

    async fn dead_letters(&self) -> AppResult<Vec<DeadLetteredJob>> {
        let inner = self.inner.read().await;
        Ok(inner.dead.clone())
    }
}
