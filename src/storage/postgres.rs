use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::chain::models::TransferEvent;
use crate::error::{AppResult, SessionError};
use crate::payout::models::{DeadLetteredJob, PayoutJob};
use crate::session::models::{Session, SessionStatus};
use crate::storage::Store;

/// Postgres store backend - the source of truth in production
///
/// All mutations are single statements; the CAS transitions use conditional
/// UPDATEs and the queue pop uses delete-returning with SKIP LOCKED, so no
/// explicit transactions are needed.
pub struct PgStore {
    pool: PgPool,
    processed_retention: Duration,
}

impl PgStore {
    pub fn new(pool: PgPool, processed_retention: Duration) -> Self {
        Self {
            pool,
            processed_retention,
        }
    }
}

const SESSION_COLUMNS: &str = "id, token_amount, fiat_net, payout_destination, status, \
     created_at, expires_at, matched_at, paid_at, observed_from, tx_hash, transfer_id";

#[async_trait]
impl Store for PgStore {
    async fn insert_session(&self, session: &Session) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions
                (id, token_amount, fiat_net, payout_destination, status,
                 created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(session.id)
        .bind(session.token_amount)
        .bind(session.fiat_net)
        .bind(&session.payout_destination)
        .bind(session.status)
        .bind(session.created_at)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> AppResult<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(&format!(
            "SELECT {} FROM sessions WHERE id = $1",
            SESSION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    async fn find_active_match(
        &self,
        amount: Decimal,
        tolerance: Decimal,
    ) -> AppResult<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(&format!(
            r#"
            SELECT {}
            FROM sessions
            WHERE status = 'waiting_transfer'
              AND expires_at > now()
              AND abs(token_amount - $1) < $2
            ORDER BY created_at ASC
            LIMIT 1
            "#,
            SESSION_COLUMNS
        ))
        .bind(amount)
        .bind(tolerance)
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    async fn mark_matched(&self, id: Uuid, event: &TransferEvent) -> AppResult<Session> {
        let session = sqlx::query_as::<_, Session>(&format!(
            r#"
            UPDATE sessions
            SET status = 'matched',
                matched_at = now(),
                observed_from = $2,
                tx_hash = $3
            WHERE id = $1 AND status = 'waiting_transfer'
            RETURNING {}
            "#,
            SESSION_COLUMNS
        ))
        .bind(id)
        .bind(&event.from)
        .bind(&event.tx_hash)
        .fetch_optional(&self.pool)
        .await?;

        session.ok_or_else(|| {
            SessionError::InvalidState {
                current: "not waiting_transfer".to_string(),
                expected: SessionStatus::WaitingTransfer.to_string(),
            }
            .into()
        })
    }

    async fn mark_paid(&self, id: Uuid, transfer_id: &str) -> AppResult<Session> {
        let session = sqlx::query_as::<_, Session>(&format!(
            r#"
            UPDATE sessions
            SET status = 'paid',
                paid_at = now(),
                transfer_id = $2
            WHERE id = $1 AND status = 'matched'
            RETURNING {}
            "#,
            SESSION_COLUMNS
        ))
        .bind(id)
        .bind(transfer_id)
        .fetch_optional(&self.pool)
        .await?;

        session.ok_or_else(|| {
            SessionError::InvalidState {
                current: "not matched".to_string(),
                expected: SessionStatus::Matched.to_string(),
            }
            .into()
        })
    }

    async fn expire_stale_sessions(&self) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET status = 'expired'
            WHERE status = 'waiting_transfer' AND expires_at <= now()
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn mark_processed(&self, tx_hash: &str) -> AppResult<bool> {
        let expires_at = Utc::now() + self.processed_retention;
        let result = sqlx::query(
            r#"
            INSERT INTO processed_transfers (tx_hash, expires_at)
            VALUES ($1, $2)
            ON CONFLICT (tx_hash) DO NOTHING
            "#,
        )
        .bind(tx_hash)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn prune_processed(&self) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM processed_transfers WHERE expires_at <= now()")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn load_cursor(&self) -> AppResult<Option<u64>> {
        let row = sqlx::query("SELECT height FROM chain_cursor WHERE id = true")
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.get::<i64, _>("height") as u64))
    }

    async fn store_cursor(&self, height: u64) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO chain_cursor (id, height)
            VALUES (true, $1)
            ON CONFLICT (id)
            DO UPDATE SET height = GREATEST(chain_cursor.height, EXCLUDED.height)
            "#,
        )
        .bind(height as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn push_job(&self, job: &PayoutJob) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payout_jobs
                (session_id, token_amount, fiat_net, payout_destination,
                 tx_hash, retry_count)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(job.session_id)
        .bind(job.token_amount)
        .bind(job.fiat_net)
        .bind(&job.payout_destination)
        .bind(&job.tx_hash)
        .bind(job.retry_count as i32)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn pop_job(&self) -> AppResult<Option<PayoutJob>> {
        // Atomic take of the queue head; SKIP LOCKED keeps concurrent
        // consumers from double-popping.
        let row = sqlx::query(
            r#"
            DELETE FROM payout_jobs
            WHERE id = (
                SELECT id FROM payout_jobs
                ORDER BY id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING session_id, token_amount, fiat_net, payout_destination,
                      tx_hash, retry_count
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| PayoutJob {
            session_id: r.get("session_id"),
            token_amount: r.get("token_amount"),
            fiat_net: r.get("fiat_net"),
            payout_destination: r.get("payout_destination"),
            tx_hash: r.get("tx_hash"),
            retry_count: r.get::<i32, _>("retry_count") as u32,
        }))
    }

    async fn queue_depth(&self) -> AppResult<u64> {
        let row = sqlx::query("SELECT count(*) AS depth FROM payout_jobs")
            .fetch_one(&self.pool)
            .await?;

        Ok(row.get::<i64, _>("depth") as u64)
    }

    async fn push_dead_letter(&self, job: &PayoutJob, last_error: &str) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO failed_payouts
                (session_id, token_amount, fiat_net, payout_destination,
                 tx_hash, retry_count, last_error, failed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, now())
            "#,
        )
        .bind(job.session_id)
        .bind(job.token_amount)
        .bind(job.fiat_net)
        .bind(&job.payout_destination)
        .bind(&job.tx_hash)
        .bind(job.retry_count as i32)
        .bind(last_error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn dead_letters(&self) -> AppResult<Vec<DeadLetteredJob>> {
        let rows = sqlx::query(
            r#"
            SELECT session_id, token_amount, fiat_net, payout_destination,
                   tx_hash, retry_count, last_error, failed_at
            FROM failed_payouts
            ORDER BY failed_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| DeadLetteredJob {
                job: PayoutJob {
                    session_id: r.get("session_id"),
                    token_amount: r.get("token_amount"),
                    fiat_net: r.get("fiat_net"),
                    payout_destination: r.get("payout_destination"),
                    tx_hash: r.get("tx_hash"),
                    retry_count: r.get::<i32, _>("retry_count") as u32,
                },
                last_error: r.get("last_error"),
                failed_at: r.get("failed_at"),
            })
            .collect())
    }
}
