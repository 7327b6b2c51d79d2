pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::chain::models::TransferEvent;
use crate::error::AppResult;
use crate::payout::models::{DeadLetteredJob, PayoutJob};
use crate::session::models::Session;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Durable state shared by the pipeline: sessions, the processed-transfer
/// set, the chain cursor, the payout FIFO and the dead-letter list.
///
/// INVARIANTS:
/// - Every operation is single-key atomic; no multi-key transactions are
///   assumed by callers.
/// - `mark_matched` / `mark_paid` are compare-and-swap transitions on the
///   expected prior status and fail loudly when it does not hold.
/// - `mark_processed` is insert-if-absent; the first caller wins.
#[async_trait]
pub trait Store: Send + Sync {
    // ---- sessions ----

    async fn insert_session(&self, session: &Session) -> AppResult<()>;

    async fn get_session(&self, id: Uuid) -> AppResult<Option<Session>>;

    /// Oldest waiting, unexpired session whose `token_amount` is within
    /// `tolerance` of `amount` (strict), if any.
    async fn find_active_match(
        &self,
        amount: Decimal,
        tolerance: Decimal,
    ) -> AppResult<Option<Session>>;

    /// waiting_transfer -> matched, recording the observed transfer.
    /// Errors with `SessionError::InvalidState` if the session is not
    /// currently waiting.
    async fn mark_matched(&self, id: Uuid, event: &TransferEvent) -> AppResult<Session>;

    /// matched -> paid, recording the processor transfer reference.
    /// Errors with `SessionError::InvalidState` if the session is not
    /// currently matched.
    async fn mark_paid(&self, id: Uuid, transfer_id: &str) -> AppResult<Session>;

    /// Mark waiting sessions past their TTL as expired; returns how many.
    async fn expire_stale_sessions(&self) -> AppResult<u64>;

    // ---- processed-transfer set ----

    /// Record a transaction hash as processed. Returns true if this call
    /// inserted it, false if it was already present.
    async fn mark_processed(&self, tx_hash: &str) -> AppResult<bool>;

    /// Drop processed markers past their retention window; returns how many.
    async fn prune_processed(&self) -> AppResult<u64>;

    // ---- chain cursor ----

    async fn load_cursor(&self) -> AppResult<Option<u64>>;

    /// Persist the cursor. Never rewinds: a height below the stored one is
    /// ignored.
    async fn store_cursor(&self, height: u64) -> AppResult<()>;

    // ---- payout queue ----

    async fn push_job(&self, job: &PayoutJob) -> AppResult<()>;

    /// Atomically take the oldest job, if any.
    async fn pop_job(&self) -> AppResult<Option<PayoutJob>>;

    async fn queue_depth(&self) -> AppResult<u64>;

    // ---- dead letters ----

    async fn push_dead_letter(&self, job: &PayoutJob, last_error: &str) -> AppResult<()>;

    async fn dead_letters(&self) -> AppResult<Vec<DeadLetteredJob>>;
}
