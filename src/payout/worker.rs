use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::AppResult;
use crate::payout::provider::PayoutProvider;
use crate::storage::Store;

/// What one worker iteration did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkOutcome {
    /// Queue was empty
    Idle,
    /// Payout succeeded and the session was marked paid
    Paid(Uuid),
    /// Payout failed; job re-pushed with an incremented retry count
    Requeued(u32),
    /// Retry budget exhausted; job moved to the dead-letter list
    DeadLettered,
}

/// Consumes payout jobs and drives them to completion
///
/// One logical consumer. Duplicating it horizontally is safe only because
/// the provider call carries the tx hash as its idempotency key.
pub struct PayoutWorker {
    store: Arc<dyn Store>,
    provider: Arc<dyn PayoutProvider>,
    currency: String,
    max_retries: u32,
    poll_interval: Duration,
}

impl PayoutWorker {
    pub fn new(
        store: Arc<dyn Store>,
        provider: Arc<dyn PayoutProvider>,
        currency: &str,
        max_retries: u32,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            provider,
            currency: currency.to_string(),
            max_retries,
            poll_interval,
        }
    }

    /// Pop and process a single job, if one is queued
    pub async fn run_once(&self) -> AppResult<WorkOutcome> {
        let Some(mut job) = self.store.pop_job().await? else {
            return Ok(WorkOutcome::Idle);
        };

        match self
            .provider
            .pay(
                job.fiat_net,
                &self.currency,
                &job.payout_destination,
                &job.tx_hash,
            )
            .await
        {
            Ok(transfer_id) => {
                if let Err(e) = self.store.mark_paid(job.session_id, &transfer_id).await {
                    // The money moved; the session record disagrees. This is
                    // an integrity anomaly for an operator, never a reason
                    // to pay again.
                    error!(
                        "Payout {} sent but session {} could not be marked paid: {}",
                        transfer_id, job.session_id, e
                    );
                }
                Ok(WorkOutcome::Paid(job.session_id))
            }
            Err(e) => {
                job.retry_count += 1;
                if job.retry_count <= self.max_retries {
                    warn!(
                        "Payout for session {} failed (attempt {}), re-queueing: {}",
                        job.session_id, job.retry_count, e
                    );
                    self.store.push_job(&job).await?;
                    Ok(WorkOutcome::Requeued(job.retry_count))
                } else {
                    error!(
                        "ALERT: payout for session {} dead-lettered after {} attempts: {}",
                        job.session_id, job.retry_count, e
                    );
                    self.store.push_dead_letter(&job, &e.to_string()).await?;
                    Ok(WorkOutcome::DeadLettered)
                }
            }
        }
    }

    /// Start the consumer loop (runs in background)
    ///
    /// Job failures are handled inside `run_once`; only store failures reach
    /// the loop, which backs off and keeps going. If the task itself ever
    /// ends, the supervisor in bootstrap exits the process.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        info!("Payout worker started, waiting on queue");

        tokio::spawn(async move {
            let mut backoff_ms: u64 = 1_000;
            loop {
                match self.run_once().await {
                    Ok(WorkOutcome::Idle) => {
                        backoff_ms = 1_000;
                        sleep(self.poll_interval).await;
                    }
                    Ok(_) => {
                        backoff_ms = 1_000;
                    }
                    Err(e) => {
                        error!("Payout worker store error, backing off: {}", e);
                        sleep(Duration::from_millis(backoff_ms)).await;
                        backoff_ms = (backoff_ms * 2).min(60_000); // Cap at 60 seconds
                    }
                }
            }
        })
    }
}
