pub mod models;
pub mod provider;
pub mod worker;

pub use models::{DeadLetteredJob, PayoutJob};
pub use provider::{PayoutProvider, StripeClient};
pub use worker::{PayoutWorker, WorkOutcome};
