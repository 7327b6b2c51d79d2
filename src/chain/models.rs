use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A token transfer into the service wallet, observed on chain
///
/// `amount` is already normalized from the raw integer value by the token's
/// decimal precision. Delivery is at-least-once; the reconciler deduplicates
/// by `tx_hash`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferEvent {
    pub tx_hash: String,
    pub from: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub block_height: u64,
}
