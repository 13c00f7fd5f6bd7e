use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Deposit record status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DepositStatus {
    Open,
    Settled,
    Refunded,
}

/// Off-chain shadow of a payment's terms, created when a deposit is
/// confirmed. Records are kept forever for audit; refund/settlement only
/// flips the status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositRecord {
    pub id: Uuid,
    pub listing_id: String,
    pub buyer_wallet: String,
    pub seller_wallet: String,
    /// Ledger transaction that funded the escrow. Registered at most once.
    pub deposit_tx_hash: String,
    /// Escrowed amount in drops.
    pub deposit_amount: u64,
    /// Price of one billable call in drops.
    pub price_per_call: u64,
    pub expires_at: DateTime<Utc>,
    pub status: DepositStatus,
    pub created_at: DateTime<Utc>,
}

impl DepositRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Usage log status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UsageStatus {
    /// The full requested amount was released.
    Released,
    /// The release was clamped to the remaining balance; the payment drained.
    PartiallyReleased,
    /// The payment was already settled; nothing was released. Callers should
    /// stop reporting against this key.
    Exhausted,
}

/// One row per processed usage report, keyed by the caller-supplied
/// idempotency key. Immutable once written: a replayed report returns this
/// row instead of touching the ledger again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageLog {
    pub idempotency_key: String,
    pub listing_id: String,
    pub buyer_wallet: String,
    pub calls_reported: u64,
    /// Amount actually released in drops (may be clamped, may be zero).
    pub amount_released: u64,
    pub status: UsageStatus,
    pub reported_at: DateTime<Utc>,
}
