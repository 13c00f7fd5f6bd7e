use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::ledger::client::LedgerClient;
use crate::ledger::settlement::SettlementLedger;
use crate::payments::models::{DepositRecord, DepositStatus};
use crate::payments::repository::DepositRepository;

/// Terms of one confirmed deposit, as reported by the marketplace.
#[derive(Debug, Clone)]
pub struct DepositTerms {
    pub deposit_tx_hash: String,
    pub buyer_wallet: String,
    pub seller_wallet: String,
    pub listing_id: String,
    /// Escrowed amount in drops.
    pub deposit_amount: u64,
    /// Price of one billable call in drops.
    pub price_per_call: u64,
    pub expires_in_hours: Option<i64>,
}

/// Correlates a confirmed deposit transaction with listing terms and opens
/// the logical payment for it. Registration is idempotent on the tx hash:
/// a duplicate replays the original record instead of failing the caller.
pub struct DepositRegistrar {
    ledger: Arc<SettlementLedger>,
    client: Arc<dyn LedgerClient>,
    deposits: Arc<DepositRepository>,
    default_expiry_hours: i64,
}

impl DepositRegistrar {
    pub fn new(
        ledger: Arc<SettlementLedger>,
        client: Arc<dyn LedgerClient>,
        deposits: Arc<DepositRepository>,
        default_expiry_hours: i64,
    ) -> Self {
        Self {
            ledger,
            client,
            deposits,
            default_expiry_hours,
        }
    }

    pub async fn register(&self, terms: DepositTerms) -> AppResult<DepositRecord> {
        // Serialize per tx hash: the replay check and the insert below are
        // one unit, so concurrent duplicates observe the first writer.
        let reg_lock = self.deposits.registration_lock(&terms.deposit_tx_hash);
        let _guard = reg_lock.lock().await;

        if let Some(existing) = self.deposits.get_by_tx_hash(&terms.deposit_tx_hash).await {
            info!(
                "↩ deposit {} already registered, replaying record",
                terms.deposit_tx_hash
            );
            return Ok(existing);
        }

        if terms.deposit_amount == 0 {
            return Err(AppError::Validation("deposit amount must be positive".into()));
        }
        if terms.price_per_call == 0 {
            return Err(AppError::Validation("price per call must be positive".into()));
        }
        let hours = terms.expires_in_hours.unwrap_or(self.default_expiry_hours);
        if hours <= 0 {
            return Err(AppError::Validation(format!(
                "expiry must be positive, got {} hours",
                hours
            )));
        }

        // The ledger client is the authority on whether the deposit really
        // happened; we trust its answer and do not re-derive amounts.
        if !self.client.verify_deposit(&terms.deposit_tx_hash).await? {
            return Err(AppError::Validation(format!(
                "deposit transaction {} is not validated on the ledger",
                terms.deposit_tx_hash
            )));
        }

        // Open the escrow payment first; AlreadyActive propagates untouched.
        self.ledger
            .deposit(
                &terms.buyer_wallet,
                &terms.listing_id,
                &terms.seller_wallet,
                terms.price_per_call,
                terms.deposit_amount,
            )
            .await?;

        let now = Utc::now();
        let record = DepositRecord {
            id: Uuid::new_v4(),
            listing_id: terms.listing_id,
            buyer_wallet: terms.buyer_wallet,
            seller_wallet: terms.seller_wallet,
            deposit_tx_hash: terms.deposit_tx_hash,
            deposit_amount: terms.deposit_amount,
            price_per_call: terms.price_per_call,
            expires_at: now + chrono::Duration::hours(hours),
            status: DepositStatus::Open,
            created_at: now,
        };
        self.deposits.insert(record.clone()).await;

        info!(
            "💰 deposit {} registered: {} drops for {} (expires {})",
            record.deposit_tx_hash, record.deposit_amount, record.listing_id, record.expires_at
        );
        Ok(record)
    }
}
