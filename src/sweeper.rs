// Expiry sweeper - reclaims funds from expired, still-open deposits.
//
// Expiry on its own only makes a payment *eligible* for an admin refund;
// the escrow core never acts on a timer. This task is the scheduled actor
// that walks eligible deposits and refunds them through the coordinator.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{error, info};

use crate::payments::repository::DepositRepository;
use crate::refunds::coordinator::RefundCoordinator;

pub struct ExpirySweeper {
    refunds: Arc<RefundCoordinator>,
    deposits: Arc<DepositRepository>,
    interval_secs: u64,
}

impl ExpirySweeper {
    pub fn new(
        refunds: Arc<RefundCoordinator>,
        deposits: Arc<DepositRepository>,
        interval_secs: u64,
    ) -> Self {
        Self {
            refunds,
            deposits,
            interval_secs,
        }
    }

    /// Run the sweep loop in the background.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(self.interval_secs));
            // the first tick fires immediately; skip it so startup stays quiet
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let swept = self.sweep_once().await;
                if swept > 0 {
                    info!("🗑️  reclaimed {} expired deposits", swept);
                }
            }
        })
    }

    /// One pass: refund every Open deposit past its expiry. Returns how many
    /// deposits actually had funds reclaimed.
    pub async fn sweep_once(&self) -> usize {
        let candidates = self.deposits.expired_open(Utc::now()).await;
        let mut swept = 0;

        for record in candidates {
            match self
                .refunds
                .refund_unused(&record.listing_id, &record.buyer_wallet)
                .await
            {
                // settled in the meantime; the coordinator fixed the record
                Ok(0) => {}
                Ok(amount) => {
                    info!(
                        "⏰ swept expired deposit {}: {} drops back to {}",
                        record.deposit_tx_hash, amount, record.buyer_wallet
                    );
                    swept += 1;
                }
                Err(e) => {
                    error!(
                        "failed to sweep expired deposit {}: {:?}",
                        record.deposit_tx_hash, e
                    );
                }
            }
        }

        swept
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::ledger::client::testing::MockLedgerClient;
    use crate::ledger::settlement::SettlementLedger;
    use crate::payments::models::{DepositRecord, DepositStatus};
    use crate::payments::repository::UsageLogRepository;

    const PLATFORM: &str = "rPlatformEscrow";

    struct Harness {
        client: Arc<MockLedgerClient>,
        ledger: Arc<SettlementLedger>,
        deposits: Arc<DepositRepository>,
        sweeper: ExpirySweeper,
    }

    fn setup() -> Harness {
        let client = Arc::new(MockLedgerClient::new());
        let ledger = Arc::new(SettlementLedger::new(client.clone(), PLATFORM));
        let deposits = Arc::new(DepositRepository::new());
        let usage_logs = Arc::new(UsageLogRepository::new());
        let refunds = Arc::new(RefundCoordinator::new(
            ledger.clone(),
            deposits.clone(),
            usage_logs,
            PLATFORM,
        ));
        let sweeper = ExpirySweeper::new(refunds, deposits.clone(), 3600);
        Harness {
            client,
            ledger,
            deposits,
            sweeper,
        }
    }

    async fn open_payment(h: &Harness, buyer: &str, listing: &str, expires_in_hours: i64) {
        h.ledger
            .deposit(buyer, listing, "rSeller", 100_000, 1_000_000)
            .await
            .unwrap();
        h.deposits
            .insert(DepositRecord {
                id: Uuid::new_v4(),
                listing_id: listing.into(),
                buyer_wallet: buyer.into(),
                seller_wallet: "rSeller".into(),
                deposit_tx_hash: format!("TX-{}-{}", listing, buyer),
                deposit_amount: 1_000_000,
                price_per_call: 100_000,
                expires_at: Utc::now() + chrono::Duration::hours(expires_in_hours),
                status: DepositStatus::Open,
                created_at: Utc::now(),
            })
            .await;
    }

    #[tokio::test]
    async fn sweep_refunds_only_expired_deposits() {
        let h = setup();
        open_payment(&h, "rAlice", "listing-1", -1).await;
        open_payment(&h, "rBob", "listing-2", 24).await;

        let swept = h.sweeper.sweep_once().await;
        assert_eq!(swept, 1);
        assert_eq!(h.client.total_to("rAlice"), 1_000_000);
        assert_eq!(h.client.total_to("rBob"), 0);

        assert!(!h.ledger.get_payment("rAlice", "listing-1").await.active);
        assert!(h.ledger.get_payment("rBob", "listing-2").await.active);
    }

    #[tokio::test]
    async fn sweep_is_idempotent() {
        let h = setup();
        open_payment(&h, "rAlice", "listing-1", -1).await;

        assert_eq!(h.sweeper.sweep_once().await, 1);
        // the record is Refunded now, so there is nothing left to sweep
        assert_eq!(h.sweeper.sweep_once().await, 0);
        assert_eq!(h.client.total_to("rAlice"), 1_000_000);
    }

    #[tokio::test]
    async fn sweep_skips_already_settled_payments() {
        let h = setup();
        open_payment(&h, "rAlice", "listing-1", -1).await;
        // drain the payment through usage before the sweep runs
        h.ledger
            .release_usage(PLATFORM, "rAlice", "listing-1", 10)
            .await
            .unwrap();

        assert_eq!(h.sweeper.sweep_once().await, 0);
        assert_eq!(h.client.total_to("rAlice"), 0);

        // the shadow record was brought in step
        let record = h.deposits.latest_for_key("listing-1", "rAlice").await.unwrap();
        assert_eq!(record.status, DepositStatus::Settled);
    }
}
