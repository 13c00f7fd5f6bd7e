use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::{AppError, AppResult, PaymentError};
use crate::ledger::client::LedgerClient;
use crate::ledger::models::{Payment, PaymentKey};

/// Authoritative per-key escrow balance state machine.
///
/// Per key: `NoPayment --deposit--> Active --release(partial)--> Active`;
/// `Active --release(drains)|refund|admin_refund--> Settled`;
/// `Settled --deposit--> Active` (key reuse after settlement only).
///
/// Every fund-moving operation is atomic: the escrow balance only mutates
/// after the ledger accepted the corresponding transfer, so a failed transfer
/// leaves no partial state behind.
pub struct SettlementLedger {
    client: Arc<dyn LedgerClient>,
    platform_account: String,
    // One slot per (buyer, listing). The slot mutex is held for the whole
    // read-modify-write including the network-bound ledger submit, so
    // same-key operations serialize while unrelated keys run in parallel.
    // The outer map lock is only ever held to clone a slot handle.
    slots: RwLock<HashMap<PaymentKey, Arc<Mutex<Option<Payment>>>>>,
}

impl SettlementLedger {
    pub fn new(client: Arc<dyn LedgerClient>, platform_account: impl Into<String>) -> Self {
        Self {
            client,
            platform_account: platform_account.into(),
            slots: RwLock::new(HashMap::new()),
        }
    }

    fn slot(&self, key: &PaymentKey) -> Arc<Mutex<Option<Payment>>> {
        if let Some(slot) = self.slots.read().get(key) {
            return slot.clone();
        }
        self.slots.write().entry(key.clone()).or_default().clone()
    }

    fn require_platform(&self, caller: &str) -> AppResult<()> {
        if caller != self.platform_account {
            return Err(AppError::Authorization(format!(
                "caller {} is not the platform account",
                caller
            )));
        }
        Ok(())
    }

    /// Open (or reopen) the escrow payment for a key. Fails with
    /// `AlreadyActive` while a previous payment on the same key still holds
    /// funds.
    pub async fn deposit(
        &self,
        buyer_wallet: &str,
        listing_id: &str,
        seller_wallet: &str,
        price_per_call: u64,
        amount: u64,
    ) -> AppResult<Payment> {
        if amount == 0 {
            return Err(AppError::Validation("deposit amount must be positive".into()));
        }
        if price_per_call == 0 {
            return Err(AppError::Validation("price per call must be positive".into()));
        }

        let key = PaymentKey::new(buyer_wallet, listing_id);
        let slot = self.slot(&key);
        let mut guard = slot.lock().await;

        if let Some(existing) = guard.as_ref() {
            if existing.active {
                return Err(PaymentError::AlreadyActive {
                    buyer: buyer_wallet.to_string(),
                    listing: listing_id.to_string(),
                }
                .into());
            }
        }

        let payment = Payment {
            buyer_wallet: buyer_wallet.to_string(),
            seller_wallet: seller_wallet.to_string(),
            price_per_call,
            remaining: amount,
            active: true,
        };
        *guard = Some(payment.clone());

        info!("💰 payment opened for {}: {} drops escrowed", key, amount);
        Ok(payment)
    }

    /// Release funds to the seller for reported usage. Platform-only.
    ///
    /// The released amount is `min(calls * price_per_call, remaining)` and
    /// may be less than requested - callers must read the return value, not
    /// assume full payment. Draining the balance settles the payment.
    pub async fn release_usage(
        &self,
        caller: &str,
        buyer_wallet: &str,
        listing_id: &str,
        calls: u64,
    ) -> AppResult<u64> {
        self.require_platform(caller)?;
        if calls == 0 {
            return Err(AppError::Validation("calls must be positive".into()));
        }

        let key = PaymentKey::new(buyer_wallet, listing_id);
        let slot = self.slot(&key);
        let mut guard = slot.lock().await;

        let payment = guard
            .as_mut()
            .filter(|p| p.active)
            .ok_or_else(|| AppError::NotFound(format!("no active payment for {}", key)))?;

        let owed = calls as u128 * payment.price_per_call as u128;
        let amount = owed.min(payment.remaining as u128) as u64;
        if amount == 0 {
            return Err(PaymentError::NothingToRelease.into());
        }

        // Transfer first; the balance only moves once the ledger accepted it.
        let seller = payment.seller_wallet.clone();
        let tx_hash = self
            .client
            .submit_payment(&seller, amount, &format!("usage:{}", key))
            .await?;

        payment.remaining -= amount;
        if payment.remaining == 0 {
            payment.active = false;
        }

        info!(
            "→ released {} drops to {} for {} ({} calls, tx {})",
            amount, seller, key, calls, tx_hash
        );
        Ok(amount)
    }

    /// Buyer-initiated reclaim of all remaining funds. The caller is the
    /// buyer; anyone else resolves to a key with no payment and fails with
    /// `NotFound`, with no side effects.
    pub async fn refund(&self, caller: &str, listing_id: &str) -> AppResult<u64> {
        let key = PaymentKey::new(caller, listing_id);
        self.refund_inner(key).await
    }

    /// Platform-initiated refund on the buyer's behalf, for when the buyer
    /// cannot or will not act (typically after expiry).
    pub async fn admin_refund(
        &self,
        caller: &str,
        buyer_wallet: &str,
        listing_id: &str,
    ) -> AppResult<u64> {
        self.require_platform(caller)?;
        let key = PaymentKey::new(buyer_wallet, listing_id);
        self.refund_inner(key).await
    }

    async fn refund_inner(&self, key: PaymentKey) -> AppResult<u64> {
        let slot = self.slot(&key);
        let mut guard = slot.lock().await;

        let payment = guard
            .as_mut()
            .filter(|p| p.active)
            .ok_or_else(|| AppError::NotFound(format!("no active payment for {}", key)))?;

        let amount = payment.remaining;
        let buyer = payment.buyer_wallet.clone();
        let tx_hash = self
            .client
            .submit_payment(&buyer, amount, &format!("refund:{}", key))
            .await?;

        payment.remaining = 0;
        payment.active = false;

        info!(
            "💸 refunded {} drops to {} for {} (tx {})",
            amount, buyer, key, tx_hash
        );
        Ok(amount)
    }

    /// Snapshot for a key, `None` when the key has never seen a deposit.
    pub async fn payment(&self, buyer_wallet: &str, listing_id: &str) -> Option<Payment> {
        let key = PaymentKey::new(buyer_wallet, listing_id);
        let slot = { self.slots.read().get(&key).cloned() }?;
        let guard = slot.lock().await;
        guard.clone()
    }

    /// Read-only snapshot; never fails. A key with no payment history yields
    /// a zeroed payment.
    pub async fn get_payment(&self, buyer_wallet: &str, listing_id: &str) -> Payment {
        self.payment(buyer_wallet, listing_id)
            .await
            .unwrap_or_else(|| Payment::zeroed(buyer_wallet))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::client::testing::MockLedgerClient;

    const PLATFORM: &str = "rPlatformEscrow";
    const BUYER: &str = "rBuyer";
    const SELLER: &str = "rSeller";
    const LISTING: &str = "listing-1";

    fn setup() -> (Arc<MockLedgerClient>, SettlementLedger) {
        let client = Arc::new(MockLedgerClient::new());
        let ledger = SettlementLedger::new(client.clone(), PLATFORM);
        (client, ledger)
    }

    #[tokio::test]
    async fn deposit_opens_active_payment() {
        let (_, ledger) = setup();
        let payment = ledger
            .deposit(BUYER, LISTING, SELLER, 100_000, 1_000_000)
            .await
            .unwrap();
        assert!(payment.active);
        assert_eq!(payment.remaining, 1_000_000);

        let snapshot = ledger.get_payment(BUYER, LISTING).await;
        assert_eq!(snapshot.remaining, 1_000_000);
        assert_eq!(snapshot.seller_wallet, SELLER);
    }

    #[tokio::test]
    async fn deposit_zero_amount_rejected() {
        let (_, ledger) = setup();
        let err = ledger.deposit(BUYER, LISTING, SELLER, 100_000, 0).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn deposit_while_active_rejected() {
        let (_, ledger) = setup();
        ledger.deposit(BUYER, LISTING, SELLER, 100_000, 1_000_000).await.unwrap();

        let err = ledger
            .deposit(BUYER, LISTING, SELLER, 100_000, 500_000)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Payment(PaymentError::AlreadyActive { .. })
        ));

        // original escrow untouched
        assert_eq!(ledger.get_payment(BUYER, LISTING).await.remaining, 1_000_000);
    }

    #[tokio::test]
    async fn release_pays_seller_and_decrements() {
        // Scenario: deposit 1,000,000 at 100,000/call, report 3 calls
        let (client, ledger) = setup();
        ledger.deposit(BUYER, LISTING, SELLER, 100_000, 1_000_000).await.unwrap();

        let released = ledger
            .release_usage(PLATFORM, BUYER, LISTING, 3)
            .await
            .unwrap();
        assert_eq!(released, 300_000);
        assert_eq!(client.total_to(SELLER), 300_000);

        let snapshot = ledger.get_payment(BUYER, LISTING).await;
        assert_eq!(snapshot.remaining, 700_000);
        assert!(snapshot.active);
    }

    #[tokio::test]
    async fn release_caps_at_remaining_and_settles() {
        // Scenario: 700,000 left, 10 calls reported - release is clamped
        let (client, ledger) = setup();
        ledger.deposit(BUYER, LISTING, SELLER, 100_000, 1_000_000).await.unwrap();
        ledger.release_usage(PLATFORM, BUYER, LISTING, 3).await.unwrap();

        let released = ledger
            .release_usage(PLATFORM, BUYER, LISTING, 10)
            .await
            .unwrap();
        assert_eq!(released, 700_000);

        let snapshot = ledger.get_payment(BUYER, LISTING).await;
        assert_eq!(snapshot.remaining, 0);
        assert!(!snapshot.active);

        // every escrowed drop reached the seller
        assert_eq!(client.total_to(SELLER), 1_000_000);
    }

    #[tokio::test]
    async fn release_on_settled_payment_is_not_found() {
        let (_, ledger) = setup();
        ledger.deposit(BUYER, LISTING, SELLER, 100_000, 100_000).await.unwrap();
        ledger.release_usage(PLATFORM, BUYER, LISTING, 1).await.unwrap();

        let err = ledger
            .release_usage(PLATFORM, BUYER, LISTING, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn release_requires_platform_caller() {
        let (_, ledger) = setup();
        ledger.deposit(BUYER, LISTING, SELLER, 100_000, 1_000_000).await.unwrap();

        let err = ledger
            .release_usage("rMallory", BUYER, LISTING, 3)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Authorization(_)));

        // state unchanged on failure
        assert_eq!(ledger.get_payment(BUYER, LISTING).await.remaining, 1_000_000);
    }

    #[tokio::test]
    async fn release_zero_calls_rejected() {
        let (_, ledger) = setup();
        ledger.deposit(BUYER, LISTING, SELLER, 100_000, 1_000_000).await.unwrap();
        let err = ledger
            .release_usage(PLATFORM, BUYER, LISTING, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn release_unknown_key_not_found() {
        let (_, ledger) = setup();
        let err = ledger
            .release_usage(PLATFORM, BUYER, "no-such-listing", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn transfer_failure_rolls_back_release() {
        let (client, ledger) = setup();
        ledger.deposit(BUYER, LISTING, SELLER, 100_000, 1_000_000).await.unwrap();

        client.set_fail_submits(true);
        let err = ledger
            .release_usage(PLATFORM, BUYER, LISTING, 3)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Ledger(_)));

        // no partial balance mutation is observable
        let snapshot = ledger.get_payment(BUYER, LISTING).await;
        assert_eq!(snapshot.remaining, 1_000_000);
        assert!(snapshot.active);

        // the retry succeeds once the ledger is reachable again
        client.set_fail_submits(false);
        let released = ledger.release_usage(PLATFORM, BUYER, LISTING, 3).await.unwrap();
        assert_eq!(released, 300_000);
    }

    #[tokio::test]
    async fn refund_returns_all_remaining_to_buyer() {
        // Scenario: deposit 2,000,000 then buyer refunds
        let (client, ledger) = setup();
        ledger.deposit(BUYER, LISTING, SELLER, 100_000, 2_000_000).await.unwrap();

        let refunded = ledger.refund(BUYER, LISTING).await.unwrap();
        assert_eq!(refunded, 2_000_000);
        assert_eq!(client.total_to(BUYER), 2_000_000);

        let snapshot = ledger.get_payment(BUYER, LISTING).await;
        assert_eq!(snapshot.remaining, 0);
        assert!(!snapshot.active);

        // a second refund finds no active payment
        let err = ledger.refund(BUYER, LISTING).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn refund_by_stranger_has_no_effect() {
        let (client, ledger) = setup();
        ledger.deposit(BUYER, LISTING, SELLER, 100_000, 1_000_000).await.unwrap();

        let err = ledger.refund("rMallory", LISTING).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        assert_eq!(ledger.get_payment(BUYER, LISTING).await.remaining, 1_000_000);
        assert!(client.transfers().is_empty());
    }

    #[tokio::test]
    async fn refund_transfer_failure_keeps_payment_active() {
        let (client, ledger) = setup();
        ledger.deposit(BUYER, LISTING, SELLER, 100_000, 1_000_000).await.unwrap();

        client.set_fail_submits(true);
        let err = ledger.refund(BUYER, LISTING).await.unwrap_err();
        assert!(matches!(err, AppError::Ledger(_)));

        let snapshot = ledger.get_payment(BUYER, LISTING).await;
        assert!(snapshot.active);
        assert_eq!(snapshot.remaining, 1_000_000);
    }

    #[tokio::test]
    async fn admin_refund_requires_platform() {
        let (_, ledger) = setup();
        ledger.deposit(BUYER, LISTING, SELLER, 100_000, 1_000_000).await.unwrap();

        let err = ledger
            .admin_refund("rMallory", BUYER, LISTING)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Authorization(_)));

        let refunded = ledger.admin_refund(PLATFORM, BUYER, LISTING).await.unwrap();
        assert_eq!(refunded, 1_000_000);
    }

    #[tokio::test]
    async fn key_can_reopen_after_settlement() {
        let (_, ledger) = setup();
        ledger.deposit(BUYER, LISTING, SELLER, 100_000, 1_000_000).await.unwrap();
        ledger.refund(BUYER, LISTING).await.unwrap();

        let payment = ledger
            .deposit(BUYER, LISTING, SELLER, 200_000, 600_000)
            .await
            .unwrap();
        assert!(payment.active);
        assert_eq!(payment.remaining, 600_000);
        assert_eq!(payment.price_per_call, 200_000);
    }

    #[tokio::test]
    async fn conservation_of_funds() {
        let (client, ledger) = setup();
        ledger.deposit(BUYER, LISTING, SELLER, 100_000, 1_000_000).await.unwrap();

        let released = ledger.release_usage(PLATFORM, BUYER, LISTING, 3).await.unwrap();
        let refunded = ledger.refund(BUYER, LISTING).await.unwrap();

        assert_eq!(released + refunded, 1_000_000);
        assert_eq!(client.total_to(SELLER), released);
        assert_eq!(client.total_to(BUYER), refunded);
    }

    #[tokio::test]
    async fn remaining_is_non_increasing_until_reopened() {
        let (_, ledger) = setup();
        ledger.deposit(BUYER, LISTING, SELLER, 50_000, 400_000).await.unwrap();

        let mut last = ledger.get_payment(BUYER, LISTING).await.remaining;
        for calls in [1u64, 2, 3, 10] {
            // releases past exhaustion surface as errors, never as growth
            let _ = ledger.release_usage(PLATFORM, BUYER, LISTING, calls).await;
            let now = ledger.get_payment(BUYER, LISTING).await.remaining;
            assert!(now <= last, "remaining grew from {} to {}", last, now);
            last = now;
        }
        assert_eq!(last, 0);
    }

    #[tokio::test]
    async fn concurrent_same_key_releases_never_overdraw() {
        let (client, ledger) = setup();
        let ledger = Arc::new(ledger);
        ledger.deposit(BUYER, LISTING, SELLER, 100_000, 500_000).await.unwrap();

        // 3 + 3 calls would be 600,000 drops against 500,000 escrowed;
        // serialization per key means the second release gets clamped.
        let a = ledger.clone();
        let b = ledger.clone();
        let (ra, rb) = tokio::join!(
            a.release_usage(PLATFORM, BUYER, LISTING, 3),
            b.release_usage(PLATFORM, BUYER, LISTING, 3),
        );

        let total = ra.unwrap() + rb.unwrap();
        assert_eq!(total, 500_000);
        assert_eq!(client.total_to(SELLER), 500_000);
        assert!(!ledger.get_payment(BUYER, LISTING).await.active);
    }

    #[tokio::test]
    async fn independent_keys_proceed_in_parallel() {
        let (client, ledger) = setup();
        let ledger = Arc::new(ledger);
        ledger.deposit("rBuyerA", LISTING, SELLER, 100_000, 1_000_000).await.unwrap();
        ledger.deposit("rBuyerB", LISTING, SELLER, 100_000, 1_000_000).await.unwrap();

        let a = ledger.clone();
        let b = ledger.clone();
        let (ra, rb) = tokio::join!(
            a.release_usage(PLATFORM, "rBuyerA", LISTING, 2),
            b.release_usage(PLATFORM, "rBuyerB", LISTING, 5),
        );
        assert_eq!(ra.unwrap(), 200_000);
        assert_eq!(rb.unwrap(), 500_000);
        assert_eq!(client.total_to(SELLER), 700_000);
    }

    #[tokio::test]
    async fn get_payment_is_zeroed_for_unknown_key() {
        let (_, ledger) = setup();
        let payment = ledger.get_payment(BUYER, "never-deposited").await;
        assert_eq!(payment.remaining, 0);
        assert!(!payment.active);
        assert!(ledger.payment(BUYER, "never-deposited").await.is_none());
    }
}
