use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::error::{AppError, AppResult, PaymentError};
use crate::ledger::settlement::SettlementLedger;
use crate::metering::signature;
use crate::payments::models::{DepositStatus, UsageLog, UsageStatus};
use crate::payments::repository::{DepositRepository, UsageLogRepository};

/// A signed claim of billable calls made since the last report, produced by
/// the trusted usage oracle.
#[derive(Debug, Clone)]
pub struct UsageReport {
    pub listing_id: String,
    pub buyer_wallet: String,
    pub calls_reported: i64,
    pub idempotency_key: String,
    pub hmac_signature: String,
}

/// Validates, deduplicates, and applies usage reports against the escrow
/// ledger. Reports are authenticated before any state is touched and
/// processed exactly once per idempotency key: a retry of a processed key
/// replays the stored result without re-invoking the ledger.
pub struct MeteringReconciler {
    ledger: Arc<SettlementLedger>,
    deposits: Arc<DepositRepository>,
    usage_logs: Arc<UsageLogRepository>,
    platform_account: String,
    oracle_secret: String,
}

impl MeteringReconciler {
    pub fn new(
        ledger: Arc<SettlementLedger>,
        deposits: Arc<DepositRepository>,
        usage_logs: Arc<UsageLogRepository>,
        platform_account: impl Into<String>,
        oracle_secret: impl Into<String>,
    ) -> Self {
        Self {
            ledger,
            deposits,
            usage_logs,
            platform_account: platform_account.into(),
            oracle_secret: oracle_secret.into(),
        }
    }

    pub async fn process(&self, report: UsageReport) -> AppResult<UsageLog> {
        // Authenticate before anything else; a forged report must never
        // reach the dedup store or the ledger.
        let authentic = signature::verify_report(
            &self.oracle_secret,
            &report.listing_id,
            &report.buyer_wallet,
            report.calls_reported,
            &report.idempotency_key,
            &report.hmac_signature,
        )?;
        if !authentic {
            warn!("✗ rejected usage report {}: bad signature", report.idempotency_key);
            return Err(AppError::Authentication(
                "usage report signature mismatch".into(),
            ));
        }

        if report.calls_reported <= 0 {
            return Err(AppError::Validation(format!(
                "callsReported must be positive, got {}",
                report.calls_reported
            )));
        }
        let calls = report.calls_reported as u64;

        // Everything from the dedup check to the insert happens under the
        // key's slot lock, so a concurrent duplicate waits here and then
        // takes the replay branch.
        let slot = self.usage_logs.slot(&report.idempotency_key);
        let mut guard = slot.lock().await;

        if let Some(log) = guard.as_ref() {
            info!("↩ replaying usage report {}", report.idempotency_key);
            return Ok(log.clone());
        }

        let payment = self
            .ledger
            .payment(&report.buyer_wallet, &report.listing_id)
            .await
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "no payment for listing {} and buyer {}",
                    report.listing_id, report.buyer_wallet
                ))
            })?;

        let (amount, status) = if !payment.active {
            // Already settled: release nothing and tell the oracle to stop
            // reporting against this key.
            (0, UsageStatus::Exhausted)
        } else {
            match self
                .ledger
                .release_usage(
                    &self.platform_account,
                    &report.buyer_wallet,
                    &report.listing_id,
                    calls,
                )
                .await
            {
                Ok(amount) => {
                    let owed = calls as u128 * payment.price_per_call as u128;
                    let status = if (amount as u128) < owed {
                        UsageStatus::PartiallyReleased
                    } else {
                        UsageStatus::Released
                    };
                    (amount, status)
                }
                // Drained by a concurrent release after our snapshot.
                Err(AppError::Payment(PaymentError::NothingToRelease)) => {
                    (0, UsageStatus::Exhausted)
                }
                // Ledger failures are not recorded: the key stays fresh so a
                // retry re-attempts the release.
                Err(e) => return Err(e),
            }
        };

        // A drained or exhausted payment settles its governing deposit record.
        let settled = self
            .ledger
            .payment(&report.buyer_wallet, &report.listing_id)
            .await
            .map_or(true, |p| !p.active);
        if settled {
            self.deposits
                .mark_latest_open(&report.listing_id, &report.buyer_wallet, DepositStatus::Settled)
                .await;
        }

        let log = UsageLog {
            idempotency_key: report.idempotency_key.clone(),
            listing_id: report.listing_id,
            buyer_wallet: report.buyer_wallet,
            calls_reported: calls,
            amount_released: amount,
            status,
            reported_at: Utc::now(),
        };
        *guard = Some(log.clone());
        self.usage_logs.record(log.clone()).await;

        info!(
            "📊 usage report {}: {} calls, released {} drops ({:?})",
            log.idempotency_key, calls, amount, status
        );
        Ok(log)
    }
}
