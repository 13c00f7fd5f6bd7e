use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::ledger::models::drops_to_xrp;
use crate::payments::models::{DepositStatus, UsageLog, UsageStatus};
use crate::refunds::coordinator::{PartyPayment, PaymentStatusView};

// ========== REQUEST MODELS ==========

/// Request to register a confirmed deposit and open a payment
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DepositRequest {
    #[validate(length(min = 1))]
    pub buyer_wallet: String,
    #[validate(length(min = 1))]
    pub seller_wallet: String,
    #[validate(length(min = 1))]
    pub listing_id: String,
    #[validate(length(min = 1))]
    pub deposit_tx_hash: String,
    pub deposit_amount_xrp: Decimal,
    pub price_per_call_xrp: Decimal,
    #[validate(range(min = 1, max = 8760))]
    pub expires_in_hours: Option<i64>,
}

/// Signed usage report from the oracle. The reconciler owns the checks, in
/// its fixed order: signature first, then the calls count.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageReportRequest {
    pub listing_id: String,
    pub buyer_wallet: String,
    pub calls_reported: i64,
    pub idempotency_key: String,
    pub hmac_signature: String,
}

/// Request to reclaim unused funds
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequest {
    pub listing_id: String,
    pub buyer_wallet: String,
}

// ========== RESPONSE MODELS ==========

/// One payment as the API reports it: registered terms plus the live
/// ledger snapshot.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentView {
    pub listing_id: String,
    pub buyer_wallet: String,
    pub seller_wallet: String,
    pub deposit_tx_hash: String,
    pub deposit_amount_xrp: Decimal,
    pub price_per_call_xrp: Decimal,
    pub remaining_xrp: Decimal,
    pub active: bool,
    pub status: DepositStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl From<PartyPayment> for PaymentView {
    fn from(payment: PartyPayment) -> Self {
        let record = payment.record;
        Self {
            listing_id: record.listing_id,
            buyer_wallet: record.buyer_wallet,
            seller_wallet: record.seller_wallet,
            deposit_tx_hash: record.deposit_tx_hash,
            deposit_amount_xrp: drops_to_xrp(record.deposit_amount),
            price_per_call_xrp: drops_to_xrp(record.price_per_call),
            remaining_xrp: drops_to_xrp(payment.remaining),
            active: payment.active,
            status: record.status,
            expires_at: record.expires_at,
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositResponse {
    pub payment: PaymentView,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageLogView {
    pub idempotency_key: String,
    pub listing_id: String,
    pub buyer_wallet: String,
    pub calls_reported: u64,
    pub amount_released_xrp: Decimal,
    pub status: UsageStatus,
    pub reported_at: DateTime<Utc>,
}

impl From<UsageLog> for UsageLogView {
    fn from(log: UsageLog) -> Self {
        Self {
            idempotency_key: log.idempotency_key,
            listing_id: log.listing_id,
            buyer_wallet: log.buyer_wallet,
            calls_reported: log.calls_reported,
            amount_released_xrp: drops_to_xrp(log.amount_released),
            status: log.status,
            reported_at: log.reported_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageReportResponse {
    pub usage_log: UsageLogView,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusResponse {
    pub listing_id: String,
    pub buyer_wallet: String,
    pub seller_wallet: String,
    pub remaining_xrp: Decimal,
    pub active: bool,
    pub price_per_call_xrp: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deposit_status: Option<DepositStatus>,
    pub recent_usage: Vec<UsageLogView>,
}

impl From<PaymentStatusView> for PaymentStatusResponse {
    fn from(view: PaymentStatusView) -> Self {
        Self {
            listing_id: view.listing_id,
            buyer_wallet: view.buyer_wallet,
            seller_wallet: view.seller_wallet,
            remaining_xrp: drops_to_xrp(view.remaining),
            active: view.active,
            price_per_call_xrp: drops_to_xrp(view.price_per_call),
            expires_at: view.expires_at,
            deposit_status: view.deposit_status,
            recent_usage: view.recent_usage.into_iter().map(UsageLogView::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundResponse {
    pub refunded_amount: Decimal,
}
