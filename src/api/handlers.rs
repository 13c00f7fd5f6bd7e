use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use validator::Validate;

use crate::api::models::*;
use crate::error::{AppError, AppResult};
use crate::ledger::models::{drops_to_xrp, xrp_to_drops};
use crate::ledger::settlement::SettlementLedger;
use crate::metering::reconciler::{MeteringReconciler, UsageReport};
use crate::payments::registrar::{DepositRegistrar, DepositTerms};
use crate::refunds::coordinator::{PartyPayment, RefundCoordinator};

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<SettlementLedger>,
    pub registrar: Arc<DepositRegistrar>,
    pub reconciler: Arc<MeteringReconciler>,
    pub refunds: Arc<RefundCoordinator>,
}

/// GET /health
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "paymeter-backend",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Register a confirmed deposit and open the escrow payment
/// POST /payments/deposit
pub async fn register_deposit(
    State(state): State<AppState>,
    Json(req): Json<DepositRequest>,
) -> AppResult<(StatusCode, Json<DepositResponse>)> {
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let deposit_amount = xrp_to_drops(req.deposit_amount_xrp)?;
    let price_per_call = xrp_to_drops(req.price_per_call_xrp)?;

    let record = state
        .registrar
        .register(DepositTerms {
            deposit_tx_hash: req.deposit_tx_hash,
            buyer_wallet: req.buyer_wallet,
            seller_wallet: req.seller_wallet,
            listing_id: req.listing_id,
            deposit_amount,
            price_per_call,
            expires_in_hours: req.expires_in_hours,
        })
        .await?;

    // replayed registrations return the live balance, not the original one
    let snapshot = state
        .ledger
        .get_payment(&record.buyer_wallet, &record.listing_id)
        .await;

    let response = DepositResponse {
        payment: PaymentView::from(PartyPayment {
            remaining: snapshot.remaining,
            active: snapshot.active,
            record,
        }),
    };

    Ok((StatusCode::CREATED, Json(response)))
}

/// Apply a signed usage report against the escrow
/// POST /payments/usage/report
pub async fn report_usage(
    State(state): State<AppState>,
    Json(req): Json<UsageReportRequest>,
) -> AppResult<(StatusCode, Json<UsageReportResponse>)> {
    let log = state
        .reconciler
        .process(UsageReport {
            listing_id: req.listing_id,
            buyer_wallet: req.buyer_wallet,
            calls_reported: req.calls_reported,
            idempotency_key: req.idempotency_key,
            hmac_signature: req.hmac_signature,
        })
        .await?;

    let response = UsageReportResponse {
        usage_log: log.into(),
    };

    Ok((StatusCode::OK, Json(response)))
}

/// Merged status view for one payment
/// GET /payments/status/:listing_id/:buyer_wallet
pub async fn get_payment_status(
    State(state): State<AppState>,
    Path((listing_id, buyer_wallet)): Path<(String, String)>,
) -> AppResult<(StatusCode, Json<PaymentStatusResponse>)> {
    let view = state
        .refunds
        .payment_status(&listing_id, &buyer_wallet)
        .await?;

    Ok((StatusCode::OK, Json(view.into())))
}

/// Reclaim unused funds for a payment
/// POST /payments/refund
pub async fn refund_unused(
    State(state): State<AppState>,
    Json(req): Json<RefundRequest>,
) -> AppResult<(StatusCode, Json<RefundResponse>)> {
    let refunded = state
        .refunds
        .refund_unused(&req.listing_id, &req.buyer_wallet)
        .await?;

    let response = RefundResponse {
        refunded_amount: drops_to_xrp(refunded),
    };

    Ok((StatusCode::OK, Json(response)))
}

/// Payments where the wallet is the seller
/// GET /payments/seller/:wallet
pub async fn get_seller_payments(
    State(state): State<AppState>,
    Path(wallet): Path<String>,
) -> AppResult<(StatusCode, Json<Vec<PaymentView>>)> {
    let payments = state.refunds.seller_payments(&wallet).await;
    let views: Vec<_> = payments.into_iter().map(PaymentView::from).collect();
    Ok((StatusCode::OK, Json(views)))
}

/// Payments where the wallet is the buyer
/// GET /payments/buyer/:wallet
pub async fn get_buyer_payments(
    State(state): State<AppState>,
    Path(wallet): Path<String>,
) -> AppResult<(StatusCode, Json<Vec<PaymentView>>)> {
    let payments = state.refunds.buyer_payments(&wallet).await;
    let views: Vec<_> = payments.into_iter().map(PaymentView::from).collect();
    Ok((StatusCode::OK, Json(views)))
}
