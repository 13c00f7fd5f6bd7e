use std::fmt;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Drops per XRP - the ledger's smallest denomination. All internal
/// accounting is integer drops so fund movement never rounds.
pub const DROPS_PER_XRP: u64 = 1_000_000;

/// Key identifying one escrow payment: a buyer funding one listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaymentKey {
    pub buyer_wallet: String,
    pub listing_id: String,
}

impl PaymentKey {
    pub fn new(buyer_wallet: impl Into<String>, listing_id: impl Into<String>) -> Self {
        Self {
            buyer_wallet: buyer_wallet.into(),
            listing_id: listing_id.into(),
        }
    }
}

impl fmt::Display for PaymentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.listing_id, self.buyer_wallet)
    }
}

/// Escrow record for one (buyer, listing) pair.
///
/// Invariant: `remaining == 0` implies `active == false`. A settled payment
/// stays in the ledger map so the key can later be reopened by a new deposit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub buyer_wallet: String,
    pub seller_wallet: String,
    /// Price of one billable call, in drops.
    pub price_per_call: u64,
    /// Escrowed funds not yet released or refunded, in drops.
    pub remaining: u64,
    pub active: bool,
}

impl Payment {
    /// Empty snapshot for a key that has never seen a deposit.
    /// `get_payment` never fails; this is what it returns instead.
    pub fn zeroed(buyer_wallet: &str) -> Self {
        Self {
            buyer_wallet: buyer_wallet.to_string(),
            seller_wallet: String::new(),
            price_per_call: 0,
            remaining: 0,
            active: false,
        }
    }
}

/// Convert an XRP amount from the HTTP surface into drops.
///
/// Rejects negative amounts, sub-drop precision, and values that do not fit
/// in a `u64` - all before any state is touched.
pub fn xrp_to_drops(amount: Decimal) -> AppResult<u64> {
    if amount.is_sign_negative() {
        return Err(AppError::Validation(format!(
            "amount must not be negative: {}",
            amount
        )));
    }

    let drops = amount
        .checked_mul(Decimal::from(DROPS_PER_XRP))
        .ok_or_else(|| AppError::Validation(format!("amount out of range: {}", amount)))?;

    if !drops.fract().is_zero() {
        return Err(AppError::Validation(format!(
            "amount {} has sub-drop precision (smallest unit is {} XRP)",
            amount,
            Decimal::from(1) / Decimal::from(DROPS_PER_XRP)
        )));
    }

    drops
        .to_u64()
        .ok_or_else(|| AppError::Validation(format!("amount out of range: {}", amount)))
}

/// Convert drops back to XRP for API responses.
pub fn drops_to_xrp(drops: u64) -> Decimal {
    Decimal::from(drops) / Decimal::from(DROPS_PER_XRP)
}
