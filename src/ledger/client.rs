use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{AppResult, LedgerError};

/// Boundary to the XRP Ledger. The ledger's consensus and signing mechanics
/// stay behind this trait; the escrow core only needs to move funds out of
/// the platform wallet and confirm that a deposit transaction was validated.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Submit a payment of `amount_drops` from the platform escrow wallet to
    /// `destination`. Returns the transaction hash once the ledger accepted
    /// the submission.
    async fn submit_payment(
        &self,
        destination: &str,
        amount_drops: u64,
        memo: &str,
    ) -> AppResult<String>;

    /// Whether `tx_hash` exists on the ledger and has been validated by
    /// consensus. Deposit verification is delegated here; callers trust the
    /// answer and do not re-derive it.
    async fn verify_deposit(&self, tx_hash: &str) -> AppResult<bool>;
}

/// rippled JSON-RPC client using sign-and-submit with the escrow wallet
/// secret. Transport failures are retried with exponential backoff and
/// jitter; a rejection by the ledger itself is not retried.
pub struct XrplClient {
    http: reqwest::Client,
    rpc_url: String,
    account: String,
    secret: String,
    max_retries: u32,
}

impl XrplClient {
    pub fn new(
        rpc_url: impl Into<String>,
        account: impl Into<String>,
        secret: impl Into<String>,
        max_retries: u32,
    ) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            rpc_url: rpc_url.into(),
            account: account.into(),
            secret: secret.into(),
            max_retries,
        }
    }

    async fn call(&self, method: &str, body: Value) -> Result<Value, LedgerError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.http.post(&self.rpc_url).json(&body).send().await {
                Ok(resp) => {
                    return resp
                        .json::<Value>()
                        .await
                        .map_err(|e| LedgerError::MalformedResponse(e.to_string()));
                }
                Err(e) if attempt <= self.max_retries => {
                    let jitter = rand::rng().random_range(0..100);
                    let backoff = Duration::from_millis(100 * 2u64.pow(attempt) + jitter);
                    warn!(
                        "ledger {} call failed (attempt {}/{}), retrying in {:?}: {}",
                        method, attempt, self.max_retries, backoff, e
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    return Err(LedgerError::Unreachable {
                        attempts: attempt,
                        last_error: e.to_string(),
                    });
                }
            }
        }
    }
}

#[async_trait]
impl LedgerClient for XrplClient {
    async fn submit_payment(
        &self,
        destination: &str,
        amount_drops: u64,
        memo: &str,
    ) -> AppResult<String> {
        let body = json!({
            "method": "submit",
            "params": [{
                "secret": self.secret,
                "tx_json": {
                    "TransactionType": "Payment",
                    "Account": self.account,
                    "Destination": destination,
                    "Amount": amount_drops.to_string(),
                    "Memos": [{
                        "Memo": { "MemoData": hex::encode(memo) }
                    }],
                }
            }]
        });

        let resp = self.call("submit", body).await?;
        let result = resp
            .get("result")
            .ok_or_else(|| LedgerError::MalformedResponse("missing result".into()))?;

        let engine_result = result
            .get("engine_result")
            .and_then(Value::as_str)
            .ok_or_else(|| LedgerError::MalformedResponse("missing engine_result".into()))?;

        if engine_result != "tesSUCCESS" {
            return Err(LedgerError::Rejected {
                code: engine_result.to_string(),
            }
            .into());
        }

        let hash = result
            .pointer("/tx_json/hash")
            .and_then(Value::as_str)
            .ok_or_else(|| LedgerError::MalformedResponse("missing tx hash".into()))?;

        debug!("submitted {} drops to {} (tx {})", amount_drops, destination, hash);
        Ok(hash.to_string())
    }

    async fn verify_deposit(&self, tx_hash: &str) -> AppResult<bool> {
        let body = json!({
            "method": "tx",
            "params": [{ "transaction": tx_hash, "binary": false }]
        });

        let resp = self.call("tx", body).await?;
        let result = resp
            .get("result")
            .ok_or_else(|| LedgerError::MalformedResponse("missing result".into()))?;

        // txnNotFound and friends come back as an error object, not a failure
        if result.get("error").is_some() {
            return Ok(false);
        }

        Ok(result
            .get("validated")
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }
}
