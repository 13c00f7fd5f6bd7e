use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use crate::payments::models::{DepositRecord, DepositStatus, UsageLog};

/// Deposit record store keyed by transaction hash.
///
/// In production this would be a durable keyed store with a unique
/// constraint on the hash; the registration locks below give the same
/// check-and-set atomicity in memory.
pub struct DepositRepository {
    records: RwLock<HashMap<String, DepositRecord>>,
    // One lock per tx hash so the replay check and the insert in the
    // registrar are a single serialized unit.
    reg_locks: parking_lot::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DepositRepository {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            reg_locks: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Registration lock for one tx hash. Hold it across the
    /// lookup-verify-insert sequence so a concurrent duplicate registration
    /// observes the first writer's record instead of racing it.
    pub fn registration_lock(&self, tx_hash: &str) -> Arc<Mutex<()>> {
        self.reg_locks
            .lock()
            .entry(tx_hash.to_string())
            .or_default()
            .clone()
    }

    pub async fn get_by_tx_hash(&self, tx_hash: &str) -> Option<DepositRecord> {
        self.records.read().await.get(tx_hash).cloned()
    }

    pub async fn insert(&self, record: DepositRecord) {
        self.records
            .write()
            .await
            .insert(record.deposit_tx_hash.clone(), record);
    }

    /// Newest record for a (listing, buyer) key. Later deposits on a settled
    /// key create fresh records, so "newest" is the governing one.
    pub async fn latest_for_key(
        &self,
        listing_id: &str,
        buyer_wallet: &str,
    ) -> Option<DepositRecord> {
        self.records
            .read()
            .await
            .values()
            .filter(|r| r.listing_id == listing_id && r.buyer_wallet == buyer_wallet)
            .max_by_key(|r| r.created_at)
            .cloned()
    }

    /// Flip the status of the newest Open record for a key. Records that
    /// already reached Settled or Refunded are terminal and stay untouched.
    pub async fn mark_latest_open(
        &self,
        listing_id: &str,
        buyer_wallet: &str,
        status: DepositStatus,
    ) -> Option<DepositRecord> {
        let mut records = self.records.write().await;
        let hash = records
            .values()
            .filter(|r| {
                r.listing_id == listing_id
                    && r.buyer_wallet == buyer_wallet
                    && r.status == DepositStatus::Open
            })
            .max_by_key(|r| r.created_at)
            .map(|r| r.deposit_tx_hash.clone())?;

        let record = records.get_mut(&hash)?;
        record.status = status;
        Some(record.clone())
    }

    pub async fn seller_records(&self, wallet: &str) -> Vec<DepositRecord> {
        self.filtered(|r| r.seller_wallet == wallet).await
    }

    pub async fn buyer_records(&self, wallet: &str) -> Vec<DepositRecord> {
        self.filtered(|r| r.buyer_wallet == wallet).await
    }

    /// Open records whose expiry has passed - the sweep candidates.
    pub async fn expired_open(&self, now: DateTime<Utc>) -> Vec<DepositRecord> {
        self.filtered(|r| r.status == DepositStatus::Open && r.is_expired(now))
            .await
    }

    async fn filtered(&self, keep: impl Fn(&DepositRecord) -> bool) -> Vec<DepositRecord> {
        let records = self.records.read().await;
        let mut out: Vec<_> = records.values().filter(|r| keep(r)).cloned().collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }
}

/// Usage log store. Hands out one slot per idempotency key; the slot mutex
/// is what serializes steps "look up, release, persist" for concurrent
/// duplicates of the same report.
///
/// Logs are retained for the life of the process: they are the audit trail
/// and the replay source, and evicting one would silently turn a retried
/// report into a fresh release.
pub struct UsageLogRepository {
    slots: parking_lot::Mutex<HashMap<String, Arc<Mutex<Option<UsageLog>>>>>,
    completed: RwLock<Vec<UsageLog>>,
}

impl UsageLogRepository {
    pub fn new() -> Self {
        Self {
            slots: parking_lot::Mutex::new(HashMap::new()),
            completed: RwLock::new(Vec::new()),
        }
    }

    /// Atomic lookup-or-insert of the slot for an idempotency key. Two
    /// concurrent reports with the same key get the same slot and serialize
    /// on its mutex.
    pub fn slot(&self, idempotency_key: &str) -> Arc<Mutex<Option<UsageLog>>> {
        self.slots
            .lock()
            .entry(idempotency_key.to_string())
            .or_default()
            .clone()
    }

    /// Append a finished log to the audit list. The caller has already
    /// stored it in the key's slot.
    pub async fn record(&self, log: UsageLog) {
        self.completed.write().await.push(log);
    }

    /// Most recent logs for one payment key, newest first.
    pub async fn recent_for_key(
        &self,
        listing_id: &str,
        buyer_wallet: &str,
        limit: usize,
    ) -> Vec<UsageLog> {
        self.completed
            .read()
            .await
            .iter()
            .rev()
            .filter(|l| l.listing_id == listing_id && l.buyer_wallet == buyer_wallet)
            .take(limit)
            .cloned()
            .collect()
    }
}
