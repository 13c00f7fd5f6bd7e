use std::sync::Arc;

use tracing::info;

use crate::{
    api::handlers::AppState,
    config::Config,
    error::AppResult,
    ledger::{
        client::{LedgerClient, XrplClient},
        settlement::SettlementLedger,
    },
    metering::reconciler::MeteringReconciler,
    payments::{
        registrar::DepositRegistrar,
        repository::{DepositRepository, UsageLogRepository},
    },
    refunds::coordinator::RefundCoordinator,
    sweeper::ExpirySweeper,
};

pub async fn initialize_app_state(config: &Config) -> AppResult<AppState> {
    info!("Initializing application components ...");

    // Ledger client - the only thing that actually moves funds
    let client: Arc<dyn LedgerClient> = Arc::new(XrplClient::new(
        &config.xrpl_rpc_url,
        &config.platform_account,
        &config.platform_wallet_secret,
        config.ledger_max_retries,
    ));
    info!("✅ XRPL client initialized for {}", config.xrpl_rpc_url);

    // Escrow state machine, keyed by (buyer, listing)
    let ledger = Arc::new(SettlementLedger::new(
        client.clone(),
        &config.platform_account,
    ));
    info!(
        "✅ Settlement ledger initialized (platform account {})",
        config.platform_account
    );

    // Off-chain shadow stores
    let deposits = Arc::new(DepositRepository::new());
    let usage_logs = Arc::new(UsageLogRepository::new());
    info!("✅ Deposit and usage log repositories initialized");

    let registrar = Arc::new(DepositRegistrar::new(
        ledger.clone(),
        client.clone(),
        deposits.clone(),
        config.default_expiry_hours,
    ));
    info!(
        "✅ Deposit registrar initialized (default expiry {}h)",
        config.default_expiry_hours
    );

    let reconciler = Arc::new(MeteringReconciler::new(
        ledger.clone(),
        deposits.clone(),
        usage_logs.clone(),
        &config.platform_account,
        &config.usage_oracle_secret,
    ));
    info!("✅ Metering reconciler initialized");

    let refunds = Arc::new(RefundCoordinator::new(
        ledger.clone(),
        deposits.clone(),
        usage_logs.clone(),
        &config.platform_account,
    ));
    info!("✅ Refund coordinator initialized");

    // The sweep job lives outside the escrow core: expiry only makes a
    // payment eligible, this task is what acts on it.
    if config.sweep_interval_secs > 0 {
        let sweeper = ExpirySweeper::new(
            refunds.clone(),
            deposits.clone(),
            config.sweep_interval_secs,
        );
        sweeper.start();
        info!(
            "✅ Expiry sweeper started (every {}s)",
            config.sweep_interval_secs
        );
    } else {
        info!("⚠️  Expiry sweeper disabled (SWEEP_INTERVAL_SECS=0)");
    }

    Ok(AppState {
        ledger,
        registrar,
        reconciler,
        refunds,
    })
}
