use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub bind_address: String,
    pub xrpl_rpc_url: String,
    /// Classic address of the platform escrow wallet. This is the only
    /// principal allowed to release funds on usage or refund on expiry.
    pub platform_account: String,
    pub platform_wallet_secret: String,
    /// Shared secret between the platform and the usage oracle.
    pub usage_oracle_secret: String,
    pub default_expiry_hours: i64,
    /// 0 disables the expiry sweeper.
    pub sweep_interval_secs: u64,
    pub ledger_max_retries: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Ok(Self {
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            xrpl_rpc_url: std::env::var("XRPL_RPC_URL")
                .unwrap_or_else(|_| "https://s.altnet.rippletest.net:51234".to_string()),
            platform_account: require("PLATFORM_ACCOUNT")?,
            platform_wallet_secret: require("PLATFORM_WALLET_SECRET")?,
            usage_oracle_secret: require("USAGE_ORACLE_SECRET")?,
            default_expiry_hours: env_or("DEFAULT_EXPIRY_HOURS", 24),
            sweep_interval_secs: env_or("SWEEP_INTERVAL_SECS", 3600),
            ledger_max_retries: env_or("LEDGER_MAX_RETRIES", 3),
        })
    }
}

fn require(name: &str) -> Result<String, config::ConfigError> {
    std::env::var(name).map_err(|_| config::ConfigError::Message(format!("{} must be set", name)))
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
