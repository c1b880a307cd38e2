//! Configuration management for the Swapline Relayer
//!
//! Loads configuration from TOML files with environment variable substitution.
//! Economically meaningful values (amounts, chain identifiers, window
//! durations) have no embedded defaults and must be supplied explicitly.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub relayer: RelayerConfig,
    pub auction: AuctionConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub chains: HashMap<String, ChainConfig>,
    pub wallet: WalletConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayerConfig {
    pub instance_id: String,
    /// Pause between source and destination escrow creation
    pub settling_delay_secs: u64,
    /// Finality lock: mandatory wait after escrow creation before reveal
    pub finality_lock_secs: u64,
    /// Window in which only the picked resolver may withdraw
    pub exclusive_withdraw_secs: u64,
    /// Window after exclusive withdrawal before cancellation becomes possible
    pub cancellation_window_secs: u64,
    /// Safety deposit bonded with each escrow, in wei
    pub safety_deposit_wei: String,
    /// Verify maker native balance before admitting an order
    pub check_maker_balance: bool,
    /// How long terminal orders are kept before eviction
    pub retention_secs: u64,
    pub health_check_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuctionConfig {
    /// Interval between auction price ticks
    pub tick_interval_secs: u64,
    /// Gas adjustment strength, basis points of price per doubling of base fee
    pub gas_adjustment_coefficient_bps: u64,
    /// Hard cap on the gas adjustment, basis points of the current price
    pub gas_adjustment_max_bps: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub rpc_urls: Vec<String>,
    pub escrow_contract: String,
    pub confirmation_blocks: u64,
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    pub private_key_env: Option<String>,
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("SWAPLINE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        // Substitute environment variables
        let config_str = substitute_env_vars(&config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.enabled_chains().is_empty() {
            anyhow::bail!("At least one chain must be enabled");
        }

        for (name, chain) in &self.chains {
            if chain.enabled {
                if chain.rpc_urls.is_empty() {
                    anyhow::bail!("Chain {} has no RPC URLs configured", name);
                }
                if chain.escrow_contract.is_empty() {
                    anyhow::bail!("Chain {} has no escrow contract configured", name);
                }
            }
        }

        if self.auction.tick_interval_secs == 0 {
            anyhow::bail!("Auction tick interval must be non-zero");
        }

        // Phase deadlines must be strictly increasing, so every window is non-zero
        if self.relayer.finality_lock_secs == 0
            || self.relayer.exclusive_withdraw_secs == 0
            || self.relayer.cancellation_window_secs == 0
        {
            anyhow::bail!("Finality, exclusive-withdraw and cancellation windows must be non-zero");
        }

        if self.relayer.safety_deposit_wei.parse::<u128>().is_err() {
            anyhow::bail!("safety_deposit_wei must be an integer wei amount");
        }

        Ok(())
    }

    /// Get list of enabled chains
    pub fn enabled_chains(&self) -> Vec<(&String, &ChainConfig)> {
        self.chains.iter().filter(|(_, c)| c.enabled).collect()
    }

    /// Get chain config by chain ID
    pub fn get_chain_by_id(&self, chain_id: u64) -> Option<&ChainConfig> {
        self.chains.values().find(|c| c.chain_id == chain_id)
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(
            result,
            "url = \"https://api.example.com/test_value/endpoint\""
        );
    }

    fn test_settings() -> Settings {
        let toml = r#"
            [relayer]
            instance_id = "test-1"
            settling_delay_secs = 2
            finality_lock_secs = 30
            exclusive_withdraw_secs = 60
            cancellation_window_secs = 120
            safety_deposit_wei = "1000000000000000"
            check_maker_balance = false
            retention_secs = 3600
            health_check_interval_secs = 30

            [auction]
            tick_interval_secs = 2
            gas_adjustment_coefficient_bps = 50
            gas_adjustment_max_bps = 200

            [api]
            host = "127.0.0.1"
            port = 8080

            [metrics]
            enabled = false
            port = 9090

            [wallet]

            [chains.testnet]
            chain_id = 31337
            name = "testnet"
            rpc_urls = ["http://localhost:8545"]
            escrow_contract = "0x0000000000000000000000000000000000000001"
            confirmation_blocks = 1
            enabled = true
        "#;
        toml::from_str(toml).unwrap()
    }

    #[test]
    fn test_valid_settings_pass_validation() {
        assert!(test_settings().validate().is_ok());
    }

    #[test]
    fn test_zero_window_rejected() {
        let mut settings = test_settings();
        settings.relayer.finality_lock_secs = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_chain_without_escrow_contract_rejected() {
        let mut settings = test_settings();
        settings
            .chains
            .get_mut("testnet")
            .unwrap()
            .escrow_contract = String::new();
        assert!(settings.validate().is_err());
    }
}
