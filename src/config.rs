//! Runtime Configuration
//!
//! Everything the engine needs from the environment: target chain,
//! catalog location, the account to inspect, optional signer for
//! mutating operations, and the external collaborator endpoints.

use alloy_primitives::Address;
use eyre::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::chains::{chain_info, supported_chains};
use crate::metrics::TvlPolicy;
use crate::registry::{VaultCategory, VaultStatus};

/// Community factory deployment on mainnet; other chains set
/// `FACTORY_ADDRESS` explicitly.
const DEFAULT_FACTORY_MAINNET: &str = "0x21b1FC8A52f179757bf555346130bF27c0C2A17A";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // ========== Chain ==========
    /// Chain to operate on (must be in the chain table).
    pub chain_id: u64,

    // ========== Registry ==========
    /// Static catalog file; falls back to the built-in table.
    pub catalog_path: Option<String>,

    /// Community vault factory for this chain, if deployed.
    pub factory_address: Option<String>,

    // ========== Account ==========
    /// Account whose balances/allowances the read cycle reports.
    /// Superseded by the signer's address when a key is configured.
    pub watch_address: Option<String>,

    /// Private key for mutating operations (KEEP SECRET!).
    pub signer_key: Option<String>,

    // ========== Collaborators ==========
    /// Strategy metadata service.
    pub metadata_base_url: String,

    /// USD quote service.
    pub price_base_url: String,

    /// Block-height-by-timestamp service.
    pub block_base_url: String,

    // ========== Timing ==========
    /// Bound on the transaction receipt wait, seconds.
    pub receipt_timeout_secs: u64,

    // ========== TVL policy ==========
    /// Count stealth-status vaults in chain TVL.
    pub tvl_include_stealth: bool,

    /// Count weird-category vaults in chain TVL.
    pub tvl_include_weird: bool,
}

impl Config {
    /// Load configuration from environment variables and .env file
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let chain_id: u64 = env::var("CHAIN_ID")
            .unwrap_or_else(|_| "1".to_string())
            .parse()
            .unwrap_or(1);

        Ok(Self {
            chain_id,
            catalog_path: env::var("CATALOG_PATH").ok(),
            factory_address: env::var("FACTORY_ADDRESS")
                .ok()
                .or_else(|| (chain_id == 1).then(|| DEFAULT_FACTORY_MAINNET.to_string())),
            watch_address: env::var("WATCH_ADDRESS").ok(),
            signer_key: env::var("SIGNER_KEY").ok(),
            metadata_base_url: env::var("META_BASE_URL")
                .unwrap_or_else(|_| "https://meta.yearn.network".to_string()),
            price_base_url: env::var("PRICE_API_URL")
                .unwrap_or_else(|_| "https://api.coingecko.com/api/v3".to_string()),
            block_base_url: env::var("BLOCK_API_URL")
                .unwrap_or_else(|_| "https://coins.llama.fi".to_string()),
            receipt_timeout_secs: env::var("RECEIPT_TIMEOUT_SECS")
                .unwrap_or_else(|_| "120".to_string())
                .parse()
                .unwrap_or(120),
            tvl_include_stealth: env::var("TVL_INCLUDE_STEALTH")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
            tvl_include_weird: env::var("TVL_INCLUDE_WEIRD")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
        })
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Basic sanity checks, run before anything touches the network.
    pub fn validate(&self) -> Result<()> {
        if chain_info(self.chain_id).is_none() {
            let known: Vec<String> = supported_chains()
                .iter()
                .map(|c| format!("{} ({})", c.id, c.name))
                .collect();
            return Err(eyre::eyre!(
                "unknown chain id {}; known: {}",
                self.chain_id,
                known.join(", ")
            ));
        }
        if let Some(addr) = &self.watch_address {
            Address::from_str(addr)
                .map_err(|_| eyre::eyre!("WATCH_ADDRESS is not a valid address: {}", addr))?;
        }
        if let Some(addr) = &self.factory_address {
            Address::from_str(addr)
                .map_err(|_| eyre::eyre!("FACTORY_ADDRESS is not a valid address: {}", addr))?;
        }
        Ok(())
    }

    /// Mutating commands additionally need a key.
    pub fn validate_for_writes(&self) -> Result<()> {
        if self.signer_key.is_none() {
            return Err(eyre::eyre!(
                "this command submits a transaction; set SIGNER_KEY"
            ));
        }
        Ok(())
    }

    pub fn factory(&self) -> Option<Address> {
        self.factory_address
            .as_deref()
            .and_then(|a| Address::from_str(a).ok())
    }

    pub fn watch(&self) -> Option<Address> {
        self.watch_address
            .as_deref()
            .and_then(|a| Address::from_str(a).ok())
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }

    /// TVL exclusion policy (see the metrics module for the default
    /// rationale).
    pub fn tvl_policy(&self) -> TvlPolicy {
        let mut policy = TvlPolicy::default();
        if self.tvl_include_stealth {
            policy.exclude_statuses.retain(|s| *s != VaultStatus::Stealth);
        }
        if self.tvl_include_weird {
            policy
                .exclude_categories
                .retain(|c| *c != VaultCategory::Weird);
        }
        policy
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        let chain = chain_info(self.chain_id);
        println!("╔════════════════════════════════════════════════════════════╗");
        println!("║                VAULTSCOPE - CONFIGURATION                  ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!(
            "║ Chain:             {:^40} ║",
            chain.map(|c| c.name).unwrap_or("UNKNOWN")
        );
        println!(
            "║ Catalog:           {:^40} ║",
            self.catalog_path.as_deref().unwrap_or("built-in")
        );
        println!(
            "║ Factory:           {:^40} ║",
            if self.factory_address.is_some() { "✓ Configured" } else { "✗ Not Set" }
        );
        println!(
            "║ Signer:            {:^40} ║",
            if self.signer_key.is_some() { "✓ Configured" } else { "✗ Read-only" }
        );
        println!(
            "║ Receipt timeout:   {:>37}s  ║",
            self.receipt_timeout_secs
        );
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chain_id: 1,
            catalog_path: None,
            factory_address: Some(DEFAULT_FACTORY_MAINNET.to_string()),
            watch_address: None,
            signer_key: None,
            metadata_base_url: "https://meta.yearn.network".to_string(),
            price_base_url: "https://api.coingecko.com/api/v3".to_string(),
            block_base_url: "https://coins.llama.fi".to_string(),
            receipt_timeout_secs: 120,
            tvl_include_stealth: false,
            tvl_include_weird: false,
        }
    }
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.chain_id, 1);
        assert!(config.validate().is_ok());
        assert!(config.validate_for_writes().is_err());
    }

    #[test]
    fn unknown_chain_fails_validation() {
        let config = Config {
            chain_id: 424242,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn tvl_policy_is_configurable() {
        let config = Config::default();
        let policy = config.tvl_policy();
        assert!(policy.excludes(VaultStatus::Stealth, VaultCategory::Experimental));
        assert!(policy.excludes(VaultStatus::Active, VaultCategory::Weird));

        let open = Config {
            tvl_include_stealth: true,
            tvl_include_weird: true,
            ..Config::default()
        };
        let policy = open.tvl_policy();
        assert!(!policy.excludes(VaultStatus::Stealth, VaultCategory::Experimental));
        assert!(!policy.excludes(VaultStatus::Active, VaultCategory::Weird));
    }

    #[test]
    fn config_toml_round_trip() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let back: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(back.chain_id, config.chain_id);
        assert_eq!(back.metadata_base_url, config.metadata_base_url);
    }
}
