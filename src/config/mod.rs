use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::fs;
use anyhow::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub network: NetworkConfig,
    pub pricing: PricingConfig,
    pub refresh: RefreshConfig,
    pub storage: StorageConfig,
}

/// Chain identity. Fixed configuration, not user input.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NetworkConfig {
    pub chain_id: u64,
    pub rpc_url: String,
    pub explorer_url: String,
    pub native_currency: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PricingConfig {
    pub price_api_url: String,
    /// Pool-factory contract used to locate token/reference pools.
    pub pool_factory: String,
    /// Reference stable asset (USDC) the pools are priced against.
    pub reference_stable: String,
    pub reference_stable_decimals: u8,
    /// Symbols priced at a fixed 1.00 USD.
    pub stable_symbols: Vec<String>,
    /// Stable asset that is not USD-pegged and must not price at 1.00.
    pub non_usd_stable: String,
    /// Symbol → external price API id. Unmapped symbols skip that source.
    pub coingecko_ids: HashMap<String, String>,
    pub price_cache_ttl_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RefreshConfig {
    /// Spacing enforced by the request queue between any two outbound calls.
    pub min_request_interval_ms: u64,
    /// Extra pacing between tokens during balance/price fan-out.
    pub token_pacing_ms: u64,
    pub price_retry_attempts: u32,
    pub explorer_retry_attempts: u32,
    pub retry_base_delay_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConfig {
    /// Directory for the embedded history database.
    pub history_path: String,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let config_str = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&config_str)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let config_str = toml::to_string_pretty(self)?;
        fs::write(path, config_str)?;
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut coingecko_ids = HashMap::new();
        coingecko_ids.insert("WETH".to_string(), "ethereum".to_string());
        coingecko_ids.insert("ETH".to_string(), "ethereum".to_string());
        coingecko_ids.insert("WBTC".to_string(), "wrapped-bitcoin".to_string());
        coingecko_ids.insert("LINK".to_string(), "chainlink".to_string());
        coingecko_ids.insert("UNI".to_string(), "uniswap".to_string());
        coingecko_ids.insert("AAVE".to_string(), "aave".to_string());
        coingecko_ids.insert("MATIC".to_string(), "matic-network".to_string());

        Self {
            network: NetworkConfig {
                chain_id: 11155111,
                rpc_url: "http://127.0.0.1:8545".to_string(),
                explorer_url: "https://explorer.testnet.local".to_string(),
                native_currency: "ETH".to_string(),
            },
            pricing: PricingConfig {
                price_api_url: "https://api.coingecko.com/api/v3".to_string(),
                pool_factory: "0x0000000000000000000000000000000000000010".to_string(),
                reference_stable: "0x07865c6e87b9f70255377e024ace6630c1eaa37f".to_string(),
                reference_stable_decimals: 6,
                stable_symbols: vec![
                    "USDC".to_string(),
                    "USDT".to_string(),
                    "DAI".to_string(),
                    "BUSD".to_string(),
                    "TUSD".to_string(),
                    "FRAX".to_string(),
                    "LUSD".to_string(),
                    "EURS".to_string(),
                ],
                non_usd_stable: "EURS".to_string(),
                coingecko_ids,
                price_cache_ttl_secs: 30,
            },
            refresh: RefreshConfig {
                min_request_interval_ms: 250,
                token_pacing_ms: 150,
                price_retry_attempts: 2,
                explorer_retry_attempts: 3,
                retry_base_delay_ms: 500,
            },
            storage: StorageConfig {
                history_path: "portfolio-history".to_string(),
            },
        }
    }
}
