//! Configuration management for the bridge coordinator
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use ethers::types::Address;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub bridge: BridgeConfig,
    pub chain: ChainConfig,
    pub database: DatabaseConfig,
    pub wallet: WalletConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// Address of the wrapped-token contract being monitored and called
    pub contract_address: String,
    /// Address of the bridge account funding mints and transfers
    pub account_address: String,
    /// Gas limit used for mint/transfer calls
    pub gas_limit: u64,
    /// Grace period given to in-flight work on shutdown
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub name: String,
    pub chain_id: u64,
    pub rpc_url: String,
    pub ws_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    /// Name of the environment variable holding the hex private key
    pub private_key_env: String,
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

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("BRIDGE_CONFIG")
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
    ///
    /// Every endpoint and address must parse up front: a bad URL is a config
    /// error at startup, never something to skip over silently.
    fn validate(&self) -> Result<()> {
        self.bridge
            .contract_address
            .parse::<Address>()
            .map_err(|e| anyhow::anyhow!("invalid contract address: {}", e))?;
        self.bridge
            .account_address
            .parse::<Address>()
            .map_err(|e| anyhow::anyhow!("invalid account address: {}", e))?;

        if !self.chain.rpc_url.starts_with("http://") && !self.chain.rpc_url.starts_with("https://")
        {
            anyhow::bail!("rpc_url must be an http(s) endpoint: {}", self.chain.rpc_url);
        }
        if !self.chain.ws_url.starts_with("ws://") && !self.chain.ws_url.starts_with("wss://") {
            anyhow::bail!("ws_url must be a ws(s) endpoint: {}", self.chain.ws_url);
        }

        if self.bridge.gas_limit == 0 {
            anyhow::bail!("gas_limit must be non-zero");
        }

        Ok(())
    }

    /// Parsed wrapped-token contract address
    pub fn contract_address(&self) -> Address {
        self.bridge
            .contract_address
            .parse()
            .expect("validated at load")
    }

    /// Parsed bridge account address
    pub fn account_address(&self) -> Address {
        self.bridge
            .account_address
            .parse()
            .expect("validated at load")
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
