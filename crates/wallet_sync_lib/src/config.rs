use serde::{Deserialize, Serialize};

use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::SyncError;
use crate::{err_custom_create, err_from};
use web3::types::Address;

pub const DEFAULT_FALLBACK_ENDPOINTS: [&str; 3] = [
    "https://ethereum-sepolia-rpc.publicnode.com",
    "https://rpc.sepolia.org",
    "https://sepolia.drpc.org",
];

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    pub chain: Chain,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub nft: NftSettings,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Chain {
    pub network_id: u64,
    pub rpc_endpoints: Vec<String>,
    pub fallback_endpoints: Option<Vec<String>>,
    pub currency_symbol: Option<String>,
    pub nft_contract: Option<Address>,
    pub explorer_url: Option<String>,
    #[serde(default = "default_explorer_page_size")]
    pub explorer_page_size: u64,
    #[serde(default = "default_transport_retries")]
    pub transport_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub transport_retry_delay_ms: u64,
    #[serde(default = "default_retry_delay_ms")]
    pub rotation_delay_ms: u64,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "kebab-case", default)]
pub struct CacheSettings {
    pub block_number_ttl: u64,
    pub balance_ttl: u64,
    pub read_ttl: u64,
    pub staking_ttl: u64,
    pub loan_ttl: u64,
    pub metadata_ttl: u64,
    pub sweep_interval: u64,
    pub pending_timeout: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            block_number_ttl: 5,
            balance_ttl: 10,
            read_ttl: 60,
            staking_ttl: 20,
            loan_ttl: 30,
            metadata_ttl: 300,
            sweep_interval: 30,
            pending_timeout: 10,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "kebab-case", default)]
pub struct NftSettings {
    pub verify_batch_size: usize,
    pub probe_batch_size: usize,
    pub probe_limit: u64,
    pub probe_start: u64,
    pub ipfs_gateway: String,
}

impl Default for NftSettings {
    fn default() -> Self {
        NftSettings {
            verify_batch_size: 20,
            probe_batch_size: 30,
            probe_limit: 100,
            probe_start: 1,
            ipfs_gateway: "https://ipfs.io/ipfs/".to_string(),
        }
    }
}

fn default_explorer_page_size() -> u64 {
    100
}

fn default_transport_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

impl Chain {
    /// Configured endpoints first, then the public fallbacks, without duplicates.
    pub fn endpoint_list(&self) -> Vec<String> {
        let fallbacks = self.fallback_endpoints.clone().unwrap_or_else(|| {
            DEFAULT_FALLBACK_ENDPOINTS
                .iter()
                .map(|s| s.to_string())
                .collect()
        });
        let mut endpoints: Vec<String> = Vec::new();
        for endpoint in self.rpc_endpoints.iter().chain(fallbacks.iter()) {
            let endpoint = endpoint.trim();
            if !endpoint.is_empty() && !endpoints.iter().any(|e| e == endpoint) {
                endpoints.push(endpoint.to_string());
            }
        }
        endpoints
    }
}

impl CacheSettings {
    pub fn ttls(&self) -> CacheTtls {
        CacheTtls {
            block_number: Duration::from_secs(self.block_number_ttl),
            balance: Duration::from_secs(self.balance_ttl),
            read: Duration::from_secs(self.read_ttl),
            staking: Duration::from_secs(self.staking_ttl),
            loan: Duration::from_secs(self.loan_ttl),
            metadata: Duration::from_secs(self.metadata_ttl),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CacheTtls {
    pub block_number: Duration,
    pub balance: Duration,
    pub read: Duration,
    pub staking: Duration,
    pub loan: Duration,
    pub metadata: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        CacheSettings::default().ttls()
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SyncError> {
        let content = fs::read_to_string(path).map_err(err_from!())?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, SyncError> {
        let config: Config = match toml::from_str(content) {
            Ok(config) => config,
            Err(e) => return Err(err_custom_create!("Failed to parse toml {:?}", e)),
        };
        if config.chain.endpoint_list().is_empty() {
            return Err(err_custom_create!("No rpc endpoints configured"));
        }
        if config.nft.verify_batch_size == 0 || config.nft.probe_batch_size == 0 {
            return Err(err_custom_create!("NFT batch sizes must be greater than zero"));
        }
        Ok(config)
    }
}
