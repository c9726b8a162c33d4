use secp256k1::SecretKey;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;
use web3::types::Address;

use crate::client::{Web3Client, Web3SigningClient};
use crate::config::Chain;
use crate::error::SyncError;
use crate::eth::get_eth_addr_from_secret;
use crate::rotation::{ClientFactory, RotatingClient};

pub const DEFAULT_EXPLORER_URL: &str = "https://api-sepolia.etherscan.io/api";

pub type ReadClient = RotatingClient<Web3Client>;
pub type WriteClient = RotatingClient<Web3SigningClient>;

pub struct ChainSetup {
    pub network_id: u64,
    pub currency_symbol: String,
    pub endpoints: Vec<String>,
    pub nft_contract: Option<Address>,
    pub explorer_url: String,
    pub explorer_page_size: u64,
    pub read_client: Arc<ReadClient>,
    pub signing_client: Option<Arc<WriteClient>>,
}

impl ChainSetup {
    /// Builds the read client and, when a key is given, a signing client rotating on the same index.
    pub fn new(chain: &Chain, secret_key: Option<SecretKey>) -> Result<Self, SyncError> {
        let endpoints = chain.endpoint_list();
        let retries = chain.transport_retries;
        let retry_delay = Duration::from_millis(chain.transport_retry_delay_ms);
        let rotation_delay = Duration::from_millis(chain.rotation_delay_ms);
        let index = Arc::new(AtomicUsize::new(0));

        let read_factory: ClientFactory<Web3Client> =
            Arc::new(move |endpoint: &str| Web3Client::new(endpoint, retries, retry_delay));
        let read_client = Arc::new(RotatingClient::with_shared_index(
            endpoints.clone(),
            read_factory,
            rotation_delay,
            index.clone(),
        )?);

        let signing_client = match secret_key {
            Some(secret_key) => {
                let chain_id = chain.network_id;
                let write_factory: ClientFactory<Web3SigningClient> =
                    Arc::new(move |endpoint: &str| {
                        let inner = Web3Client::new(endpoint, retries, retry_delay)?;
                        Ok(Web3SigningClient::new(inner, secret_key, chain_id))
                    });
                log::info!(
                    "Signing client enabled for {:#x}",
                    get_eth_addr_from_secret(&secret_key)
                );
                Some(Arc::new(RotatingClient::with_shared_index(
                    endpoints.clone(),
                    write_factory,
                    rotation_delay,
                    index,
                )?))
            }
            None => None,
        };

        log::debug!(
            "Chain {} set up with endpoints {:?}",
            chain.network_id,
            endpoints
        );
        Ok(ChainSetup {
            network_id: chain.network_id,
            currency_symbol: chain
                .currency_symbol
                .clone()
                .unwrap_or_else(|| "ETH".to_string()),
            endpoints,
            nft_contract: chain.nft_contract,
            explorer_url: chain
                .explorer_url
                .clone()
                .unwrap_or_else(|| DEFAULT_EXPLORER_URL.to_string()),
            explorer_page_size: chain.explorer_page_size,
            read_client,
            signing_client,
        })
    }
}
