use secp256k1::SecretKey;
use sqlx::SqliteConnection;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use web3::types::{Address, H256, U256};

use crate::client::ChainClient;
use crate::config::Config;
use crate::db::create_sqlite_connection;
use crate::err_custom_create;
use crate::error::SyncError;
use crate::explorer::{ExplorerClient, TransactionSource};
use crate::nft::{transfer_nft, NftResolver, NftResult};
use crate::nft_storage::clear_nft_cache;
use crate::rpc_cache::RpcCache;
use crate::service::{WalletService, WalletView};
use crate::setup::ChainSetup;
use crate::wallet_storage::clear_wallet_data;

#[derive(Default)]
pub struct RuntimeOptions {
    pub secret_key: Option<SecretKey>,
    pub explorer_api_key: Option<String>,
    /// sqlite file; in-memory database when `None`
    pub db_filename: Option<String>,
}

pub struct SyncRuntime {
    pub config: Config,
    pub setup: ChainSetup,
    pub cache: Arc<RpcCache>,
    pub wallet: WalletService,
    pub nfts: Option<NftResolver>,
    pub conn: Arc<Mutex<SqliteConnection>>,
    sweeper: JoinHandle<()>,
}

impl Drop for SyncRuntime {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}

pub async fn start_sync_runtime(
    config: Config,
    options: RuntimeOptions,
) -> Result<SyncRuntime, SyncError> {
    let setup = ChainSetup::new(&config.chain, options.secret_key)?;
    let cache = Arc::new(RpcCache::new(&config.cache));
    let sweeper = cache.spawn_sweeper();

    let explorer: Arc<dyn TransactionSource> = Arc::new(ExplorerClient::new(
        &setup.explorer_url,
        options.explorer_api_key,
        setup.explorer_page_size,
    ));
    if !explorer.is_enabled() {
        log::warn!("No explorer API key, transaction history will not be refreshed");
    }

    let read_client: Arc<dyn ChainClient> = setup.read_client.clone();
    let wallet = WalletService::new(
        read_client.clone(),
        cache.clone(),
        explorer,
        &setup.currency_symbol,
    );
    let nfts = match setup.nft_contract {
        Some(contract) => Some(NftResolver::new(
            read_client,
            cache.clone(),
            contract,
            config.nft.clone(),
        )?),
        None => {
            log::info!("No NFT contract configured, NFT resolution disabled");
            None
        }
    };

    let conn = create_sqlite_connection(options.db_filename.as_deref(), true).await?;

    Ok(SyncRuntime {
        config,
        setup,
        cache,
        wallet,
        nfts,
        conn: Arc::new(Mutex::new(conn)),
        sweeper,
    })
}

impl SyncRuntime {
    pub fn nft_resolver(&self) -> Result<&NftResolver, SyncError> {
        self.nfts
            .as_ref()
            .ok_or_else(|| err_custom_create!("No nft-contract configured for chain {}", self.setup.network_id))
    }

    pub async fn wallet_view(&self, address: Address) -> Result<WalletView, SyncError> {
        let mut conn = self.conn.lock().await;
        self.wallet.refresh(&mut conn, address).await
    }

    pub async fn nft_view(&self, address: Address, force: bool) -> Result<NftResult, SyncError> {
        let resolver = self.nft_resolver()?;
        let mut conn = self.conn.lock().await;
        Ok(resolver.get_nfts(&mut conn, address, force).await)
    }

    pub async fn transfer_nft(&self, to: Address, token_id: U256) -> Result<H256, SyncError> {
        let resolver = self.nft_resolver()?;
        let signer = self
            .setup
            .signing_client
            .as_ref()
            .ok_or_else(|| err_custom_create!("Set ETH_PRIVATE_KEY to send transactions"))?;
        transfer_nft(signer.as_ref(), resolver.contract(), to, token_id).await
    }

    /// Forgets everything stored for `address`.
    pub async fn clear_address(&self, address: Address) -> Result<(), SyncError> {
        let key = crate::eth::address_key(&address);
        let mut conn = self.conn.lock().await;
        clear_wallet_data(&mut conn, &key).await?;
        clear_nft_cache(&mut conn, &key).await?;
        self.cache.clear();
        log::info!("Cleared stored data of {}", key);
        Ok(())
    }
}
