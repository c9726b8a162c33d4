use serde::Serialize;
use sqlx::SqliteConnection;
use std::sync::Arc;
use web3::types::Address;

use crate::client::ChainClient;
use crate::error::SyncError;
use crate::eth::address_key;
use crate::explorer::{TransactionSource, MISSING_API_KEY_MESSAGE};
use crate::model::{BalanceHistoryPoint, Transaction};
use crate::rpc_cache::RpcCache;
use crate::utils::u256_to_rust_dec;
use crate::wallet_storage::{
    add_balance_snapshot, get_calculated_balance_history, get_last_synced_block,
    get_transactions, save_transactions,
};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletView {
    pub address: String,
    pub balance: String,
    pub currency_symbol: String,
    pub transactions: Vec<Transaction>,
    pub history: Vec<BalanceHistoryPoint>,
    /// Shown to the user when history could not be refreshed.
    pub notice: Option<String>,
}

pub struct WalletService {
    client: Arc<dyn ChainClient>,
    cache: Arc<RpcCache>,
    explorer: Arc<dyn TransactionSource>,
    currency_symbol: String,
}

impl WalletService {
    pub fn new(
        client: Arc<dyn ChainClient>,
        cache: Arc<RpcCache>,
        explorer: Arc<dyn TransactionSource>,
        currency_symbol: &str,
    ) -> Self {
        WalletService {
            client,
            cache,
            explorer,
            currency_symbol: currency_symbol.to_string(),
        }
    }

    /// Native balance in base units (ether), served through the RPC cache.
    pub async fn balance(&self, address: Address) -> Result<String, SyncError> {
        let client = self.client.clone();
        let wei = self
            .cache
            .cached_get_balance(address, move || async move { client.balance(address).await })
            .await?;
        Ok(u256_to_rust_dec(wei, None)?.to_string())
    }

    /// Pulls new explorer rows into storage. Returns a notice instead of failing when history is unavailable.
    async fn sync_transactions(
        &self,
        conn: &mut SqliteConnection,
        address: Address,
    ) -> Result<Option<String>, SyncError> {
        let key = address_key(&address);
        if !self.explorer.is_enabled() {
            log::debug!("Explorer disabled, using stored history of {}", key);
            return Ok(Some(MISSING_API_KEY_MESSAGE.to_string()));
        }
        let start_block = get_last_synced_block(conn, &key).await?.unwrap_or(0);
        match self.explorer.fetch_transactions(address, start_block).await {
            Ok(new) => {
                let merged = save_transactions(conn, &key, &new).await?;
                log::info!(
                    "Fetched {} transactions for {} from block {}, {} stored",
                    new.len(),
                    key,
                    start_block,
                    merged.len()
                );
                Ok(None)
            }
            Err(err) => {
                log::warn!("Transaction history of {} not refreshed: {}", key, err);
                Ok(Some(err.to_string()))
            }
        }
    }

    pub async fn refresh(
        &self,
        conn: &mut SqliteConnection,
        address: Address,
    ) -> Result<WalletView, SyncError> {
        let key = address_key(&address);
        let now = chrono::Utc::now().timestamp();
        let balance = self.balance(address).await?;
        add_balance_snapshot(conn, &key, &balance, now).await?;

        let notice = self.sync_transactions(conn, address).await?;
        let transactions = get_transactions(conn, &key).await?;
        let history =
            get_calculated_balance_history(conn, &key, &balance, &transactions, now).await?;

        Ok(WalletView {
            address: key,
            balance,
            currency_symbol: self.currency_symbol.clone(),
            transactions,
            history,
            notice,
        })
    }
}
