mod options;

use actix_cors::Cors;
use actix_web::web::Data;
use actix_web::{App, HttpServer};
use std::env;
use std::sync::Arc;

use wallet_sync_lib::config::Config;
use wallet_sync_lib::error::{friendly_revert_message, SyncError};
use wallet_sync_lib::eth::{address_key, parse_private_key};
use wallet_sync_lib::runtime::{start_sync_runtime, RuntimeOptions, SyncRuntime};
use wallet_sync_lib::server::{self, ServerData};
use wallet_sync_lib::wallet_storage::{
    get_balance_history, get_calculated_balance_history, get_transactions,
};

use crate::options::{validated_cli, Command};

const CONFIG_FILE: &str = "config-wallet-sync.toml";
const DEFAULT_DB_FILE: &str = "wallet_sync.sqlite";

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), SyncError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn print_history(runtime: &SyncRuntime, address: web3::types::Address) -> Result<(), SyncError> {
    let key = address_key(&address);
    let balance = runtime.wallet.balance(address).await?;
    let now = chrono::Utc::now().timestamp();
    let mut conn = runtime.conn.lock().await;
    let snapshots = get_balance_history(&mut conn, &key).await?;
    let transactions = get_transactions(&mut conn, &key).await?;
    let calculated =
        get_calculated_balance_history(&mut conn, &key, &balance, &transactions, now).await?;
    print_json(&serde_json::json!({
        "address": key,
        "balance": balance,
        "snapshots": snapshots,
        "calculated": calculated,
    }))
}

#[tokio::main]
async fn main() -> Result<(), SyncError> {
    let dotenv_result = dotenv::dotenv();
    env_logger::init();
    if let Err(err) = dotenv_result {
        log::debug!("No .env file loaded: {}", err);
    }
    let command = validated_cli()?;
    let config = Config::load(CONFIG_FILE)?;

    let secret_key = match env::var("ETH_PRIVATE_KEY") {
        Ok(key) if !key.trim().is_empty() => Some(parse_private_key(&key)?),
        _ => None,
    };
    let options = RuntimeOptions {
        secret_key,
        explorer_api_key: env::var("ETHERSCAN_API_KEY").ok(),
        db_filename: Some(
            env::var("DB_SQLITE_FILENAME").unwrap_or_else(|_| DEFAULT_DB_FILE.to_string()),
        ),
    };
    let runtime = start_sync_runtime(config, options).await?;

    match command {
        Command::Wallet(address) => {
            let view = runtime.wallet_view(address).await?;
            if let Some(notice) = &view.notice {
                log::warn!("{}", notice);
            }
            print_json(&view)?;
        }
        Command::Nfts { address, force } => {
            let result = runtime.nft_view(address, force).await?;
            if let Some(err) = &result.error {
                log::error!("Showing cached NFTs: {}", err);
            }
            print_json(&result)?;
        }
        Command::History(address) => print_history(&runtime, address).await?,
        Command::Clear(address) => runtime.clear_address(address).await?,
        Command::TransferNft { to, token_id } => match runtime.transfer_nft(to, token_id).await {
            Ok(tx_hash) => println!("{:#x}", tx_hash),
            Err(err) => {
                log::error!("{}", friendly_revert_message(&err));
                return Err(err);
            }
        },
        Command::Serve { host, port } => {
            let runtime = Arc::new(runtime);
            log::info!("Starting http server on {}:{}", host, port);
            HttpServer::new(move || {
                App::new()
                    .wrap(Cors::permissive())
                    .app_data(Data::new(Box::new(ServerData {
                        runtime: runtime.clone(),
                    })))
                    .configure(server::configure)
            })
            .bind((host.as_str(), port))?
            .run()
            .await?;
        }
    }
    Ok(())
}
