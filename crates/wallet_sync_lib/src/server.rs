use actix_web::web::Data;
use actix_web::{web, HttpRequest, Responder};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::eth::{address_key, parse_address};
use crate::runtime::SyncRuntime;
use crate::wallet_storage::{get_balance_history, get_calculated_balance_history, get_transactions};

pub struct ServerData {
    pub runtime: Arc<SyncRuntime>,
}

macro_rules! return_on_error {
    ( $e:expr ) => {
        match $e {
            Ok(x) => x,
            Err(err) => {
                return web::Json(json!({
                    "error": err.to_string()
                }))
            },
        }
    }
}

fn address_param(req: &HttpRequest) -> Result<web3::types::Address, crate::error::SyncError> {
    parse_address(req.match_info().get("address").unwrap_or(""))
}

pub async fn wallet(data: Data<Box<ServerData>>, req: HttpRequest) -> impl Responder {
    let address = return_on_error!(address_param(&req));
    let view = return_on_error!(data.runtime.wallet_view(address).await);
    web::Json(json!(view))
}

pub async fn wallet_transactions(data: Data<Box<ServerData>>, req: HttpRequest) -> impl Responder {
    let address = return_on_error!(address_param(&req));
    let transactions = {
        let mut db_conn = data.runtime.conn.lock().await;
        return_on_error!(get_transactions(&mut db_conn, &address_key(&address)).await)
    };
    web::Json(json!({
        "address": address_key(&address),
        "transactions": transactions,
    }))
}

pub async fn wallet_history(data: Data<Box<ServerData>>, req: HttpRequest) -> impl Responder {
    let address = return_on_error!(address_param(&req));
    let key = address_key(&address);
    let balance = return_on_error!(data.runtime.wallet.balance(address).await);
    let now = chrono::Utc::now().timestamp();

    let mut db_conn = data.runtime.conn.lock().await;
    let snapshots = return_on_error!(get_balance_history(&mut db_conn, &key).await);
    let transactions = return_on_error!(get_transactions(&mut db_conn, &key).await);
    let calculated = return_on_error!(
        get_calculated_balance_history(&mut db_conn, &key, &balance, &transactions, now).await
    );
    web::Json(json!({
        "address": key,
        "balance": balance,
        "snapshots": snapshots,
        "calculated": calculated,
    }))
}

#[derive(Deserialize, Debug, Default)]
pub struct NftQuery {
    #[serde(default)]
    pub force: bool,
}

pub async fn nfts(
    data: Data<Box<ServerData>>,
    req: HttpRequest,
    query: web::Query<NftQuery>,
) -> impl Responder {
    let address = return_on_error!(address_param(&req));
    let result = return_on_error!(data.runtime.nft_view(address, query.force).await);
    web::Json(json!(result))
}

pub async fn config_endpoint(data: Data<Box<ServerData>>) -> impl Responder {
    web::Json(json!({
        "config": data.runtime.config,
    }))
}

pub async fn debug_endpoint(data: Data<Box<ServerData>>) -> impl Responder {
    let read_client = &data.runtime.setup.read_client;
    web::Json(json!({
        "cache": data.runtime.cache.stats(),
        "currentEndpoint": read_client.current_endpoint(),
        "endpointSwitches": read_client.switch_count(),
        "endpoints": read_client.endpoints(),
        "signingEnabled": data.runtime.setup.signing_client.is_some(),
    }))
}

/// Registers all routes; the caller owns the `HttpServer` and its middleware.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/wallet/{address}", web::get().to(wallet))
        .route(
            "/wallet/{address}/transactions",
            web::get().to(wallet_transactions),
        )
        .route("/wallet/{address}/history", web::get().to(wallet_history))
        .route("/nfts/{address}", web::get().to(nfts))
        .route("/config", web::get().to(config_endpoint))
        .route("/debug", web::get().to(debug_endpoint));
}
