//! Persisted NFT ownership cache and the longer-lived token metadata cache.

use sqlx::SqliteConnection;
use web3::types::Address;

use crate::client::{ChainClient, TransferFilter};
use crate::db::model::NftMetadataDao;
use crate::db::ops::*;
use crate::err_from;
use crate::error::SyncError;
use crate::eth::address_key;
use crate::model::NftCacheData;

/// Metadata row together with the time it was stored.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedMetadata {
    pub metadata: serde_json::Value,
    pub updated_at: i64,
}

pub async fn get_nft_cache(
    conn: &mut SqliteConnection,
    address: &str,
) -> Result<Option<NftCacheData>, SyncError> {
    let row = get_nft_cache_row(conn, &address.to_lowercase())
        .await
        .map_err(err_from!())?;
    match row {
        Some(row) => match NftCacheData::from_dao(&row) {
            Ok(data) => Ok(Some(data)),
            Err(err) => {
                log::warn!("Discarding unreadable NFT cache of {}: {}", row.address, err);
                Ok(None)
            }
        },
        None => Ok(None),
    }
}

/// Replaces the whole cache record of `data.address`.
pub async fn save_nft_cache(conn: &mut SqliteConnection, data: &NftCacheData) -> Result<(), SyncError> {
    let dao = data.to_dao()?;
    replace_nft_cache_row(conn, &dao)
        .await
        .map_err(err_from!())?;
    log::debug!(
        "Saved {} NFTs for {} at block {}",
        data.nfts.len(),
        dao.address,
        data.last_block_number
    );
    Ok(())
}

pub async fn clear_nft_cache(conn: &mut SqliteConnection, address: &str) -> Result<(), SyncError> {
    delete_nft_cache_row(conn, &address.to_lowercase())
        .await
        .map_err(err_from!())
}

pub async fn get_cached_nft_metadata(
    conn: &mut SqliteConnection,
    contract: &str,
    token_id: &str,
) -> Result<Option<CachedMetadata>, SyncError> {
    let row = get_nft_metadata_row(conn, &contract.to_lowercase(), token_id)
        .await
        .map_err(err_from!())?;
    let Some(row) = row else {
        return Ok(None);
    };
    match serde_json::from_str(&row.metadata) {
        Ok(metadata) => Ok(Some(CachedMetadata {
            metadata,
            updated_at: row.updated_at,
        })),
        Err(err) => {
            log::warn!(
                "Ignoring unreadable metadata of token {} ({}): {}",
                token_id,
                row.contract_addr,
                err
            );
            Ok(None)
        }
    }
}

pub async fn save_nft_metadata(
    conn: &mut SqliteConnection,
    contract: &str,
    token_id: &str,
    metadata: &serde_json::Value,
    updated_at: i64,
) -> Result<(), SyncError> {
    upsert_nft_metadata_row(
        conn,
        &NftMetadataDao {
            contract_addr: contract.to_lowercase(),
            token_id: token_id.to_string(),
            metadata: serde_json::to_string(metadata)?,
            updated_at,
        },
    )
    .await
    .map_err(err_from!())
}

/// True when a Transfer touching `address` was emitted after `since_block`.
pub async fn has_new_transfer_events(
    client: &dyn ChainClient,
    contract: Address,
    address: Address,
    since_block: u64,
) -> Result<bool, SyncError> {
    let latest = client.block_number().await?;
    has_transfer_events_between(client, contract, address, since_block, latest).await
}

/// True when a Transfer touching `address` was emitted in `(since_block, latest]`.
pub async fn has_transfer_events_between(
    client: &dyn ChainClient,
    contract: Address,
    address: Address,
    since_block: u64,
    latest: u64,
) -> Result<bool, SyncError> {
    if latest <= since_block {
        return Ok(false);
    }
    let from_block = since_block + 1;
    let (inbound, outbound) = futures::future::try_join(
        client.transfer_logs(TransferFilter::inbound(contract, address, from_block, latest)),
        client.transfer_logs(TransferFilter::outbound(contract, address, from_block, latest)),
    )
    .await?;
    let found = !inbound.is_empty() || !outbound.is_empty();
    if found {
        log::debug!(
            "{} new transfer events for {} in blocks {}..={}",
            inbound.len() + outbound.len(),
            address_key(&address),
            from_block,
            latest
        );
    }
    Ok(found)
}
