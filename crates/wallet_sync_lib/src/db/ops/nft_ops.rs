use crate::db::model::*;
use sqlx::SqliteConnection;

pub async fn get_nft_cache_row(
    conn: &mut SqliteConnection,
    address: &str,
) -> Result<Option<NftCacheDao>, sqlx::Error> {
    let row = sqlx::query_as::<_, NftCacheDao>(r"SELECT * FROM nft_cache WHERE address = $1")
        .bind(address)
        .fetch_optional(conn)
        .await?;
    Ok(row)
}

/// Replaces the whole cache record of an address.
pub async fn replace_nft_cache_row(
    conn: &mut SqliteConnection,
    cache: &NftCacheDao,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r"INSERT OR REPLACE INTO nft_cache
(address, contract_addr, nfts, last_updated, last_block_number, balance)
VALUES ($1, $2, $3, $4, $5, $6)
",
    )
    .bind(&cache.address)
    .bind(&cache.contract_addr)
    .bind(&cache.nfts)
    .bind(cache.last_updated)
    .bind(cache.last_block_number)
    .bind(cache.balance)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn delete_nft_cache_row(
    conn: &mut SqliteConnection,
    address: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(r"DELETE FROM nft_cache WHERE address = $1")
        .bind(address)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn get_nft_metadata_row(
    conn: &mut SqliteConnection,
    contract_addr: &str,
    token_id: &str,
) -> Result<Option<NftMetadataDao>, sqlx::Error> {
    let row = sqlx::query_as::<_, NftMetadataDao>(
        r"SELECT * FROM nft_metadata WHERE contract_addr = $1 AND token_id = $2",
    )
    .bind(contract_addr)
    .bind(token_id)
    .fetch_optional(conn)
    .await?;
    Ok(row)
}

pub async fn upsert_nft_metadata_row(
    conn: &mut SqliteConnection,
    metadata: &NftMetadataDao,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r"INSERT OR REPLACE INTO nft_metadata
(contract_addr, token_id, metadata, updated_at)
VALUES ($1, $2, $3, $4)
",
    )
    .bind(&metadata.contract_addr)
    .bind(&metadata.token_id)
    .bind(&metadata.metadata)
    .bind(metadata.updated_at)
    .execute(conn)
    .await?;
    Ok(())
}
