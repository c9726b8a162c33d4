use serde::Serialize;

#[derive(Serialize, sqlx::FromRow, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TxHistoryDao {
    pub address: String,
    pub tx_hash: String,
    pub from_addr: String,
    pub to_addr: Option<String>,
    pub val: String,
    pub timestamp: i64,
    pub block_number: i64,
    pub status: String,
    pub is_incoming: bool,
    pub gas_used: Option<String>,
    pub gas_price: Option<String>,
}

#[derive(Serialize, sqlx::FromRow, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSnapshotDao {
    pub id: i64,
    pub address: String,
    pub timestamp: i64,
    pub balance: String,
}

#[derive(Serialize, sqlx::FromRow, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CalculatedHistoryDao {
    pub address: String,
    pub points: String,
    pub balance: String,
    pub tx_count: i64,
    pub computed_at: i64,
}

#[derive(Serialize, sqlx::FromRow, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NftCacheDao {
    pub address: String,
    pub contract_addr: String,
    pub nfts: String,
    pub last_updated: i64,
    pub last_block_number: i64,
    pub balance: i64,
}

#[derive(Serialize, sqlx::FromRow, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NftMetadataDao {
    pub contract_addr: String,
    pub token_id: String,
    pub metadata: String,
    pub updated_at: i64,
}
