use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::db::model::{NftCacheDao, TxHistoryDao};
use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Success,
    Failed,
    Pending,
    #[serde(rename = "self")]
    SelfTransfer,
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TxStatus::Success => "success",
            TxStatus::Failed => "failed",
            TxStatus::Pending => "pending",
            TxStatus::SelfTransfer => "self",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for TxStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(TxStatus::Success),
            "failed" => Ok(TxStatus::Failed),
            "pending" => Ok(TxStatus::Pending),
            "self" => Ok(TxStatus::SelfTransfer),
            other => Err(SyncError::ParsingError(format!(
                "Unknown transaction status: {}",
                other
            ))),
        }
    }
}

/// Transaction relative to the address it was queried for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub hash: String,
    pub from: String,
    pub to: Option<String>,
    /// Base currency units (ether), decimal string.
    pub value: String,
    pub timestamp: i64,
    pub block_number: u64,
    pub status: TxStatus,
    pub is_incoming: bool,
    #[serde(default)]
    pub gas_used: Option<u64>,
    #[serde(default)]
    pub gas_price: Option<u64>,
}

impl Transaction {
    pub fn to_dao(&self, address: &str) -> TxHistoryDao {
        TxHistoryDao {
            address: address.to_string(),
            tx_hash: self.hash.to_lowercase(),
            from_addr: self.from.clone(),
            to_addr: self.to.clone(),
            val: self.value.clone(),
            timestamp: self.timestamp,
            block_number: self.block_number as i64,
            status: self.status.to_string(),
            is_incoming: self.is_incoming,
            gas_used: self.gas_used.map(|g| g.to_string()),
            gas_price: self.gas_price.map(|g| g.to_string()),
        }
    }

    pub fn from_dao(dao: &TxHistoryDao) -> Result<Self, SyncError> {
        Ok(Transaction {
            hash: dao.tx_hash.clone(),
            from: dao.from_addr.clone(),
            to: dao.to_addr.clone(),
            value: dao.val.clone(),
            timestamp: dao.timestamp,
            block_number: dao.block_number.max(0) as u64,
            status: TxStatus::from_str(&dao.status)?,
            is_incoming: dao.is_incoming,
            gas_used: dao.gas_used.as_deref().and_then(|g| g.parse().ok()),
            gas_price: dao.gas_price.as_deref().and_then(|g| g.parse().ok()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceHistoryPoint {
    pub timestamp: i64,
    pub balance: String,
    #[serde(default)]
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Nft {
    pub id: String,
    pub token_id: String,
    pub contract_address: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NftCacheData {
    pub address: String,
    pub contract_address: String,
    pub nfts: Vec<Nft>,
    pub last_updated: i64,
    pub last_block_number: u64,
    pub balance: u64,
}

impl NftCacheData {
    pub fn to_dao(&self) -> Result<NftCacheDao, SyncError> {
        Ok(NftCacheDao {
            address: self.address.to_lowercase(),
            contract_addr: self.contract_address.to_lowercase(),
            nfts: serde_json::to_string(&self.nfts)?,
            last_updated: self.last_updated,
            last_block_number: self.last_block_number as i64,
            balance: self.balance as i64,
        })
    }

    pub fn from_dao(dao: &NftCacheDao) -> Result<Self, SyncError> {
        Ok(NftCacheData {
            address: dao.address.clone(),
            contract_address: dao.contract_addr.clone(),
            nfts: serde_json::from_str(&dao.nfts)?,
            last_updated: dao.last_updated,
            last_block_number: dao.last_block_number.max(0) as u64,
            balance: dao.balance.max(0) as u64,
        })
    }

    pub fn token_ids(&self) -> Vec<String> {
        self.nfts.iter().map(|nft| nft.token_id.clone()).collect()
    }
}
