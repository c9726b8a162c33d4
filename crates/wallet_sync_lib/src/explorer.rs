//! Block-explorer (Etherscan compatible) transaction history client.
//!
//! Explorer rows are parsed into [`Transaction`] here and nowhere else.

use async_trait::async_trait;
use serde::Deserialize;
use web3::types::Address;

use crate::error::SyncError;
use crate::eth::address_key;
use crate::model::{Transaction, TxStatus};
use crate::utils::wei_str_to_eth;

pub const MISSING_API_KEY_MESSAGE: &str =
    "Set ETHERSCAN_API_KEY to load transaction history from the block explorer";

const MAX_PAGES: u64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TxListQuery {
    pub start_block: u64,
    pub end_block: u64,
    pub page: u64,
    pub offset: u64,
    pub sort: SortOrder,
}

/// Source of transaction history for an address.
#[async_trait]
pub trait TransactionSource: Send + Sync {
    fn is_enabled(&self) -> bool;

    /// All transactions of `address` from `start_block` on, newest first.
    async fn fetch_transactions(
        &self,
        address: Address,
        start_block: u64,
    ) -> Result<Vec<Transaction>, SyncError>;
}

#[derive(Deserialize, Debug)]
struct ExplorerResponse {
    status: String,
    message: String,
    result: serde_json::Value,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
struct ExplorerTx {
    hash: String,
    block_number: String,
    time_stamp: String,
    from: String,
    #[serde(default)]
    to: String,
    value: String,
    #[serde(default)]
    is_error: String,
    #[serde(default, rename = "txreceipt_status")]
    tx_receipt_status: String,
    #[serde(default)]
    gas_used: String,
    #[serde(default)]
    gas_price: String,
}

fn parse_u64_field(name: &str, value: &str) -> Result<u64, SyncError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| SyncError::ParsingError(format!("Invalid {} in explorer row: {}", name, value)))
}

fn normalize_tx(raw: &ExplorerTx, address: &str) -> Result<Transaction, SyncError> {
    let from = raw.from.to_lowercase();
    let to = if raw.to.trim().is_empty() {
        None
    } else {
        Some(raw.to.to_lowercase())
    };
    let is_self = from == address && to.as_deref() == Some(address);
    let status = if raw.is_error == "1" || raw.tx_receipt_status == "0" {
        TxStatus::Failed
    } else if is_self {
        TxStatus::SelfTransfer
    } else {
        TxStatus::Success
    };
    Ok(Transaction {
        hash: raw.hash.to_lowercase(),
        is_incoming: to.as_deref() == Some(address) && !is_self,
        from,
        to,
        value: wei_str_to_eth(&raw.value)?.to_string(),
        timestamp: parse_u64_field("timeStamp", &raw.time_stamp)? as i64,
        block_number: parse_u64_field("blockNumber", &raw.block_number)?,
        status,
        gas_used: raw.gas_used.trim().parse().ok(),
        gas_price: raw.gas_price.trim().parse().ok(),
    })
}

fn parse_tx_list(body: &str, address: &str) -> Result<Vec<Transaction>, SyncError> {
    let response: ExplorerResponse = serde_json::from_str(body)?;
    if response.status != "1" {
        if response.message.starts_with("No transactions found") {
            return Ok(vec![]);
        }
        let detail = response
            .result
            .as_str()
            .map(|s| s.to_string())
            .unwrap_or_default();
        let msg = format!("{} {}", response.message, detail);
        if msg.to_lowercase().contains("rate limit") {
            return Err(SyncError::RateLimited(msg));
        }
        return Err(SyncError::ExplorerError(msg.trim().to_string()));
    }
    let rows: Vec<ExplorerTx> = serde_json::from_value(response.result)?;
    rows.iter().map(|row| normalize_tx(row, address)).collect()
}

pub struct ExplorerClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    page_size: u64,
}

impl ExplorerClient {
    pub fn new(base_url: &str, api_key: Option<String>, page_size: u64) -> Self {
        ExplorerClient {
            http: reqwest::Client::new(),
            base_url: base_url.to_string(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            page_size: page_size.max(1),
        }
    }

    pub async fn fetch_tx_list(
        &self,
        address: Address,
        query: TxListQuery,
    ) -> Result<Vec<Transaction>, SyncError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| SyncError::ExplorerDisabled(MISSING_API_KEY_MESSAGE.to_string()))?;
        let address = address_key(&address);
        let params = [
            ("module", "account".to_string()),
            ("action", "txlist".to_string()),
            ("address", address.clone()),
            ("startblock", query.start_block.to_string()),
            ("endblock", query.end_block.to_string()),
            ("page", query.page.to_string()),
            ("offset", query.offset.to_string()),
            ("sort", query.sort.as_str().to_string()),
            ("apikey", api_key.clone()),
        ];
        log::debug!(
            "Fetching explorer txlist for {} from block {} page {}",
            address,
            query.start_block,
            query.page
        );
        let response = self
            .http
            .get(&self.base_url)
            .query(&params)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(SyncError::RateLimited(format!(
                "Explorer responded with {}",
                response.status()
            )));
        }
        let body = response.error_for_status()?.text().await?;
        parse_tx_list(&body, &address)
    }
}

#[async_trait]
impl TransactionSource for ExplorerClient {
    fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    async fn fetch_transactions(
        &self,
        address: Address,
        start_block: u64,
    ) -> Result<Vec<Transaction>, SyncError> {
        let (all, complete) = collect_pages(self.page_size, MAX_PAGES, |page| {
            self.fetch_tx_list(
                address,
                TxListQuery {
                    start_block,
                    end_block: 99_999_999,
                    page,
                    offset: self.page_size,
                    sort: SortOrder::Desc,
                },
            )
        })
        .await?;
        if !complete {
            log::warn!(
                "Explorer history of {} cut off after {} pages of {} rows",
                address_key(&address),
                MAX_PAGES,
                self.page_size
            );
        }
        Ok(all)
    }
}

/// Fetches pages `1..=max_pages` until one comes back short.
///
/// The flag is false when the last fetched page was still full.
async fn collect_pages<F, Fut>(
    page_size: u64,
    max_pages: u64,
    mut fetch_page: F,
) -> Result<(Vec<Transaction>, bool), SyncError>
where
    F: FnMut(u64) -> Fut,
    Fut: std::future::Future<Output = Result<Vec<Transaction>, SyncError>>,
{
    let mut all = Vec::new();
    for page in 1..=max_pages {
        let batch = fetch_page(page).await?;
        let done = (batch.len() as u64) < page_size;
        all.extend(batch);
        if done {
            return Ok((all, true));
        }
    }
    Ok((all, false))
}
