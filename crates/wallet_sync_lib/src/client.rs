use async_trait::async_trait;
use secp256k1::SecretKey;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use web3::transports::Http;
use web3::types::{
    Address, BlockNumber, Bytes, CallRequest, FilterBuilder, Log, TransactionParameters, H256,
    U256, U64,
};
use web3::Web3;

use crate::contracts::{
    address_to_topic, decode_erc721_balance_of, decode_erc721_owner_of, decode_erc721_token_uri,
    encode_erc721_balance_of, encode_erc721_owner_of, encode_erc721_token_uri, topic_to_address,
    ERC721_TRANSFER_TOPIC,
};
use crate::err_from;
use crate::error::SyncError;
use crate::eth::{get_eth_addr_from_secret, validate_block_range};

/// ERC-721 Transfer event with all three arguments indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferLog {
    pub from: Address,
    pub to: Address,
    pub token_id: U256,
    pub block_number: u64,
    pub log_index: u64,
    pub tx_hash: Option<H256>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferFilter {
    pub contract: Address,
    pub from: Option<Address>,
    pub to: Option<Address>,
    pub from_block: u64,
    pub to_block: u64,
}

impl TransferFilter {
    pub fn inbound(contract: Address, to: Address, from_block: u64, to_block: u64) -> Self {
        TransferFilter {
            contract,
            from: None,
            to: Some(to),
            from_block,
            to_block,
        }
    }

    pub fn outbound(contract: Address, from: Address, from_block: u64, to_block: u64) -> Self {
        TransferFilter {
            contract,
            from: Some(from),
            to: None,
            from_block,
            to_block,
        }
    }
}

/// Read-only capabilities of a chain node.
///
/// The ERC-721 helpers have default implementations on top of [`ChainClient::call`].
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn block_number(&self) -> Result<u64, SyncError>;

    async fn balance(&self, address: Address) -> Result<U256, SyncError>;

    async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, SyncError>;

    async fn transfer_logs(&self, filter: TransferFilter) -> Result<Vec<TransferLog>, SyncError>;

    async fn token_balance(&self, contract: Address, owner: Address) -> Result<U256, SyncError> {
        let data = encode_erc721_balance_of(owner)?;
        let output = self.call(contract, data).await?;
        Ok(decode_erc721_balance_of(&output)?)
    }

    async fn owner_of(&self, contract: Address, token_id: U256) -> Result<Address, SyncError> {
        let data = encode_erc721_owner_of(token_id)?;
        let output = self.call(contract, data).await?;
        Ok(decode_erc721_owner_of(&output)?)
    }

    async fn token_uri(&self, contract: Address, token_id: U256) -> Result<String, SyncError> {
        let data = encode_erc721_token_uri(token_id)?;
        let output = self.call(contract, data).await?;
        Ok(decode_erc721_token_uri(&output)?)
    }
}

#[async_trait]
pub trait SigningClient: ChainClient {
    fn signer_address(&self) -> Address;

    async fn send_transaction(
        &self,
        to: Address,
        data: Vec<u8>,
        value: U256,
    ) -> Result<H256, SyncError>;
}

fn is_transient(err: &SyncError) -> bool {
    if err.is_rate_limited() {
        return false;
    }
    matches!(
        err,
        SyncError::Web3Error(web3::Error::Unreachable) | SyncError::Web3Error(web3::Error::Transport(_))
    )
}

fn parse_transfer_log(log: &Log) -> Option<TransferLog> {
    if log.topics.len() < 4 || log.topics[0] != *ERC721_TRANSFER_TOPIC {
        return None;
    }
    Some(TransferLog {
        from: topic_to_address(&log.topics[1]),
        to: topic_to_address(&log.topics[2]),
        token_id: U256::from_big_endian(log.topics[3].as_bytes()),
        block_number: log.block_number.map(|n| n.as_u64()).unwrap_or_default(),
        log_index: log.log_index.map(|i| i.as_u64()).unwrap_or_default(),
        tx_hash: log.transaction_hash,
    })
}

#[derive(Clone, Debug)]
pub struct Web3Client {
    web3: Web3<Http>,
    endpoint: String,
    retries: u32,
    retry_delay: Duration,
}

impl Web3Client {
    pub fn new(endpoint: &str, retries: u32, retry_delay: Duration) -> Result<Self, SyncError> {
        let transport = web3::transports::Http::new(endpoint).map_err(err_from!())?;
        Ok(Web3Client {
            web3: Web3::new(transport),
            endpoint: endpoint.to_string(),
            retries,
            retry_delay,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn with_transport_retry<T, F, Fut>(&self, method: &str, f: F) -> Result<T, SyncError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, web3::Error>>,
    {
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let err = SyncError::from(err);
                    if attempt >= self.retries || !is_transient(&err) {
                        return Err(err);
                    }
                    attempt += 1;
                    log::debug!(
                        "{} on {} failed ({}), transport retry {}/{}",
                        method,
                        self.endpoint,
                        err,
                        attempt,
                        self.retries
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }
}

#[async_trait]
impl ChainClient for Web3Client {
    async fn block_number(&self) -> Result<u64, SyncError> {
        let block = self
            .with_transport_retry("eth_blockNumber", || self.web3.eth().block_number())
            .await?;
        Ok(block.as_u64())
    }

    async fn balance(&self, address: Address) -> Result<U256, SyncError> {
        self.with_transport_retry("eth_getBalance", || self.web3.eth().balance(address, None))
            .await
    }

    async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, SyncError> {
        let call_request = CallRequest {
            from: None,
            to: Some(to),
            gas: None,
            gas_price: None,
            value: None,
            data: Some(Bytes(data)),
            transaction_type: None,
            access_list: None,
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
        };
        let res = self
            .with_transport_retry("eth_call", || {
                self.web3.eth().call(call_request.clone(), None)
            })
            .await?;
        Ok(res.0)
    }

    async fn transfer_logs(&self, filter: TransferFilter) -> Result<Vec<TransferLog>, SyncError> {
        validate_block_range(filter.from_block, filter.to_block)?;
        let log_filter = FilterBuilder::default()
            .address(vec![filter.contract])
            .from_block(BlockNumber::Number(U64::from(filter.from_block)))
            .to_block(BlockNumber::Number(U64::from(filter.to_block)))
            .topics(
                Some(vec![*ERC721_TRANSFER_TOPIC]),
                filter.from.map(|from| vec![address_to_topic(from)]),
                filter.to.map(|to| vec![address_to_topic(to)]),
                None,
            )
            .build();
        let logs = self
            .with_transport_retry("eth_getLogs", || self.web3.eth().logs(log_filter.clone()))
            .await?;
        let mut transfers: Vec<TransferLog> = logs.iter().filter_map(parse_transfer_log).collect();
        transfers.sort_by_key(|t| (t.block_number, t.log_index));
        log::debug!(
            "Found {} transfer logs on {} in blocks {}..={}",
            transfers.len(),
            self.endpoint,
            filter.from_block,
            filter.to_block
        );
        Ok(transfers)
    }
}

/// Web3 client holding a signing key; transactions are signed locally and broadcast raw.
#[derive(Clone, Debug)]
pub struct Web3SigningClient {
    inner: Web3Client,
    secret_key: SecretKey,
    address: Address,
    chain_id: u64,
}

impl Web3SigningClient {
    pub fn new(inner: Web3Client, secret_key: SecretKey, chain_id: u64) -> Self {
        Web3SigningClient {
            address: get_eth_addr_from_secret(&secret_key),
            inner,
            secret_key,
            chain_id,
        }
    }
}

#[async_trait]
impl ChainClient for Web3SigningClient {
    async fn block_number(&self) -> Result<u64, SyncError> {
        self.inner.block_number().await
    }

    async fn balance(&self, address: Address) -> Result<U256, SyncError> {
        self.inner.balance(address).await
    }

    async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, SyncError> {
        self.inner.call(to, data).await
    }

    async fn transfer_logs(&self, filter: TransferFilter) -> Result<Vec<TransferLog>, SyncError> {
        self.inner.transfer_logs(filter).await
    }
}

#[async_trait]
impl SigningClient for Web3SigningClient {
    fn signer_address(&self) -> Address {
        self.address
    }

    async fn send_transaction(
        &self,
        to: Address,
        data: Vec<u8>,
        value: U256,
    ) -> Result<H256, SyncError> {
        let call_request = CallRequest {
            from: Some(self.address),
            to: Some(to),
            gas: None,
            gas_price: None,
            value: Some(value),
            data: Some(Bytes(data.clone())),
            transaction_type: None,
            access_list: None,
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
        };
        let gas_est = self
            .inner
            .with_transport_retry("eth_estimateGas", || {
                self.inner.web3.eth().estimate_gas(call_request.clone(), None)
            })
            .await?;
        let add_gas_safety_margin: U256 = U256::from(20000);
        let gas_limit = gas_est + add_gas_safety_margin;

        let tx_object = TransactionParameters {
            to: Some(to),
            gas: gas_limit,
            value,
            data: Bytes(data),
            chain_id: Some(self.chain_id),
            ..Default::default()
        };
        log::debug!("Signing transaction: {:?}", tx_object);
        let signed = self
            .inner
            .web3
            .accounts()
            .sign_transaction(tx_object, &self.secret_key)
            .await
            .map_err(err_from!())?;
        let raw = signed.raw_transaction;
        let tx_hash = self
            .inner
            .with_transport_retry("eth_sendRawTransaction", || {
                self.inner.web3.eth().send_raw_transaction(raw.clone())
            })
            .await?;
        log::info!(
            "Transaction sent from {:#x} to {:#x}, tx hash: {:#x}",
            self.address,
            to,
            tx_hash
        );
        Ok(tx_hash)
    }
}
