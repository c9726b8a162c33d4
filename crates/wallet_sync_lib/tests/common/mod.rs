#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use web3::types::{Address, U256};

use wallet_sync_lib::client::{ChainClient, TransferFilter, TransferLog};
use wallet_sync_lib::error::SyncError;

pub fn addr(n: u64) -> Address {
    Address::from_low_u64_be(n)
}

pub fn rate_limited() -> SyncError {
    SyncError::Web3Error(web3::Error::Transport(
        web3::error::TransportError::Code(429),
    ))
}

/// In-memory ERC-721 contract and node.
#[derive(Default)]
pub struct MockChain {
    pub block: AtomicU64,
    pub balances: Mutex<HashMap<Address, U256>>,
    pub owners: Mutex<HashMap<U256, Address>>,
    pub logs: Mutex<Vec<TransferLog>>,
    pub token_uris: Mutex<HashMap<U256, String>>,
    pub failing: AtomicBool,
    /// Token ids whose next `owner_of` fails with a connection error.
    pub unreachable_once: Mutex<HashSet<U256>>,
    calls: Mutex<HashMap<&'static str, usize>>,
}

impl MockChain {
    pub fn new(block: u64) -> Self {
        let chain = MockChain::default();
        chain.block.store(block, Ordering::SeqCst);
        chain
    }

    fn record(&self, method: &'static str) -> Result<(), SyncError> {
        *self.calls.lock().unwrap().entry(method).or_default() += 1;
        if self.failing.load(Ordering::SeqCst) {
            return Err(SyncError::OtherError("node unavailable".to_string()));
        }
        Ok(())
    }

    pub fn calls(&self, method: &str) -> usize {
        self.calls.lock().unwrap().get(method).copied().unwrap_or(0)
    }

    pub fn set_owner(&self, token_id: u64, owner: Address) {
        self.owners.lock().unwrap().insert(U256::from(token_id), owner);
    }

    /// Records a Transfer log and moves the token.
    pub fn transfer(&self, from: Address, to: Address, token_id: u64, block_number: u64) {
        let mut logs = self.logs.lock().unwrap();
        let log_index = logs.len() as u64;
        logs.push(TransferLog {
            from,
            to,
            token_id: U256::from(token_id),
            block_number,
            log_index,
            tx_hash: None,
        });
        self.set_owner(token_id, to);
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn block_number(&self) -> Result<u64, SyncError> {
        self.record("block_number")?;
        Ok(self.block.load(Ordering::SeqCst))
    }

    async fn balance(&self, address: Address) -> Result<U256, SyncError> {
        self.record("balance")?;
        Ok(self
            .balances
            .lock()
            .unwrap()
            .get(&address)
            .copied()
            .unwrap_or_default())
    }

    async fn call(&self, _to: Address, _data: Vec<u8>) -> Result<Vec<u8>, SyncError> {
        Err(SyncError::OtherError("raw calls are not mocked".to_string()))
    }

    async fn transfer_logs(&self, filter: TransferFilter) -> Result<Vec<TransferLog>, SyncError> {
        self.record("transfer_logs")?;
        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|log| log.block_number >= filter.from_block && log.block_number <= filter.to_block)
            .filter(|log| filter.from.map_or(true, |from| log.from == from))
            .filter(|log| filter.to.map_or(true, |to| log.to == to))
            .cloned()
            .collect())
    }

    async fn token_balance(&self, _contract: Address, owner: Address) -> Result<U256, SyncError> {
        self.record("token_balance")?;
        let count = self
            .owners
            .lock()
            .unwrap()
            .values()
            .filter(|o| **o == owner)
            .count();
        Ok(U256::from(count))
    }

    async fn owner_of(&self, _contract: Address, token_id: U256) -> Result<Address, SyncError> {
        self.record("owner_of")?;
        if self.unreachable_once.lock().unwrap().remove(&token_id) {
            return Err(SyncError::Web3Error(web3::Error::Unreachable));
        }
        self.owners
            .lock()
            .unwrap()
            .get(&token_id)
            .copied()
            .ok_or_else(|| SyncError::OtherError("execution reverted: ERC721: invalid token ID".to_string()))
    }

    async fn token_uri(&self, _contract: Address, token_id: U256) -> Result<String, SyncError> {
        self.record("token_uri")?;
        self.token_uris
            .lock()
            .unwrap()
            .get(&token_id)
            .cloned()
            .ok_or_else(|| SyncError::OtherError("execution reverted".to_string()))
    }
}
