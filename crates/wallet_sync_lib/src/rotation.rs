//! Endpoint rotation on rate limiting.
//!
//! [`RotatingClient`] implements the same client traits as the client it wraps.
//! Every call goes through [`RotatingClient::with_rotation`]: when the node answers
//! with HTTP 429 the shared round-robin index advances, a fresh client is built
//! for the next endpoint and the call is retried after `attempt * base_delay`.

use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use web3::types::{Address, H256, U256};

use crate::client::{ChainClient, SigningClient, TransferFilter, TransferLog};
use crate::err_custom_create;
use crate::error::SyncError;

pub const MAX_ROTATION_ATTEMPTS: usize = 3;

pub type ClientFactory<C> = Arc<dyn Fn(&str) -> Result<C, SyncError> + Send + Sync>;

pub struct RotatingClient<C> {
    endpoints: Vec<String>,
    index: Arc<AtomicUsize>,
    current: RwLock<(usize, Arc<C>)>,
    factory: ClientFactory<C>,
    base_delay: Duration,
    switches: AtomicU64,
}

impl<C> RotatingClient<C>
where
    C: Send + Sync + 'static,
{
    pub fn new(
        endpoints: Vec<String>,
        factory: ClientFactory<C>,
        base_delay: Duration,
    ) -> Result<Self, SyncError> {
        Self::with_shared_index(endpoints, factory, base_delay, Arc::new(AtomicUsize::new(0)))
    }

    /// Builds a client that rotates through the same round-robin index as other clients.
    pub fn with_shared_index(
        endpoints: Vec<String>,
        factory: ClientFactory<C>,
        base_delay: Duration,
        index: Arc<AtomicUsize>,
    ) -> Result<Self, SyncError> {
        if endpoints.is_empty() {
            return Err(err_custom_create!("No rpc endpoints to rotate through"));
        }
        let position = index.load(Ordering::SeqCst) % endpoints.len();
        let client = factory(&endpoints[position])?;
        Ok(RotatingClient {
            endpoints,
            index,
            current: RwLock::new((position, Arc::new(client))),
            factory,
            base_delay,
            switches: AtomicU64::new(0),
        })
    }

    pub fn shared_index(&self) -> Arc<AtomicUsize> {
        self.index.clone()
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    pub fn current_endpoint(&self) -> String {
        let position = self
            .current
            .read()
            .map(|current| current.0)
            .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        self.endpoints[position].clone()
    }

    pub fn switch_count(&self) -> u64 {
        self.switches.load(Ordering::SeqCst)
    }

    fn current(&self) -> Arc<C> {
        match self.current.read() {
            Ok(current) => current.1.clone(),
            Err(poisoned) => poisoned.into_inner().1.clone(),
        }
    }

    fn rotate(&self) -> Result<(), SyncError> {
        let next = (self.index.fetch_add(1, Ordering::SeqCst) + 1) % self.endpoints.len();
        let client = (self.factory)(&self.endpoints[next])?;
        let mut current = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *current = (next, Arc::new(client));
        self.switches.fetch_add(1, Ordering::SeqCst);
        log::warn!("Switched rpc endpoint to {}", self.endpoints[next]);
        Ok(())
    }

    pub async fn with_rotation<T, F, Fut>(&self, method: &str, f: F) -> Result<T, SyncError>
    where
        F: Fn(Arc<C>) -> Fut + Send,
        Fut: Future<Output = Result<T, SyncError>> + Send,
    {
        let max_attempts = self.endpoints.len().min(MAX_ROTATION_ATTEMPTS);
        let mut last_err = None;
        for attempt in 1..=max_attempts {
            match f(self.current()).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_rate_limited() => {
                    log::warn!(
                        "{} rate limited on {} (attempt {}/{})",
                        method,
                        self.current_endpoint(),
                        attempt,
                        max_attempts
                    );
                    last_err = Some(err);
                    if attempt < max_attempts {
                        self.rotate()?;
                        tokio::time::sleep(self.base_delay * attempt as u32).await;
                    }
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err.unwrap_or_else(|| err_custom_create!("{} failed without attempts", method)))
    }
}

#[async_trait]
impl<C> ChainClient for RotatingClient<C>
where
    C: ChainClient + 'static,
{
    async fn block_number(&self) -> Result<u64, SyncError> {
        self.with_rotation("block_number", |client| async move {
            client.block_number().await
        })
        .await
    }

    async fn balance(&self, address: Address) -> Result<U256, SyncError> {
        self.with_rotation("balance", |client| async move { client.balance(address).await })
            .await
    }

    async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, SyncError> {
        self.with_rotation("call", |client| {
            let data = data.clone();
            async move { client.call(to, data).await }
        })
        .await
    }

    async fn transfer_logs(&self, filter: TransferFilter) -> Result<Vec<TransferLog>, SyncError> {
        self.with_rotation("transfer_logs", |client| async move {
            client.transfer_logs(filter).await
        })
        .await
    }

    async fn token_balance(&self, contract: Address, owner: Address) -> Result<U256, SyncError> {
        self.with_rotation("token_balance", |client| async move {
            client.token_balance(contract, owner).await
        })
        .await
    }

    async fn owner_of(&self, contract: Address, token_id: U256) -> Result<Address, SyncError> {
        self.with_rotation("owner_of", |client| async move {
            client.owner_of(contract, token_id).await
        })
        .await
    }

    async fn token_uri(&self, contract: Address, token_id: U256) -> Result<String, SyncError> {
        self.with_rotation("token_uri", |client| async move {
            client.token_uri(contract, token_id).await
        })
        .await
    }
}

#[async_trait]
impl<C> SigningClient for RotatingClient<C>
where
    C: SigningClient + 'static,
{
    fn signer_address(&self) -> Address {
        self.current().signer_address()
    }

    async fn send_transaction(
        &self,
        to: Address,
        data: Vec<u8>,
        value: U256,
    ) -> Result<H256, SyncError> {
        self.with_rotation("send_transaction", |client| {
            let data = data.clone();
            async move { client.send_transaction(to, data, value).await }
        })
        .await
    }
}
