//! NFT ownership resolution for a single ERC-721 contract.
//!
//! Ownership is reconstructed from Transfer logs, then confirmed with
//! `ownerOf`. Logs alone are not trusted: a token can be received, sent and
//! received again inside one scanned range. When the result still falls short
//! of `balanceOf`, a bounded probe over low token ids fills the gap.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use sqlx::SqliteConnection;
use web3::types::{Address, H256, U256};

use crate::client::{ChainClient, SigningClient, TransferFilter, TransferLog};
use crate::config::NftSettings;
use crate::contracts::encode_erc721_transfer_from;
use crate::error::SyncError;
use crate::eth::address_key;
use crate::metadata::{placeholder_image, MetadataResolver};
use crate::model::{Nft, NftCacheData};
use crate::nft_storage::{
    get_cached_nft_metadata, get_nft_cache, has_transfer_events_between, save_nft_cache,
    save_nft_metadata,
};
use crate::rpc_cache::{ReadTtl, RpcCache};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AddressState {
    Uninitialized,
    CachedFresh,
    CachedStale,
    Resolving,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NftResult {
    pub address: String,
    pub nfts: Vec<Nft>,
    pub balance: u64,
    pub last_block_number: u64,
    pub from_cache: bool,
    pub state: AddressState,
    pub error: Option<String>,
}

impl NftResult {
    fn from_cache(data: NftCacheData, state: AddressState, error: Option<String>) -> Self {
        NftResult {
            address: data.address,
            nfts: data.nfts,
            balance: data.balance,
            last_block_number: data.last_block_number,
            from_cache: true,
            state,
            error,
        }
    }
}

fn u256_to_u64_saturating(value: U256) -> u64 {
    if value > U256::from(u64::MAX) {
        u64::MAX
    } else {
        value.as_u64()
    }
}

/// Token ids with more inbound than outbound transfers.
pub fn tally_owned_candidates(inbound: &[TransferLog], outbound: &[TransferLog]) -> BTreeSet<U256> {
    let mut counts: HashMap<U256, i64> = HashMap::new();
    for log in inbound {
        *counts.entry(log.token_id).or_default() += 1;
    }
    for log in outbound {
        *counts.entry(log.token_id).or_default() -= 1;
    }
    counts
        .into_iter()
        .filter(|(_, count)| *count > 0)
        .map(|(token_id, _)| token_id)
        .collect()
}

/// Applies the transfers of an incremental range to a cached set.
///
/// Returns the updated set and the ids that moved both ways inside the range.
pub fn apply_transfers(
    cached: &BTreeSet<U256>,
    inbound: &[TransferLog],
    outbound: &[TransferLog],
) -> (BTreeSet<U256>, BTreeSet<U256>) {
    let received: BTreeSet<U256> = inbound.iter().map(|log| log.token_id).collect();
    let sent: BTreeSet<U256> = outbound.iter().map(|log| log.token_id).collect();
    let ambiguous: BTreeSet<U256> = received.intersection(&sent).copied().collect();
    let owned = cached
        .iter()
        .chain(received.iter())
        .filter(|id| !sent.contains(id))
        .copied()
        .collect();
    (owned, ambiguous)
}

pub struct NftResolver {
    client: Arc<dyn ChainClient>,
    cache: Arc<RpcCache>,
    metadata: MetadataResolver,
    contract: Address,
    settings: NftSettings,
    states: Mutex<HashMap<String, AddressState>>,
}

impl NftResolver {
    pub fn new(
        client: Arc<dyn ChainClient>,
        cache: Arc<RpcCache>,
        contract: Address,
        settings: NftSettings,
    ) -> Result<Self, SyncError> {
        let metadata = MetadataResolver::new(&settings.ipfs_gateway)?;
        Ok(NftResolver {
            client,
            cache,
            metadata,
            contract,
            settings,
            states: Mutex::new(HashMap::new()),
        })
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    pub fn state(&self, address: Address) -> AddressState {
        self.states
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&address_key(&address))
            .copied()
            .unwrap_or(AddressState::Uninitialized)
    }

    fn set_state(&self, address: Address, state: AddressState) {
        self.states
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(address_key(&address), state);
    }

    /// Resolves the NFTs of `address`, falling back to the cached set on any failure.
    pub async fn get_nfts(
        &self,
        conn: &mut SqliteConnection,
        address: Address,
        force: bool,
    ) -> NftResult {
        match self.resolve(conn, address, force).await {
            Ok(result) => {
                self.set_state(address, AddressState::CachedFresh);
                result
            }
            Err(err) => {
                let key = address_key(&address);
                log::error!("NFT resolution for {} failed, serving cache: {}", key, err);
                self.set_state(address, AddressState::CachedStale);
                let cached = get_nft_cache(conn, &key).await.unwrap_or_else(|db_err| {
                    log::error!("Failed to read NFT cache of {}: {}", key, db_err);
                    None
                });
                match cached {
                    Some(data) => NftResult::from_cache(
                        data,
                        AddressState::CachedStale,
                        Some(err.to_string()),
                    ),
                    None => NftResult {
                        address: key,
                        nfts: vec![],
                        balance: 0,
                        last_block_number: 0,
                        from_cache: false,
                        state: AddressState::CachedStale,
                        error: Some(err.to_string()),
                    },
                }
            }
        }
    }

    async fn token_balance(&self, address: Address) -> Result<u64, SyncError> {
        let client = self.client.clone();
        let contract = self.contract;
        let balance = self
            .cache
            .cached_read_contract(
                contract,
                "balanceOf",
                &address_key(&address),
                ReadTtl::Custom(self.cache.ttls().balance),
                move || async move { client.token_balance(contract, address).await },
            )
            .await?;
        Ok(u256_to_u64_saturating(balance))
    }

    async fn block_number(&self) -> Result<u64, SyncError> {
        let client = self.client.clone();
        self.cache
            .cached_get_block_number(move || async move { client.block_number().await })
            .await
    }

    async fn resolve(
        &self,
        conn: &mut SqliteConnection,
        address: Address,
        force: bool,
    ) -> Result<NftResult, SyncError> {
        let key = address_key(&address);
        let contract_key = address_key(&self.contract);
        let balance = self.token_balance(address).await?;
        let cached = get_nft_cache(conn, &key)
            .await?
            .filter(|data| data.contract_address == contract_key);

        let mut latest_block = None;
        if let (Some(data), false) = (&cached, force) {
            let latest = self.client.block_number().await?;
            latest_block = Some(latest);
            let complete = data.nfts.len() as u64 == data.balance;
            if complete
                && data.balance == balance
                && !has_transfer_events_between(
                    self.client.as_ref(),
                    self.contract,
                    address,
                    data.last_block_number,
                    latest,
                )
                .await?
            {
                log::debug!("NFT cache of {} is fresh ({} tokens)", key, data.nfts.len());
                return Ok(NftResult::from_cache(
                    data.clone(),
                    AddressState::CachedFresh,
                    None,
                ));
            }
            log::info!(
                "NFT cache of {} is stale (cached {} of balance {}, chain balance {})",
                key,
                data.nfts.len(),
                data.balance,
                balance
            );
            self.set_state(address, AddressState::CachedStale);
        }
        self.set_state(address, AddressState::Resolving);

        let current_block = match latest_block {
            Some(latest) => latest,
            None => self.block_number().await?,
        };
        if balance == 0 {
            return self
                .persist(conn, address, BTreeSet::new(), current_block, 0)
                .await;
        }

        // a set that fell short of its balance is rebuilt from genesis
        let incremental_base = cached
            .as_ref()
            .filter(|data| !force && data.nfts.len() as u64 == data.balance);
        let mut owned = match incremental_base {
            None => {
                let (inbound, outbound) = self.scan(address, 0, current_block).await?;
                let candidates = tally_owned_candidates(&inbound, &outbound);
                log::info!(
                    "Full scan of {} found {} candidate tokens in {} transfers",
                    key,
                    candidates.len(),
                    inbound.len() + outbound.len()
                );
                self.verify_ownership(address, &candidates).await?
            }
            Some(data) => {
                let cached_ids: BTreeSet<U256> = data
                    .nfts
                    .iter()
                    .filter_map(|nft| U256::from_dec_str(&nft.token_id).ok())
                    .collect();
                let from_block = data.last_block_number + 1;
                let (inbound, outbound) = if from_block > current_block {
                    (vec![], vec![])
                } else {
                    self.scan(address, from_block, current_block).await?
                };
                let (mut candidates, ambiguous) =
                    apply_transfers(&cached_ids, &inbound, &outbound);
                candidates.extend(ambiguous.iter().copied());
                // cached ids are re-checked as well
                let owned = self.verify_ownership(address, &candidates).await?;
                log::info!(
                    "Incremental scan of {} from block {}: {} received, {} sent, {} ambiguous, {} owned",
                    key,
                    from_block,
                    inbound.len(),
                    outbound.len(),
                    ambiguous.len(),
                    owned.len()
                );
                owned
            }
        };

        if (owned.len() as u64) < balance {
            let found = self.probe(address, &owned, balance).await?;
            owned.extend(found);
        }
        if (owned.len() as u64) != balance {
            log::warn!(
                "Resolved {} tokens for {} but balanceOf reports {}",
                owned.len(),
                key,
                balance
            );
        }

        self.persist(conn, address, owned, current_block, balance)
            .await
    }

    async fn scan(
        &self,
        address: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<(Vec<TransferLog>, Vec<TransferLog>), SyncError> {
        futures::future::try_join(
            self.client.transfer_logs(TransferFilter::inbound(
                self.contract,
                address,
                from_block,
                to_block,
            )),
            self.client.transfer_logs(TransferFilter::outbound(
                self.contract,
                address,
                from_block,
                to_block,
            )),
        )
        .await
    }

    /// Ids whose `ownerOf` is `address`. Reverts count as not owned, any other error propagates.
    async fn check_owners(
        &self,
        address: Address,
        ids: &[U256],
    ) -> Result<Vec<U256>, SyncError> {
        let results = futures::future::join_all(
            ids.iter()
                .map(|id| self.client.owner_of(self.contract, *id)),
        )
        .await;
        let mut owned = Vec::new();
        for (id, result) in ids.iter().zip(results) {
            match result {
                Ok(owner) if owner == address => owned.push(*id),
                Ok(_) => {}
                Err(err) if err.is_revert() => log::debug!("ownerOf({}) reverted: {}", id, err),
                Err(err) => return Err(err),
            }
        }
        Ok(owned)
    }

    async fn verify_ownership(
        &self,
        address: Address,
        candidates: &BTreeSet<U256>,
    ) -> Result<BTreeSet<U256>, SyncError> {
        let ids: Vec<U256> = candidates.iter().copied().collect();
        let mut owned = BTreeSet::new();
        for batch in ids.chunks(self.settings.verify_batch_size.max(1)) {
            owned.extend(self.check_owners(address, batch).await?);
        }
        if owned.len() != candidates.len() {
            log::debug!(
                "Ownership verification kept {} of {} candidates",
                owned.len(),
                candidates.len()
            );
        }
        Ok(owned)
    }

    async fn probe(
        &self,
        address: Address,
        known: &BTreeSet<U256>,
        balance: u64,
    ) -> Result<BTreeSet<U256>, SyncError> {
        let start = self.settings.probe_start;
        let ids: Vec<U256> = (start..start.saturating_add(self.settings.probe_limit))
            .map(U256::from)
            .filter(|id| !known.contains(id))
            .collect();
        log::info!(
            "Probing up to {} token ids for {} ({} of {} found)",
            ids.len(),
            address_key(&address),
            known.len(),
            balance
        );
        let mut found = BTreeSet::new();
        for batch in ids.chunks(self.settings.probe_batch_size.max(1)) {
            found.extend(self.check_owners(address, batch).await?);
            if (known.len() + found.len()) as u64 >= balance {
                break;
            }
        }
        Ok(found)
    }

    async fn token_metadata(&self, token_id: U256) -> serde_json::Value {
        let client = self.client.clone();
        let contract = self.contract;
        let uri = self
            .cache
            .cached_read_contract(
                contract,
                "tokenURI",
                &token_id.to_string(),
                ReadTtl::Metadata,
                move || async move { client.token_uri(contract, token_id).await },
            )
            .await;
        let uri = match uri {
            Ok(uri) => uri,
            Err(err) => {
                log::debug!("tokenURI({}) unavailable: {}", token_id, err);
                return serde_json::Value::Null;
            }
        };
        match self.metadata.resolve(&uri).await {
            Ok(metadata) => metadata,
            Err(err) => {
                log::warn!("Metadata of token {} could not be loaded: {}", token_id, err);
                serde_json::Value::Null
            }
        }
    }

    async fn build_nft(
        &self,
        conn: &mut SqliteConnection,
        owner: &str,
        token_id: U256,
        now: i64,
    ) -> Result<Nft, SyncError> {
        let contract_key = address_key(&self.contract);
        let id = token_id.to_string();
        let metadata = match get_cached_nft_metadata(conn, &contract_key, &id).await? {
            Some(cached) => cached.metadata,
            None => {
                let metadata = self.token_metadata(token_id).await;
                if !metadata.is_null() {
                    save_nft_metadata(conn, &contract_key, &id, &metadata, now).await?;
                }
                metadata
            }
        };
        let (name, description, image) = if metadata.is_null() {
            (format!("Token #{}", id), String::new(), placeholder_image(&id))
        } else {
            let display = self.metadata.display(&id, &metadata);
            (display.name, display.description, display.image)
        };
        Ok(Nft {
            id: id.clone(),
            token_id: id,
            contract_address: contract_key,
            name,
            description,
            image,
            owner: owner.to_string(),
            metadata,
        })
    }

    async fn persist(
        &self,
        conn: &mut SqliteConnection,
        address: Address,
        owned: BTreeSet<U256>,
        current_block: u64,
        balance: u64,
    ) -> Result<NftResult, SyncError> {
        let key = address_key(&address);
        let now = chrono::Utc::now().timestamp();
        let mut nfts = Vec::with_capacity(owned.len());
        for token_id in owned {
            nfts.push(self.build_nft(conn, &key, token_id, now).await?);
        }
        let data = NftCacheData {
            address: key,
            contract_address: address_key(&self.contract),
            nfts,
            last_updated: now,
            last_block_number: current_block,
            balance,
        };
        save_nft_cache(conn, &data).await?;
        log::info!(
            "Resolved {} NFTs for {} at block {}",
            data.nfts.len(),
            data.address,
            current_block
        );
        Ok(NftResult {
            address: data.address,
            nfts: data.nfts,
            balance,
            last_block_number: current_block,
            from_cache: false,
            state: AddressState::CachedFresh,
            error: None,
        })
    }
}

/// Sends `token_id` from the signer to `to`. Refuses early when the signer does not own it.
pub async fn transfer_nft(
    client: &dyn SigningClient,
    contract: Address,
    to: Address,
    token_id: U256,
) -> Result<H256, SyncError> {
    if to.is_zero() {
        return Err(SyncError::InvalidInput(
            "Refusing to transfer to the zero address".to_string(),
        ));
    }
    let signer = client.signer_address();
    let owner = client.owner_of(contract, token_id).await?;
    if owner != signer {
        return Err(SyncError::InvalidInput(format!(
            "not token owner: {} is owned by {}",
            token_id,
            address_key(&owner)
        )));
    }
    let data = encode_erc721_transfer_from(signer, to, token_id)?;
    let tx_hash = client.send_transaction(contract, data, U256::zero()).await?;
    log::info!(
        "Sent token {} from {} to {} in {:#x}",
        token_id,
        address_key(&signer),
        address_key(&to),
        tx_hash
    );
    Ok(tx_hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(token_id: u64) -> TransferLog {
        TransferLog {
            from: Address::zero(),
            to: Address::zero(),
            token_id: U256::from(token_id),
            block_number: 1,
            log_index: 0,
            tx_hash: None,
        }
    }

    fn ids(values: &[u64]) -> BTreeSet<U256> {
        values.iter().map(|v| U256::from(*v)).collect()
    }

    #[test]
    fn test_tally_counts_repeated_transfers() {
        let inbound = vec![log(1), log(2), log(2), log(3)];
        let outbound = vec![log(2), log(3)];
        assert_eq!(tally_owned_candidates(&inbound, &outbound), ids(&[1, 2]));
    }

    #[test]
    fn test_apply_transfers() {
        let (owned, ambiguous) = apply_transfers(&ids(&[1, 2, 3]), &[], &[log(2)]);
        assert_eq!(owned, ids(&[1, 3]));
        assert!(ambiguous.is_empty());

        let (owned, ambiguous) = apply_transfers(&ids(&[1]), &[log(5)], &[log(5)]);
        assert_eq!(owned, ids(&[1]));
        assert_eq!(ambiguous, ids(&[5]));
    }
}
