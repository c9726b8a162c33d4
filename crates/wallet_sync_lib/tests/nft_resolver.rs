mod common;

use base64::Engine;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use web3::types::U256;

use common::{addr, MockChain};
use wallet_sync_lib::config::NftSettings;
use wallet_sync_lib::db::create_sqlite_connection;
use wallet_sync_lib::eth::address_key;
use wallet_sync_lib::model::{Nft, NftCacheData};
use wallet_sync_lib::nft::{AddressState, NftResolver};
use wallet_sync_lib::nft_storage::{
    get_cached_nft_metadata, get_nft_cache, has_new_transfer_events, save_nft_cache,
};
use wallet_sync_lib::rpc_cache::RpcCache;

fn contract() -> web3::types::Address {
    addr(0xc0ffee)
}

fn resolver(chain: &Arc<MockChain>) -> NftResolver {
    resolver_with_cache(chain, Arc::new(RpcCache::default()))
}

fn resolver_with_cache(chain: &Arc<MockChain>, cache: Arc<RpcCache>) -> NftResolver {
    NftResolver::new(chain.clone(), cache, contract(), NftSettings::default()).unwrap()
}

fn token_ids(nfts: &[Nft]) -> Vec<String> {
    nfts.iter().map(|nft| nft.token_id.clone()).collect()
}

fn cache_data(owner_key: &str, ids: &[&str], block: u64) -> NftCacheData {
    NftCacheData {
        address: owner_key.to_string(),
        contract_address: address_key(&contract()),
        nfts: ids.iter().map(|id| cached_nft(id, owner_key)).collect(),
        last_updated: 0,
        last_block_number: block,
        balance: ids.len() as u64,
    }
}

fn cached_nft(token_id: &str, owner: &str) -> Nft {
    Nft {
        id: token_id.to_string(),
        token_id: token_id.to_string(),
        contract_address: address_key(&contract()),
        name: format!("Token #{}", token_id),
        description: String::new(),
        image: String::new(),
        owner: owner.to_string(),
        metadata: serde_json::Value::Null,
    }
}

#[tokio::test]
async fn test_zero_balance_is_cached_as_empty() {
    let mut conn = create_sqlite_connection(None, true).await.unwrap();
    let chain = Arc::new(MockChain::new(50));
    let owner = addr(1);

    let result = resolver(&chain).get_nfts(&mut conn, owner, false).await;
    assert!(result.error.is_none());
    assert!(result.nfts.is_empty());
    assert_eq!(result.balance, 0);

    let cached = get_nft_cache(&mut conn, &address_key(&owner))
        .await
        .unwrap()
        .unwrap();
    assert!(cached.nfts.is_empty());
    assert_eq!(cached.balance, 0);
    assert_eq!(cached.last_block_number, 50);
    assert_eq!(chain.calls("transfer_logs"), 0);
}

#[tokio::test]
async fn test_full_scan_counts_transfers_and_verifies_owner() {
    let mut conn = create_sqlite_connection(None, true).await.unwrap();
    let chain = Arc::new(MockChain::new(100));
    let owner = addr(1);
    let other = addr(2);
    let mint = addr(0);
    chain.transfer(mint, owner, 1, 10);
    chain.transfer(mint, owner, 2, 11);
    chain.transfer(owner, other, 2, 12);
    chain.transfer(other, owner, 2, 13);
    chain.transfer(mint, owner, 5, 14);
    chain.transfer(owner, other, 5, 15);
    chain
        .token_uris
        .lock()
        .unwrap()
        .insert(U256::from(1u64), r#"data:application/json,{"name":"First","image":"ipfs://QmA"}"#.to_string());

    let nft_resolver = resolver(&chain);
    let result = nft_resolver.get_nfts(&mut conn, owner, false).await;
    assert!(result.error.is_none(), "{:?}", result.error);
    assert_eq!(token_ids(&result.nfts), vec!["1", "2"]);
    assert_eq!(result.last_block_number, 100);
    assert_eq!(nft_resolver.state(owner), AddressState::CachedFresh);

    assert_eq!(result.nfts[0].name, "First");
    assert_eq!(result.nfts[0].image, "https://ipfs.io/ipfs/QmA");
    assert_eq!(result.nfts[1].name, "Token #2");
    let placeholder = result.nfts[1]
        .image
        .strip_prefix("data:image/svg+xml;base64,")
        .unwrap();
    let svg = base64::engine::general_purpose::STANDARD
        .decode(placeholder)
        .unwrap();
    assert!(String::from_utf8(svg).unwrap().contains("#2"));

    let stored = get_cached_nft_metadata(&mut conn, &address_key(&contract()), "1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.metadata["name"], "First");
}

#[tokio::test]
async fn test_outbound_transfer_removes_token_from_cached_set() {
    let mut conn = create_sqlite_connection(None, true).await.unwrap();
    let chain = Arc::new(MockChain::new(20));
    let owner = addr(1);
    let owner_key = address_key(&owner);
    chain.set_owner(1, owner);
    chain.set_owner(3, owner);
    chain.transfer(owner, addr(2), 2, 15);

    save_nft_cache(
        &mut conn,
        &NftCacheData {
            address: owner_key.clone(),
            contract_address: address_key(&contract()),
            nfts: vec![
                cached_nft("1", &owner_key),
                cached_nft("2", &owner_key),
                cached_nft("3", &owner_key),
            ],
            last_updated: 0,
            last_block_number: 10,
            balance: 3,
        },
    )
    .await
    .unwrap();

    let result = resolver(&chain).get_nfts(&mut conn, owner, false).await;
    assert!(result.error.is_none(), "{:?}", result.error);
    assert!(!result.from_cache);
    assert_eq!(token_ids(&result.nfts), vec!["1", "3"]);

    let cached = get_nft_cache(&mut conn, &owner_key).await.unwrap().unwrap();
    assert_eq!(cached.token_ids(), vec!["1", "3"]);
    assert_eq!(cached.balance, 2);
    assert_eq!(cached.last_block_number, 20);
}

#[tokio::test]
async fn test_probe_finds_tokens_missing_from_logs() {
    let mut conn = create_sqlite_connection(None, true).await.unwrap();
    let chain = Arc::new(MockChain::new(30));
    let owner = addr(1);
    chain.transfer(addr(0), owner, 1, 5);
    chain.set_owner(4, owner);
    chain.set_owner(7, addr(9));

    let result = resolver(&chain).get_nfts(&mut conn, owner, false).await;
    assert!(result.error.is_none(), "{:?}", result.error);
    assert_eq!(token_ids(&result.nfts), vec!["1", "4"]);
    // one verification call, then the probe stops after its first batch
    assert_eq!(chain.calls("owner_of"), 1 + 30);
}

#[tokio::test]
async fn test_fresh_cache_is_served_without_scanning() {
    let mut conn = create_sqlite_connection(None, true).await.unwrap();
    let chain = Arc::new(MockChain::new(40));
    let owner = addr(1);
    chain.transfer(addr(0), owner, 8, 3);

    let nft_resolver = resolver(&chain);
    let first = nft_resolver.get_nfts(&mut conn, owner, false).await;
    assert_eq!(token_ids(&first.nfts), vec!["8"]);
    let scans = chain.calls("transfer_logs");

    let second = nft_resolver.get_nfts(&mut conn, owner, false).await;
    assert!(second.from_cache);
    assert_eq!(second.state, AddressState::CachedFresh);
    assert_eq!(token_ids(&second.nfts), vec!["8"]);
    // block did not move, so the freshness check needs no log query
    assert_eq!(chain.calls("transfer_logs"), scans);
}

#[tokio::test]
async fn test_failure_falls_back_to_cached_set() {
    let mut conn = create_sqlite_connection(None, true).await.unwrap();
    let chain = Arc::new(MockChain::new(40));
    let owner = addr(1);
    let owner_key = address_key(&owner);
    save_nft_cache(
        &mut conn,
        &NftCacheData {
            address: owner_key.clone(),
            contract_address: address_key(&contract()),
            nfts: vec![cached_nft("5", &owner_key)],
            last_updated: 0,
            last_block_number: 10,
            balance: 1,
        },
    )
    .await
    .unwrap();
    chain.failing.store(true, Ordering::SeqCst);

    let nft_resolver = resolver(&chain);
    let result = nft_resolver.get_nfts(&mut conn, owner, false).await;
    assert!(result.from_cache);
    assert!(result.error.unwrap().contains("node unavailable"));
    assert_eq!(token_ids(&result.nfts), vec!["5"]);
    assert_eq!(nft_resolver.state(owner), AddressState::CachedStale);
}

#[tokio::test]
async fn test_connection_error_in_verification_is_not_saved() {
    let mut conn = create_sqlite_connection(None, true).await.unwrap();
    let chain = Arc::new(MockChain::new(40));
    let owner = addr(1);
    chain.transfer(addr(0), owner, 1, 5);
    chain.transfer(addr(0), owner, 150, 6);
    chain
        .unreachable_once
        .lock()
        .unwrap()
        .insert(U256::from(150u64));

    let nft_resolver = resolver(&chain);
    let first = nft_resolver.get_nfts(&mut conn, owner, false).await;
    assert!(first.error.is_some());
    assert!(first.nfts.is_empty());
    assert_eq!(nft_resolver.state(owner), AddressState::CachedStale);
    assert!(get_nft_cache(&mut conn, &address_key(&owner))
        .await
        .unwrap()
        .is_none());

    let second = nft_resolver.get_nfts(&mut conn, owner, false).await;
    assert!(second.error.is_none(), "{:?}", second.error);
    assert_eq!(token_ids(&second.nfts), vec!["1", "150"]);
    assert_eq!(nft_resolver.state(owner), AddressState::CachedFresh);

    let third = nft_resolver.get_nfts(&mut conn, owner, false).await;
    assert!(third.from_cache);
    assert_eq!(token_ids(&third.nfts), vec!["1", "150"]);
}

#[tokio::test]
async fn test_incomplete_cache_is_rebuilt() {
    let mut conn = create_sqlite_connection(None, true).await.unwrap();
    let chain = Arc::new(MockChain::new(40));
    let owner = addr(1);
    let owner_key = address_key(&owner);
    chain.transfer(addr(0), owner, 1, 5);
    chain.transfer(addr(0), owner, 150, 6);
    let mut data = cache_data(&owner_key, &["1"], 40);
    data.balance = 2;
    save_nft_cache(&mut conn, &data).await.unwrap();

    let result = resolver(&chain).get_nfts(&mut conn, owner, false).await;
    assert!(result.error.is_none(), "{:?}", result.error);
    assert!(!result.from_cache);
    assert_eq!(token_ids(&result.nfts), vec!["1", "150"]);
}

#[tokio::test]
async fn test_event_after_cached_block_number_is_scanned() {
    let mut conn = create_sqlite_connection(None, true).await.unwrap();
    let chain = Arc::new(MockChain::new(20));
    let owner = addr(1);
    let owner_key = address_key(&owner);
    for id in 1..=3 {
        chain.set_owner(id, owner);
    }
    save_nft_cache(&mut conn, &cache_data(&owner_key, &["1", "2", "3"], 20))
        .await
        .unwrap();

    let cache = Arc::new(RpcCache::default());
    cache
        .cached_get_block_number(|| async { Ok(20) })
        .await
        .unwrap();
    let nft_resolver = resolver_with_cache(&chain, cache);
    let first = nft_resolver.get_nfts(&mut conn, owner, false).await;
    assert!(first.from_cache);

    chain.transfer(owner, addr(2), 2, 21);
    chain.block.store(21, Ordering::SeqCst);

    let second = nft_resolver.get_nfts(&mut conn, owner, false).await;
    assert!(second.error.is_none(), "{:?}", second.error);
    assert!(!second.from_cache);
    assert_eq!(token_ids(&second.nfts), vec!["1", "3"]);
    assert_eq!(second.last_block_number, 21);
    let stored = get_nft_cache(&mut conn, &owner_key).await.unwrap().unwrap();
    assert_eq!(stored.token_ids(), vec!["1", "3"]);
    assert_eq!(stored.last_block_number, 21);
}

#[tokio::test]
async fn test_force_rescans_from_genesis() {
    let mut conn = create_sqlite_connection(None, true).await.unwrap();
    let chain = Arc::new(MockChain::new(40));
    let owner = addr(1);
    let owner_key = address_key(&owner);
    chain.transfer(addr(0), owner, 8, 3);
    save_nft_cache(&mut conn, &cache_data(&owner_key, &["9"], 40))
        .await
        .unwrap();

    let nft_resolver = resolver(&chain);
    let cached = nft_resolver.get_nfts(&mut conn, owner, false).await;
    assert!(cached.from_cache);
    assert_eq!(token_ids(&cached.nfts), vec!["9"]);

    let forced = nft_resolver.get_nfts(&mut conn, owner, true).await;
    assert!(forced.error.is_none(), "{:?}", forced.error);
    assert!(!forced.from_cache);
    assert_eq!(token_ids(&forced.nfts), vec!["8"]);
    let stored = get_nft_cache(&mut conn, &owner_key).await.unwrap().unwrap();
    assert_eq!(stored.token_ids(), vec!["8"]);
}

#[tokio::test]
async fn test_new_transfer_with_unchanged_balance_marks_stale() {
    let mut conn = create_sqlite_connection(None, true).await.unwrap();
    let chain = Arc::new(MockChain::new(20));
    let owner = addr(1);
    let owner_key = address_key(&owner);
    for id in 1..=3 {
        chain.set_owner(id, owner);
    }
    save_nft_cache(&mut conn, &cache_data(&owner_key, &["1", "2", "3"], 20))
        .await
        .unwrap();
    chain.transfer(owner, addr(2), 2, 24);
    chain.transfer(addr(3), owner, 4, 25);
    chain.block.store(25, Ordering::SeqCst);

    assert!(
        has_new_transfer_events(chain.as_ref(), contract(), owner, 20)
            .await
            .unwrap()
    );
    assert!(
        !has_new_transfer_events(chain.as_ref(), contract(), owner, 25)
            .await
            .unwrap()
    );

    let nft_resolver = resolver(&chain);
    let result = nft_resolver.get_nfts(&mut conn, owner, false).await;
    assert!(result.error.is_none(), "{:?}", result.error);
    assert!(!result.from_cache);
    assert_eq!(result.balance, 3);
    assert_eq!(token_ids(&result.nfts), vec!["1", "3", "4"]);
    assert_eq!(nft_resolver.state(owner), AddressState::CachedFresh);
}

#[tokio::test]
async fn test_ambiguous_ids_are_confirmed_with_owner_of() {
    let mut conn = create_sqlite_connection(None, true).await.unwrap();
    let chain = Arc::new(MockChain::new(20));
    let owner = addr(1);
    let owner_key = address_key(&owner);
    chain.set_owner(1, owner);
    save_nft_cache(&mut conn, &cache_data(&owner_key, &["1"], 20))
        .await
        .unwrap();
    // 5 comes back, 6 leaves again
    chain.transfer(addr(3), owner, 5, 21);
    chain.transfer(owner, addr(3), 5, 22);
    chain.transfer(addr(3), owner, 5, 23);
    chain.transfer(addr(3), owner, 6, 21);
    chain.transfer(owner, addr(4), 6, 22);
    chain.block.store(30, Ordering::SeqCst);

    let result = resolver(&chain).get_nfts(&mut conn, owner, false).await;
    assert!(result.error.is_none(), "{:?}", result.error);
    assert_eq!(token_ids(&result.nfts), vec!["1", "5"]);
    assert_eq!(chain.calls("owner_of"), 3);
}
