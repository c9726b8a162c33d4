//! Time-boxed cache for read-only chain queries.
//!
//! Entries are keyed by method name plus serialized arguments. Concurrent
//! identical calls share one in-flight future, so at most one request per key
//! is outstanding at any time. Failures are never cached.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use web3::types::{Address, U256};

use crate::config::{CacheSettings, CacheTtls};
use crate::err_custom_create;
use crate::error::SyncError;
use crate::eth::address_key;

type CachedValue = Arc<dyn Any + Send + Sync>;
type SharedCall = Shared<BoxFuture<'static, Result<CachedValue, Arc<SyncError>>>>;

struct CacheEntry {
    data: CachedValue,
    timestamp: Instant,
    expiry: Duration,
}

impl CacheEntry {
    fn is_valid(&self, now: Instant) -> bool {
        now <= self.timestamp + self.expiry
    }
}

struct PendingRequest {
    id: u64,
    call: SharedCall,
    started: Instant,
}

/// TTL class of a contract read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadTtl {
    Default,
    Staking,
    Loan,
    Metadata,
    Custom(Duration),
}

#[derive(Debug, Clone, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: usize,
    pub pending: usize,
    pub hits: u64,
    pub misses: u64,
    pub deduplicated: u64,
}

pub struct RpcCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    pending: Mutex<HashMap<String, PendingRequest>>,
    ttls: CacheTtls,
    sweep_interval: Duration,
    pending_timeout: Duration,
    next_request_id: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    deduplicated: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn cache_key(method: &str, args: &str) -> String {
    format!("{}:{}", method, args)
}

impl Default for RpcCache {
    fn default() -> Self {
        RpcCache::new(&CacheSettings::default())
    }
}

impl RpcCache {
    pub fn new(settings: &CacheSettings) -> Self {
        RpcCache {
            entries: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            ttls: settings.ttls(),
            sweep_interval: Duration::from_secs(settings.sweep_interval.max(1)),
            pending_timeout: Duration::from_secs(settings.pending_timeout),
            next_request_id: AtomicU64::new(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            deduplicated: AtomicU64::new(0),
        }
    }

    pub fn ttls(&self) -> &CacheTtls {
        &self.ttls
    }

    pub fn ttl_for(&self, kind: ReadTtl) -> Duration {
        match kind {
            ReadTtl::Default => self.ttls.read,
            ReadTtl::Staking => self.ttls.staking,
            ReadTtl::Loan => self.ttls.loan,
            ReadTtl::Metadata => self.ttls.metadata,
            ReadTtl::Custom(ttl) => ttl,
        }
    }

    fn lookup<T>(&self, key: &str) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let now = Instant::now();
        let mut entries = lock(&self.entries);
        let valid = entries.get(key).map(|entry| entry.is_valid(now))?;
        if !valid {
            log::trace!("Evicting expired cache entry {}", key);
            entries.remove(key);
            return None;
        }
        entries
            .get(key)
            .and_then(|entry| entry.data.downcast_ref::<T>().cloned())
    }

    /// Serves `key` from cache, joins an identical in-flight call, or runs `fetch`.
    pub async fn cached_rpc_call<T, F, Fut>(
        &self,
        method: &str,
        args: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<T, SyncError>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SyncError>> + Send + 'static,
    {
        let key = cache_key(method, args);
        if let Some(value) = self.lookup::<T>(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            log::debug!("Cache hit {}", key);
            return Ok(value);
        }

        let (id, call) = {
            let mut pending = lock(&self.pending);
            if let Some(request) = pending.get(&key) {
                self.deduplicated.fetch_add(1, Ordering::Relaxed);
                log::debug!("Joining in-flight request {}", key);
                (request.id, request.call.clone())
            } else {
                self.misses.fetch_add(1, Ordering::Relaxed);
                log::debug!("Cache miss {}", key);
                let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
                let fut = fetch();
                let call: SharedCall = async move {
                    fut.await
                        .map(|value| Arc::new(value) as CachedValue)
                        .map_err(Arc::new)
                }
                .boxed()
                .shared();
                pending.insert(
                    key.clone(),
                    PendingRequest {
                        id,
                        call: call.clone(),
                        started: Instant::now(),
                    },
                );
                (id, call)
            }
        };

        let result = call.await;
        self.complete(&key, id, &result, ttl);

        match result {
            Ok(value) => value
                .downcast_ref::<T>()
                .cloned()
                .ok_or_else(|| err_custom_create!("Cached value type mismatch for {}", key)),
            Err(err) => Err(SyncError::Shared(err)),
        }
    }

    fn complete(
        &self,
        key: &str,
        id: u64,
        result: &Result<CachedValue, Arc<SyncError>>,
        ttl: Duration,
    ) {
        let mut pending = lock(&self.pending);
        let owns_marker = pending.get(key).map(|p| p.id == id).unwrap_or(false);
        if !owns_marker {
            return;
        }
        pending.remove(key);
        drop(pending);
        match result {
            Ok(data) => {
                lock(&self.entries).insert(
                    key.to_string(),
                    CacheEntry {
                        data: data.clone(),
                        timestamp: Instant::now(),
                        expiry: ttl,
                    },
                );
            }
            Err(err) => {
                log::debug!("Request {} failed, not caching: {}", key, err);
            }
        }
    }

    pub async fn cached_get_block_number<F, Fut>(&self, fetch: F) -> Result<u64, SyncError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<u64, SyncError>> + Send + 'static,
    {
        self.cached_rpc_call("getBlockNumber", "", self.ttls.block_number, fetch)
            .await
    }

    pub async fn cached_get_balance<F, Fut>(
        &self,
        address: Address,
        fetch: F,
    ) -> Result<U256, SyncError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<U256, SyncError>> + Send + 'static,
    {
        self.cached_rpc_call("getBalance", &address_key(&address), self.ttls.balance, fetch)
            .await
    }

    pub async fn cached_read_contract<T, F, Fut>(
        &self,
        contract: Address,
        function: &str,
        args: &str,
        kind: ReadTtl,
        fetch: F,
    ) -> Result<T, SyncError>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SyncError>> + Send + 'static,
    {
        let args = format!("{}:{}:{}", address_key(&contract), function, args);
        self.cached_rpc_call("readContract", &args, self.ttl_for(kind), fetch)
            .await
    }

    /// Drops expired entries and in-flight markers older than the pending timeout.
    pub fn sweep(&self) -> (usize, usize) {
        let now = Instant::now();
        let removed_entries = {
            let mut entries = lock(&self.entries);
            let before = entries.len();
            entries.retain(|_, entry| entry.is_valid(now));
            before - entries.len()
        };
        let removed_pending = {
            let mut pending = lock(&self.pending);
            let before = pending.len();
            let timeout = self.pending_timeout;
            pending.retain(|_, request| now.duration_since(request.started) <= timeout);
            before - pending.len()
        };
        if removed_entries > 0 || removed_pending > 0 {
            log::debug!(
                "Cache sweep removed {} entries and {} stale in-flight markers",
                removed_entries,
                removed_pending
            );
        }
        (removed_entries, removed_pending)
    }

    /// Sweeps periodically until the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let cache = Arc::downgrade(self);
        let sweep_interval = self.sweep_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval);
            interval.tick().await;
            loop {
                interval.tick().await;
                match cache.upgrade() {
                    Some(cache) => {
                        cache.sweep();
                    }
                    None => break,
                }
            }
        })
    }

    pub fn clear(&self) {
        lock(&self.entries).clear();
        lock(&self.pending).clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: lock(&self.entries).len(),
            pending: lock(&self.pending).len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
        }
    }
}
