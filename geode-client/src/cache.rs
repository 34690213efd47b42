//! The client cache: owner of pools, regions and transactions.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use geode_core::protocol::handshake::ClientMemberId;
use geode_core::protocol::EventId;
use geode_core::{CacheableKey, CacheableValue, GeodeError, Result};
use uuid::Uuid;

use crate::chunk_handler::ChunkHandler;
use crate::config::{CacheConfig, PoolConfig, RegionConfig};
use crate::pool::{Pool, PoolContext, PoolManager};
use crate::region::{Region, RegionRegistry, RegistrySink};
use crate::transaction::TransactionManager;

/// Hands out the event ids stamped on the cache's write operations.
#[derive(Debug)]
pub(crate) struct EventIdGenerator {
    member_id: Vec<u8>,
    thread_id: i64,
    sequence: AtomicI64,
}

impl EventIdGenerator {
    pub(crate) fn new(member_id: Vec<u8>, thread_id: i64) -> Self {
        Self {
            member_id,
            thread_id,
            sequence: AtomicI64::new(0),
        }
    }

    pub(crate) fn next(&self) -> EventId {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        EventId::new(self.member_id.clone(), self.thread_id, sequence)
    }
}

/// A client cache connected to one or more clusters.
///
/// Cloning is cheap; clones share the same cache. Call
/// [`ClientCache::close`] to release pools and background tasks.
///
/// # Example
///
/// ```ignore
/// let cache = ClientCache::new(CacheConfig::default())?;
/// cache
///     .create_pool(
///         PoolConfig::builder("default")
///             .add_locator(ServerLocation::new("localhost", 10334))
///             .build()?,
///     )
///     .await?;
/// let region = cache.create_region::<String, String>(RegionConfig::builder("orders").build()?)?;
/// ```
#[derive(Clone)]
pub struct ClientCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    config: CacheConfig,
    member: ClientMemberId,
    member_bytes: Arc<Vec<u8>>,
    chunk_handler: ChunkHandler,
    pools: PoolManager,
    regions: Arc<RegionRegistry>,
    transactions: Arc<TransactionManager>,
    events: Arc<EventIdGenerator>,
    closed: AtomicBool,
}

impl std::fmt::Debug for ClientCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCache")
            .field("name", &self.inner.config.name())
            .field("member", &self.inner.member)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ClientCache {
    /// Creates a cache. Pools are added with [`ClientCache::create_pool`].
    pub fn new(config: CacheConfig) -> Result<Self> {
        let chunk_handler = if config.enable_chunk_handler_thread() {
            ChunkHandler::threaded()?
        } else {
            ChunkHandler::inline()
        };
        let member = ClientMemberId {
            hostname: local_hostname(),
            process_id: std::process::id() as i32,
            unique_tag: Uuid::new_v4().to_string(),
            durable_id: config.durable_client_id().map(str::to_string),
            durable_timeout_secs: config.durable_client_timeout().as_secs().min(i32::MAX as u64)
                as i32,
        };
        let member_bytes = member.to_bytes()?;
        let events = Arc::new(EventIdGenerator::new(
            member_bytes.clone(),
            rand::random::<u32>() as i64,
        ));
        tracing::info!(
            cache = %config.name(),
            durable = member.is_durable(),
            threaded_chunks = config.enable_chunk_handler_thread(),
            "client cache created"
        );
        Ok(Self {
            inner: Arc::new(CacheInner {
                config,
                member,
                member_bytes: Arc::new(member_bytes),
                chunk_handler,
                pools: PoolManager::new(),
                regions: Arc::new(RegionRegistry::new()),
                transactions: Arc::new(TransactionManager::new()),
                events,
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Returns the cache configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Returns the membership id this client announces to servers.
    pub fn member_id(&self) -> &ClientMemberId {
        &self.inner.member
    }

    /// Returns true once [`ClientCache::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(GeodeError::CacheClosed(format!(
                "cache {} is closed",
                self.inner.config.name()
            )));
        }
        Ok(())
    }

    /// Creates a pool and adds it to the cache. The first pool created
    /// becomes the default pool.
    pub async fn create_pool(&self, config: PoolConfig) -> Result<Pool> {
        self.ensure_open()?;
        if self.inner.pools.find(config.name()).is_some() {
            return Err(GeodeError::IllegalArgument(format!(
                "pool {} already exists",
                config.name()
            )));
        }
        let sink = Arc::new(RegistrySink::new(&self.inner.regions, config.name()));
        let context = PoolContext {
            chunk_handler: self.inner.chunk_handler.clone(),
            member_id: self.inner.member_bytes.clone(),
            durable: self.inner.member.is_durable(),
            sink,
        };
        let pool = Pool::create(config, context).await?;
        if let Err(e) = self.inner.pools.add(pool.clone()) {
            pool.destroy(false).await;
            return Err(e);
        }
        Ok(pool)
    }

    /// Returns the pool named `name`.
    pub fn pool(&self, name: &str) -> Option<Pool> {
        self.inner.pools.find(name)
    }

    /// Returns the pool manager of the cache.
    pub fn pool_manager(&self) -> &PoolManager {
        &self.inner.pools
    }

    /// Creates a region bound to the pool named in `config`, or to the
    /// default pool.
    pub fn create_region<K, V>(&self, config: RegionConfig) -> Result<Region<K, V>>
    where
        K: CacheableKey,
        V: CacheableValue,
    {
        self.ensure_open()?;
        let pool = match config.pool_name() {
            Some(name) => self.inner.pools.find(name).ok_or_else(|| {
                GeodeError::IllegalState(format!("pool {} does not exist", name))
            })?,
            None => self.inner.pools.default_pool().ok_or_else(|| {
                GeodeError::IllegalState(format!(
                    "region {} names no pool and there is no default pool",
                    config.name()
                ))
            })?,
        };
        Region::create(
            config,
            pool,
            self.inner.chunk_handler.clone(),
            self.inner.events.clone(),
            &self.inner.regions,
        )
    }

    /// Returns the region `name` typed as `Region<K, V>`.
    ///
    /// Fails with an illegal argument error if the region exists with
    /// different types.
    pub fn region<K, V>(&self, name: &str) -> Result<Option<Region<K, V>>>
    where
        K: CacheableKey,
        V: CacheableValue,
    {
        self.ensure_open()?;
        self.inner.regions.get(name)
    }

    /// Returns the names of the cache's regions.
    pub fn region_names(&self) -> Vec<String> {
        self.inner.regions.names()
    }

    /// Returns the transaction manager of the cache.
    pub fn transaction_manager(&self) -> &Arc<TransactionManager> {
        &self.inner.transactions
    }

    /// Tells the servers this durable client is ready for queued events.
    pub async fn ready_for_events(&self) -> Result<()> {
        self.ensure_open()?;
        for pool in self.inner.pools.pools() {
            if pool.config().subscription_enabled() {
                pool.ready_for_events().await?;
            }
        }
        Ok(())
    }

    /// Closes the cache. With `keepalive` durable queues survive on the
    /// servers. Calling close again has no effect.
    pub async fn close(&self, keepalive: bool) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!(cache = %self.inner.config.name(), keepalive, "closing client cache");
        self.inner.regions.shutdown_all().await;
        self.inner.transactions.close().await;
        self.inner.pools.close(keepalive).await;
        self.inner.chunk_handler.shutdown();
        tracing::info!(cache = %self.inner.config.name(), "client cache closed");
    }
}

fn local_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_handles_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ClientCache>();
        assert_send_sync::<Pool>();
        assert_send_sync::<Region<String, String>>();
        assert_send_sync::<crate::transaction::TransactionContext>();
    }

    #[test]
    fn test_event_ids_increase() {
        let generator = EventIdGenerator::new(vec![7], 3);
        let a = generator.next();
        let b = generator.next();
        assert_eq!(a.thread_id, 3);
        assert_eq!(b.sequence_id, a.sequence_id + 1);
        assert_eq!(a.member_id, vec![7]);
    }

    #[tokio::test]
    async fn test_durable_member_id() {
        let config = CacheConfig::builder()
            .durable_client_id("d-1")
            .durable_client_timeout(Duration::from_secs(30))
            .build()
            .unwrap();
        let cache = ClientCache::new(config).unwrap();
        assert!(cache.member_id().is_durable());
        assert_eq!(cache.member_id().durable_timeout_secs, 30);
        cache.close(false).await;
    }

    #[tokio::test]
    async fn test_region_without_pool_fails() {
        let cache = ClientCache::new(CacheConfig::default()).unwrap();
        let err = cache
            .create_region::<String, String>(RegionConfig::builder("r").build().unwrap())
            .unwrap_err();
        assert!(matches!(err, GeodeError::IllegalState(_)));
        cache.close(false).await;
    }

    #[tokio::test]
    async fn test_closed_cache_rejects_operations() {
        let cache = ClientCache::new(CacheConfig::default()).unwrap();
        cache.close(false).await;
        cache.close(false).await;
        assert!(cache.is_closed());
        let err = cache.region::<String, String>("r").unwrap_err();
        assert!(matches!(err, GeodeError::CacheClosed(_)));
        let pool = PoolConfig::builder("p")
            .add_server(geode_core::ServerLocation::new("127.0.0.1", 1))
            .build()
            .unwrap();
        assert!(matches!(
            cache.create_pool(pool).await.unwrap_err(),
            GeodeError::CacheClosed(_)
        ));
    }
}
