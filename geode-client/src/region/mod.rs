//! Regions: the typed key/value front end of a cache.
//!
//! A [`Region`] sends every operation to the servers of its pool. With
//! caching enabled it also keeps a local copy of the entries it saw, which
//! is kept current by the region's own operations and by subscription
//! events, and which expires on its own schedule.
//!
//! # Example
//!
//! ```ignore
//! let orders = cache.create_region::<String, String>(
//!     RegionConfig::builder("orders").caching_enabled(true).build()?,
//! )?;
//! orders.put("o-1".to_string(), "open".to_string()).await?;
//! assert_eq!(orders.get(&"o-1".to_string()).await?, Some("open".to_string()));
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use geode_core::protocol::constants::{
    CLEAR_REGION, CONTAINS_KEY, DESTROY, EXECUTE_REGION_FUNCTION, GET_ALL_70, INVALIDATE, KEY_SET,
    PUT, PUTALL, QUERY, REQUEST, SIZE,
};
use geode_core::protocol::{Message, Part};
use geode_core::serialization::ds_code::CACHEABLE_OBJECT_ARRAY;
use geode_core::{
    CacheableKey, CacheableValue, DataOutput, Deserializable, GeodeError, ObjectDataOutput, Result,
    Serializable, ServerLocation,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::cache::EventIdGenerator;
use crate::chunk_handler::ChunkHandler;
use crate::config::RegionConfig;
use crate::listener::{CacheListener, EntryEvent, ListenerId, ListenerRegistry, Operation, RegionEvent};
use crate::pool::{Interest, InterestKeys, Notification, NotificationKind, Pool, RequestOptions};
use crate::transaction::TransactionContext;

mod chunks;
mod entries;
mod function;
mod registry;
mod transactional;

use chunks::{EntryChunks, ObjectChunks};
use entries::{EntryCache, LocalChange};
use function::FunctionChunks;

pub use entries::EntryCacheStats;
pub use function::ResultCollector;
pub(crate) use registry::{RegionRegistry, RegistrySink};
pub use transactional::TransactionalRegion;

/// A named key/value region bound to a pool.
///
/// Clones share the region.
pub struct Region<K, V> {
    inner: Arc<RegionInner<K, V>>,
}

impl<K, V> Clone for Region<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V> std::fmt::Debug for Region<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Region")
            .field("name", &self.inner.config.name())
            .field("pool", &self.inner.pool.name())
            .field("caching", &self.inner.entries.is_some())
            .finish()
    }
}

pub(crate) struct RegionInner<K, V> {
    config: RegionConfig,
    pool: Pool,
    chunk_handler: ChunkHandler,
    events: Arc<EventIdGenerator>,
    entries: Option<Mutex<EntryCache<K, V>>>,
    listeners: ListenerRegistry<K, V>,
    registry: Weak<RegionRegistry>,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
    expiry_task: Mutex<Option<JoinHandle<()>>>,
}

impl<K, V> Drop for RegionInner<K, V> {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

impl<K, V> Region<K, V>
where
    K: CacheableKey,
    V: CacheableValue,
{
    /// Creates the region and registers it with `registry`.
    ///
    /// Must be called within a Tokio runtime when expiration is configured.
    pub(crate) fn create(
        config: RegionConfig,
        pool: Pool,
        chunk_handler: ChunkHandler,
        events: Arc<EventIdGenerator>,
        registry: &Arc<RegionRegistry>,
    ) -> Result<Self> {
        let entries = config
            .caching_enabled()
            .then(|| Mutex::new(EntryCache::new(&config)));
        let (shutdown, _) = watch::channel(false);
        let inner = Arc::new(RegionInner {
            config,
            pool,
            chunk_handler,
            events,
            entries,
            listeners: ListenerRegistry::new(),
            registry: Arc::downgrade(registry),
            closed: AtomicBool::new(false),
            shutdown,
            expiry_task: Mutex::new(None),
        });
        registry.insert(inner.clone())?;
        let task = RegionInner::spawn_expiry(&inner);
        *inner.expiry_task.lock().unwrap_or_else(|e| e.into_inner()) = task;
        tracing::debug!(
            region = %inner.name(),
            pool = %inner.pool.name(),
            caching = inner.entries.is_some(),
            "region created"
        );
        Ok(Self { inner })
    }

    pub(crate) fn from_inner(inner: Arc<RegionInner<K, V>>) -> Self {
        Self { inner }
    }

    /// Returns the region name.
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Returns the region configuration.
    pub fn config(&self) -> &RegionConfig {
        &self.inner.config
    }

    /// Returns the pool the region sends its operations to.
    pub fn pool(&self) -> &Pool {
        &self.inner.pool
    }

    /// Returns true once the region was closed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Stores `value` under `key`.
    #[tracing::instrument(name = "region.put", skip_all, fields(region = %self.name()))]
    pub async fn put(&self, key: K, value: V) -> Result<()> {
        let inner = &self.inner;
        inner.ensure_open()?;
        let request = inner.put_request(&key, &value)?;
        let reply = inner
            .pool
            .execute(&request, &inner.key_options(&key, true))
            .await?;
        inner
            .apply_put(key, value, existed_flag(&reply), false, false)
            .await;
        Ok(())
    }

    /// Returns the value of `key`, from the local cache when present.
    #[tracing::instrument(name = "region.get", skip_all, fields(region = %self.name()))]
    pub async fn get(&self, key: &K) -> Result<Option<V>> {
        let inner = &self.inner;
        inner.ensure_open()?;
        if let Some(value) = inner.with_entries(|e| e.get(key)).flatten() {
            return Ok(Some(value));
        }
        let reply = inner
            .pool
            .execute(&inner.get_request(key)?, &inner.key_options(key, false))
            .await?;
        let value = first_value::<V>(&reply)?;
        if let Some(value) = &value {
            inner.cache_loaded(key.clone(), value.clone()).await;
        }
        Ok(value)
    }

    /// Stores every entry of `entries`.
    ///
    /// With single-hop metadata the entries are split by owning server
    /// and sent concurrently.
    #[tracing::instrument(name = "region.put_all", skip_all, fields(region = %self.name(), count = entries.len()))]
    pub async fn put_all(&self, entries: Vec<(K, V)>) -> Result<()> {
        let inner = &self.inner;
        inner.ensure_open()?;
        if entries.is_empty() {
            return Ok(());
        }
        let keys: Vec<K> = entries.iter().map(|(k, _)| k.clone()).collect();
        match inner.server_groups(&keys, true) {
            None => {
                inner
                    .put_all_request(&entries, RequestOptions::any().region(inner.name()))
                    .await?;
            }
            Some(groups) => {
                let values: HashMap<K, V> = entries.iter().cloned().collect();
                let batches: Vec<(ServerLocation, Vec<(K, V)>)> = groups
                    .into_iter()
                    .map(|(server, keys)| {
                        let batch = keys
                            .into_iter()
                            .filter_map(|k| values.get(&k).cloned().map(|v| (k, v)))
                            .collect();
                        (server, batch)
                    })
                    .collect();
                try_join_all(batches.iter().map(|(server, batch)| {
                    inner.put_all_request(
                        batch,
                        RequestOptions::on_server(server.clone()).region(inner.name()),
                    )
                }))
                .await?;
            }
        }
        for (key, value) in entries {
            inner.apply_put(key, value, None, true, false).await;
        }
        Ok(())
    }

    /// Returns the values of `keys` that exist. Local copies are used when
    /// present.
    #[tracing::instrument(name = "region.get_all", skip_all, fields(region = %self.name(), count = keys.len()))]
    pub async fn get_all(&self, keys: &[K]) -> Result<HashMap<K, V>> {
        let inner = &self.inner;
        inner.ensure_open()?;
        let mut found = HashMap::with_capacity(keys.len());
        let mut missing = Vec::new();
        for key in keys {
            match inner.with_entries(|e| e.get(key)).flatten() {
                Some(value) => {
                    found.insert(key.clone(), value);
                }
                None => missing.push(key.clone()),
            }
        }
        if missing.is_empty() {
            return Ok(found);
        }

        let fetched = match inner.server_groups(&missing, false) {
            None => {
                inner
                    .get_all_request(&missing, RequestOptions::any().region(inner.name()))
                    .await?
            }
            Some(groups) => try_join_all(groups.into_iter().map(|(server, keys)| async move {
                inner
                    .get_all_request(&keys, RequestOptions::on_server(server).region(inner.name()))
                    .await
            }))
            .await?
            .into_iter()
            .flatten()
            .collect(),
        };
        for (key, value) in fetched {
            if let Some(value) = value {
                inner.cache_loaded(key.clone(), value.clone()).await;
                found.insert(key, value);
            }
        }
        Ok(found)
    }

    /// Destroys `key` on the server and locally.
    #[tracing::instrument(name = "region.remove", skip_all, fields(region = %self.name()))]
    pub async fn remove(&self, key: &K) -> Result<()> {
        let inner = &self.inner;
        inner.ensure_open()?;
        let request = inner.keyed_event_request(DESTROY, key)?;
        inner
            .pool
            .execute(&request, &inner.key_options(key, true))
            .await?;
        inner.apply_destroy(key.clone(), false).await;
        Ok(())
    }

    /// Invalidates `key` on the server and locally.
    #[tracing::instrument(name = "region.invalidate", skip_all, fields(region = %self.name()))]
    pub async fn invalidate(&self, key: &K) -> Result<()> {
        let inner = &self.inner;
        inner.ensure_open()?;
        let request = inner.keyed_event_request(INVALIDATE, key)?;
        inner
            .pool
            .execute(&request, &inner.key_options(key, true))
            .await?;
        inner.apply_invalidate(key.clone(), false).await;
        Ok(())
    }

    /// Returns true if the server has an entry for `key`.
    pub async fn contains_key_on_server(&self, key: &K) -> Result<bool> {
        let inner = &self.inner;
        inner.ensure_open()?;
        let reply = inner
            .pool
            .execute(&inner.contains_key_request(key)?, &inner.key_options(key, false))
            .await?;
        reply.part(0)?.deserialize::<bool>()
    }

    /// Returns the number of entries on the servers.
    pub async fn size_on_server(&self) -> Result<usize> {
        let inner = &self.inner;
        inner.ensure_open()?;
        let request = Message::new(SIZE).with_part(Part::string(inner.name()));
        let reply = inner
            .pool
            .execute(&request, &RequestOptions::any().region(inner.name()))
            .await?;
        let size = reply.part(0)?.as_int()?;
        usize::try_from(size)
            .map_err(|_| GeodeError::Protocol(format!("negative region size {}", size)))
    }

    /// Returns every key on the servers.
    pub async fn keys_on_server(&self) -> Result<Vec<K>> {
        let inner = &self.inner;
        inner.ensure_open()?;
        let request = Message::new(KEY_SET).with_part(Part::string(inner.name()));
        let (_, result) = inner
            .pool
            .execute_chunked(&request, &RequestOptions::any().region(inner.name()), || {
                ObjectChunks::<K>::new("key_set")
            })
            .await?;
        Ok(result.take())
    }

    /// Runs an OQL query and returns its results.
    #[tracing::instrument(name = "region.query", skip_all, fields(region = %self.name()))]
    pub async fn query<R>(&self, query: &str) -> Result<Vec<R>>
    where
        R: Deserializable + Send + 'static,
    {
        let inner = &self.inner;
        inner.ensure_open()?;
        let request = Message::new(QUERY).with_part(Part::string(query));
        let opts = RequestOptions::any()
            .region(inner.name())
            .no_retry_on_timeout();
        let (_, result) = inner
            .pool
            .execute_chunked(&request, &opts, || ObjectChunks::<R>::new("query"))
            .await?;
        Ok(result.take())
    }

    /// Executes the server function `function_id` on this region.
    ///
    /// `filter` restricts execution to the servers owning those keys. The
    /// results are collected in the background.
    pub fn execute_function<A, R>(
        &self,
        function_id: &str,
        args: Option<&A>,
        filter: &[K],
    ) -> Result<ResultCollector<R>>
    where
        A: Serializable,
        R: Deserializable + Clone + Send + Sync + 'static,
    {
        let inner = &self.inner;
        inner.ensure_open()?;
        let mut request = Message::new(EXECUTE_REGION_FUNCTION)
            .with_part(Part::string(function_id))
            .with_part(Part::string(inner.name()))
            .with_part(match args {
                Some(args) => Part::object(args)?,
                None => Part::null_object(),
            })
            .with_part(Part::int(filter.len() as i32));
        for key in filter {
            request.push_part(Part::object(key)?);
        }
        let opts = match filter {
            [key] => inner.key_options(key, false),
            _ => RequestOptions::any().region(inner.name()),
        }
        .no_retry_on_timeout();

        let collector = ResultCollector::new();
        let sink = collector.clone();
        let pool = inner.pool.clone();
        let function = function_id.to_string();
        tokio::spawn(async move {
            let outcome = pool
                .execute_chunked(&request, &opts, FunctionChunks::<R>::default)
                .await;
            match outcome {
                Ok((_, result)) => {
                    sink.add_results(result.take());
                    sink.end_results(Ok(()));
                }
                Err(e) => {
                    tracing::debug!(function = %function, error = %e, "function execution failed");
                    sink.end_results(Err(e));
                }
            }
        });
        Ok(collector)
    }

    /// Removes every entry on the servers and locally.
    pub async fn clear(&self) -> Result<()> {
        let inner = &self.inner;
        inner.ensure_open()?;
        let request = Message::new(CLEAR_REGION)
            .with_part(Part::string(inner.name()))
            .with_part(inner.events.next().to_part()?);
        inner
            .pool
            .execute(&request, &RequestOptions::any().region(inner.name()))
            .await?;
        inner.apply_clear(false).await;
        Ok(())
    }

    /// Returns the locally cached value of `key`.
    pub fn get_local(&self, key: &K) -> Option<V> {
        self.inner.with_entries(|e| e.get(key)).flatten()
    }

    /// Returns true if `key` has a local entry, valid or invalidated.
    pub fn contains_key_local(&self, key: &K) -> bool {
        self.inner
            .with_entries(|e| e.contains_key(key))
            .unwrap_or(false)
    }

    /// Returns the number of local entries.
    pub fn local_size(&self) -> usize {
        self.inner.with_entries(|e| e.len()).unwrap_or(0)
    }

    /// Returns the keys of the local entries.
    pub fn local_keys(&self) -> Vec<K> {
        self.inner.with_entries(|e| e.keys()).unwrap_or_default()
    }

    /// Invalidates the local copy of `key` only.
    pub async fn local_invalidate(&self, key: &K) -> Result<()> {
        self.inner.ensure_open()?;
        self.inner.apply_invalidate(key.clone(), false).await;
        Ok(())
    }

    /// Destroys the local copy of `key` only.
    pub async fn local_destroy(&self, key: &K) -> Result<()> {
        self.inner.ensure_open()?;
        self.inner.apply_destroy(key.clone(), false).await;
        Ok(())
    }

    /// Removes every local entry.
    pub async fn local_clear(&self) -> Result<()> {
        self.inner.ensure_open()?;
        self.inner.apply_clear(false).await;
        Ok(())
    }

    /// Returns the counters of the local entry cache.
    pub fn entry_stats(&self) -> Option<EntryCacheStats> {
        self.inner.with_entries(|e| e.stats())
    }

    /// Subscribes to events for every key of the region.
    pub async fn register_interest_all(&self) -> Result<()> {
        self.inner.ensure_open()?;
        self.inner
            .pool
            .register_interest(Interest {
                region: self.name().to_string(),
                keys: InterestKeys::All,
            })
            .await
    }

    /// Subscribes to events for `keys`.
    pub async fn register_interest_keys(&self, keys: &[K]) -> Result<()> {
        self.inner.ensure_open()?;
        let keys = keys.iter().map(Part::object).collect::<Result<Vec<_>>>()?;
        self.inner
            .pool
            .register_interest(Interest {
                region: self.name().to_string(),
                keys: InterestKeys::List(keys),
            })
            .await
    }

    /// Adds a listener for the region's events.
    pub fn add_listener(&self, listener: Arc<dyn CacheListener<K, V>>) -> ListenerId {
        self.inner.listeners.add(listener)
    }

    /// Removes and closes a listener. Returns false if `id` is unknown.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    /// Returns a view running operations inside `tx`.
    pub fn transactional<'a>(&'a self, tx: &'a TransactionContext) -> TransactionalRegion<'a, K, V> {
        TransactionalRegion::new(self, tx)
    }

    /// Closes the region. The servers keep their data.
    pub async fn close(&self) {
        if let Some(registry) = self.inner.registry.upgrade() {
            registry.remove(self.name());
        }
        self.inner.close().await;
    }

    pub(crate) fn inner(&self) -> &Arc<RegionInner<K, V>> {
        &self.inner
    }
}

impl<K, V> RegionInner<K, V>
where
    K: CacheableKey,
    V: CacheableValue,
{
    pub(crate) fn name(&self) -> &str {
        self.config.name()
    }

    pub(crate) fn pool(&self) -> &Pool {
        &self.pool
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(GeodeError::IllegalState(format!(
                "region {} is closed",
                self.name()
            )));
        }
        Ok(())
    }

    fn with_entries<R>(&self, f: impl FnOnce(&mut EntryCache<K, V>) -> R) -> Option<R> {
        self.entries
            .as_ref()
            .map(|entries| f(&mut entries.lock().unwrap_or_else(|e| e.into_inner())))
    }

    fn key_options(&self, key: &K, primary: bool) -> RequestOptions {
        if self.pool.config().pr_single_hop_enabled() {
            RequestOptions::for_key(self.name(), key.hashcode(), primary)
        } else {
            RequestOptions::any().region(self.name())
        }
    }

    fn server_groups(&self, keys: &[K], primary: bool) -> Option<HashMap<ServerLocation, Vec<K>>> {
        if !self.pool.config().pr_single_hop_enabled() {
            return None;
        }
        self.pool
            .metadata()
            .get_server_to_filter_map(keys, self.name(), primary)
    }

    pub(crate) fn put_request(&self, key: &K, value: &V) -> Result<Message> {
        Ok(Message::new(PUT)
            .with_part(Part::string(self.name()))
            .with_part(Part::object(key)?)
            .with_part(Part::object(value)?)
            .with_part(self.events.next().to_part()?))
    }

    pub(crate) fn get_request(&self, key: &K) -> Result<Message> {
        Ok(Message::new(REQUEST)
            .with_part(Part::string(self.name()))
            .with_part(Part::object(key)?))
    }

    pub(crate) fn contains_key_request(&self, key: &K) -> Result<Message> {
        Ok(Message::new(CONTAINS_KEY)
            .with_part(Part::string(self.name()))
            .with_part(Part::object(key)?))
    }

    pub(crate) fn keyed_event_request(&self, message_type: i32, key: &K) -> Result<Message> {
        Ok(Message::new(message_type)
            .with_part(Part::string(self.name()))
            .with_part(Part::object(key)?)
            .with_part(self.events.next().to_part()?))
    }

    async fn put_all_request(&self, entries: &[(K, V)], opts: RequestOptions) -> Result<()> {
        let mut request = Message::new(PUTALL)
            .with_part(Part::string(self.name()))
            .with_part(self.events.next().to_part()?)
            .with_part(Part::int(entries.len() as i32));
        for (key, value) in entries {
            request.push_part(Part::object(key)?);
            request.push_part(Part::object(value)?);
        }
        self.pool
            .execute(&request, &opts.no_retry_on_timeout())
            .await
            .map(|_| ())
    }

    async fn get_all_request(
        &self,
        keys: &[K],
        opts: RequestOptions,
    ) -> Result<Vec<(K, Option<V>)>> {
        let request = Message::new(GET_ALL_70)
            .with_part(Part::string(self.name()))
            .with_part(key_array_part(keys)?);
        let (_, result) = self
            .pool
            .execute_chunked(&request, &opts, EntryChunks::<K, V>::default)
            .await?;
        Ok(result.take())
    }

    async fn fire_entry(&self, event: EntryEvent<K, V>) {
        if let Err(e) = self.listeners.fire_entry(&self.chunk_handler, event).await {
            tracing::warn!(region = %self.name(), error = %e, "listener dispatch failed");
        }
    }

    async fn fire_region(&self, operation: Operation, origin_remote: bool) {
        let event = RegionEvent::new(self.name(), operation, origin_remote);
        if let Err(e) = self.listeners.fire_region(&self.chunk_handler, event).await {
            tracing::warn!(region = %self.name(), error = %e, "listener dispatch failed");
        }
    }

    async fn fire_change(&self, change: LocalChange<K, V>) {
        tracing::trace!(region = %self.name(), key = ?change.key, operation = ?change.operation, "local entry change");
        self.fire_entry(EntryEvent::new(
            self.name(),
            change.key,
            change.old_value,
            None,
            change.operation,
            false,
        ))
        .await;
    }

    async fn cache_loaded(&self, key: K, value: V) {
        let evicted = self
            .with_entries(|e| e.put(key, value).evicted)
            .flatten();
        if let Some(change) = evicted {
            self.fire_change(change).await;
        }
    }

    pub(crate) async fn apply_put(
        &self,
        key: K,
        value: V,
        existed: Option<bool>,
        put_all: bool,
        origin_remote: bool,
    ) {
        let (old_value, cached, evicted) =
            match self.with_entries(|e| e.put(key.clone(), value.clone())) {
                Some(stored) => (stored.old_value, Some(stored.existed), stored.evicted),
                None => (None, None, None),
            };
        let existed = existed.or(cached).unwrap_or(false);
        let operation = match (put_all, existed) {
            (false, false) => Operation::Create,
            (false, true) => Operation::Update,
            (true, false) => Operation::PutAllCreate,
            (true, true) => Operation::PutAllUpdate,
        };
        self.fire_entry(EntryEvent::new(
            self.name(),
            key,
            old_value,
            Some(value),
            operation,
            origin_remote,
        ))
        .await;
        if let Some(change) = evicted {
            self.fire_change(change).await;
        }
    }

    pub(crate) async fn apply_invalidate(&self, key: K, origin_remote: bool) {
        let old_value = self.with_entries(|e| e.invalidate(&key)).flatten().flatten();
        self.fire_entry(EntryEvent::new(
            self.name(),
            key,
            old_value,
            None,
            Operation::Invalidate,
            origin_remote,
        ))
        .await;
    }

    pub(crate) async fn apply_destroy(&self, key: K, origin_remote: bool) {
        let old_value = self.with_entries(|e| e.destroy(&key)).flatten().flatten();
        self.fire_entry(EntryEvent::new(
            self.name(),
            key,
            old_value,
            None,
            Operation::Destroy,
            origin_remote,
        ))
        .await;
    }

    async fn apply_clear(&self, origin_remote: bool) {
        let cleared = self.with_entries(|e| e.clear()).unwrap_or(0);
        tracing::debug!(region = %self.name(), cleared, "region cleared locally");
        self.fire_region(Operation::RegionClear, origin_remote).await;
    }

    async fn expire(&self) {
        let changes = self.with_entries(|e| e.sweep()).unwrap_or_default();
        if !changes.is_empty() {
            tracing::debug!(region = %self.name(), expired = changes.len(), "local entries expired");
        }
        for change in changes {
            self.fire_change(change).await;
        }
    }

    fn spawn_expiry(inner: &Arc<Self>) -> Option<JoinHandle<()>> {
        if inner.entries.is_none() || !inner.config.has_expiration() {
            return None;
        }
        let weak = Arc::downgrade(inner);
        let mut shutdown = inner.shutdown.subscribe();
        let period = inner.config.expiry_sweep_interval();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => break,
                }
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.expire().await;
            }
        }))
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.send_replace(true);
        let task = self
            .expiry_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            if tokio::time::timeout(Duration::from_secs(5), task).await.is_err() {
                tracing::warn!(region = %self.name(), "expiry task did not stop");
            }
        }
        self.listeners.close_all();
        tracing::debug!(region = %self.name(), "region closed");
    }

    async fn apply_pushed(&self, notification: Notification) -> Result<()> {
        let key = match &notification.key {
            Some(part) => Some(part.deserialize::<K>()?),
            None => None,
        };
        match (notification.kind, key) {
            (NotificationKind::Create | NotificationKind::Update, Some(key)) => {
                let value = match &notification.value {
                    Some(part) => part.deserialize_opt::<V>()?,
                    None => None,
                };
                match value {
                    Some(value) => {
                        let existed = notification.kind == NotificationKind::Update;
                        self.apply_put(key, value, Some(existed), false, true).await;
                    }
                    None => self.apply_invalidate(key, true).await,
                }
            }
            (NotificationKind::Invalidate, Some(key)) => self.apply_invalidate(key, true).await,
            (NotificationKind::Destroy, Some(key)) => self.apply_destroy(key, true).await,
            (NotificationKind::RegionClear, _) => self.apply_clear(true).await,
            (NotificationKind::RegionDestroy, _) => {
                self.with_entries(|e| e.clear());
                self.fire_region(Operation::RegionDestroy, true).await;
            }
            (kind, None) => {
                return Err(GeodeError::Protocol(format!("{:?} event without key", kind)));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<K, V> registry::RegionHandle for RegionInner<K, V>
where
    K: CacheableKey,
    V: CacheableValue,
{
    fn pool_name(&self) -> &str {
        self.pool.name()
    }

    async fn apply_notification(&self, notification: Notification) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let kind = notification.kind;
        if let Err(e) = self.apply_pushed(notification).await {
            tracing::warn!(region = %self.config.name(), ?kind, error = %e, "pushed event not applied");
        }
    }

    async fn fire_region_event(&self, operation: Operation) {
        self.fire_region(operation, true).await;
    }

    async fn shutdown(&self) {
        self.close().await;
    }
}

fn existed_flag(reply: &Message) -> Option<bool> {
    reply
        .parts()
        .first()
        .and_then(|p| p.as_byte().ok())
        .map(|flag| flag != 0)
}

fn first_value<V: Deserializable>(reply: &Message) -> Result<Option<V>> {
    match reply.parts().first() {
        Some(part) => part.deserialize_opt::<V>(),
        None => Ok(None),
    }
}

fn key_array_part<K: Serializable>(keys: &[K]) -> Result<Part> {
    let mut output = ObjectDataOutput::new();
    output.write_byte(CACHEABLE_OBJECT_ARRAY)?;
    output.write_array_len(keys.len() as i32)?;
    for key in keys {
        key.serialize(&mut output)?;
    }
    Ok(Part::object_bytes(output.freeze()))
}
