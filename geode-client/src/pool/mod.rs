//! Connection pools: request routing, retries and background maintenance.

mod event_tracker;
mod manager;
mod subscription;

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use geode_core::protocol::constants::{
    message_type_name, GET_CLIENT_PARTITION_ATTRIBUTES, GET_CLIENT_PR_METADATA,
};
use geode_core::protocol::{read_chunk_part_header, BucketServerLocation, ChunkObjectType, Message, Part};
use geode_core::serialization::ds_code::CACHEABLE_ARRAY_LIST;
use geode_core::{DataInput, GeodeError, ObjectDataInput, Result, ServerLocation};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::chunk_handler::{ChunkHandler, ChunkedResult};
use crate::config::PoolConfig;
use crate::connection::{
    ChunkedReply, ConnectionEvent, ConnectionManager, EndpointSource, PoolStats, PooledConnection,
};
use crate::metadata::{ClientMetadataService, MetadataFetcher, PartitionAttributes};

pub use event_tracker::EventTracker;
pub use manager::PoolManager;
pub use subscription::{
    Interest, InterestKeys, Notification, NotificationKind, NotificationSink, SubscriptionManager,
};

/// How a request picks its server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routing {
    /// Any server, by the pool's default policy.
    Any,
    /// The server owning the bucket of `key_hash`, falling back to any
    /// server when ownership is unknown.
    Bucket {
        /// Region name.
        region: String,
        /// Server side hash of the routing key.
        key_hash: i32,
        /// True to require the primary copy, as writes do.
        primary: bool,
    },
    /// A specific server, falling back to any server when unreachable.
    Server(ServerLocation),
}

/// Per-request routing and retry options.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    routing: Routing,
    region: Option<String>,
    retry_on_timeout: bool,
}

impl RequestOptions {
    /// Routes to any server.
    pub fn any() -> Self {
        Self {
            routing: Routing::Any,
            region: None,
            retry_on_timeout: true,
        }
    }

    /// Routes to the owner of `key_hash` in `region`.
    pub fn for_key(region: &str, key_hash: i32, primary: bool) -> Self {
        Self {
            routing: Routing::Bucket {
                region: region.to_string(),
                key_hash,
                primary,
            },
            region: Some(region.to_string()),
            retry_on_timeout: true,
        }
    }

    /// Routes to `server`.
    pub fn on_server(server: ServerLocation) -> Self {
        Self {
            routing: Routing::Server(server),
            region: None,
            retry_on_timeout: true,
        }
    }

    /// Names the region whose metadata a refresh hint in the reply refers to.
    pub fn region(mut self, region: &str) -> Self {
        self.region = Some(region.to_string());
        self
    }

    /// Fails instead of retrying when the server does not answer in time,
    /// for requests that are not safe to repeat.
    pub fn no_retry_on_timeout(mut self) -> Self {
        self.retry_on_timeout = false;
        self
    }

    /// Returns the routing.
    pub fn routing(&self) -> &Routing {
        &self.routing
    }

    /// Returns true if timeouts are retried.
    pub fn retries_timeouts(&self) -> bool {
        self.retry_on_timeout
    }
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::any()
    }
}

/// Settings a pool takes from its cache.
#[derive(Clone)]
pub struct PoolContext {
    /// Chunk handler shared by the cache.
    pub chunk_handler: ChunkHandler,
    /// Serialized client member id.
    pub member_id: Arc<Vec<u8>>,
    /// True for durable clients.
    pub durable: bool,
    /// Receiver of subscription events.
    pub sink: Arc<dyn NotificationSink>,
}

/// A named pool of connections to one cluster.
///
/// Cloning is cheap; clones share the same connections. The pool runs its
/// maintenance tasks until [`Pool::destroy`].
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    config: PoolConfig,
    connections: Arc<ConnectionManager>,
    metadata: Arc<ClientMetadataService>,
    subscription: Option<Arc<SubscriptionManager>>,
    chunk_handler: ChunkHandler,
    member_id: Arc<Vec<u8>>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    destroyed: AtomicBool,
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.name())
            .field("stats", &self.stats())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl Pool {
    /// Creates a pool and starts its background tasks. With subscriptions
    /// enabled the queues are opened before this returns.
    #[tracing::instrument(name = "pool.create", skip_all, fields(pool = %config.name()))]
    pub async fn create(config: PoolConfig, context: PoolContext) -> Result<Self> {
        let source = EndpointSource::from_config(&config);
        let connections = Arc::new(ConnectionManager::new(
            &config,
            source,
            context.member_id.clone(),
        ));
        let (metadata, refresh_queue) =
            ClientMetadataService::new(config.server_group(), config.bucket_wait_timeout());
        let subscription = config.subscription_enabled().then(|| {
            SubscriptionManager::new(
                &config,
                connections.clone(),
                context.member_id.clone(),
                context.durable,
                context.sink.clone(),
            )
        });
        let (shutdown, _) = watch::channel(false);
        let pool = Pool {
            inner: Arc::new(PoolInner {
                config,
                connections,
                metadata: Arc::new(metadata),
                subscription,
                chunk_handler: context.chunk_handler,
                member_id: context.member_id,
                shutdown,
                tasks: Mutex::new(Vec::new()),
                destroyed: AtomicBool::new(false),
            }),
        };

        if let Some(subscription) = &pool.inner.subscription {
            if let Err(e) = subscription.start().await {
                pool.destroy(false).await;
                return Err(e);
            }
        }
        pool.spawn_tasks(refresh_queue);
        tracing::info!(
            pool = %pool.name(),
            locators = pool.inner.config.locators().len(),
            servers = pool.inner.config.servers().len(),
            "pool created"
        );
        Ok(pool)
    }

    /// Returns the pool name.
    pub fn name(&self) -> &str {
        self.inner.config.name()
    }

    /// Returns the pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Returns the connection manager.
    pub fn connections(&self) -> &ConnectionManager {
        &self.inner.connections
    }

    /// Returns the metadata service used for single-hop routing.
    pub fn metadata(&self) -> &Arc<ClientMetadataService> {
        &self.inner.metadata
    }

    /// Returns the chunk handler.
    pub fn chunk_handler(&self) -> &ChunkHandler {
        &self.inner.chunk_handler
    }

    /// Returns the serialized client member id.
    pub fn member_id(&self) -> &Arc<Vec<u8>> {
        &self.inner.member_id
    }

    /// Returns the subscription manager, if subscriptions are enabled.
    pub fn subscription(&self) -> Option<&Arc<SubscriptionManager>> {
        self.inner.subscription.as_ref()
    }

    /// Returns the connection counts.
    pub fn stats(&self) -> PoolStats {
        self.inner.connections.stats()
    }

    /// Subscribes to connection events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.connections.subscribe()
    }

    /// Returns the known servers: the last locator listing, or the
    /// configured servers.
    pub fn servers(&self) -> Vec<ServerLocation> {
        match self.inner.connections.source().locator() {
            Some(locator) => locator.known_servers(),
            None => self.inner.config.servers().to_vec(),
        }
    }

    /// Returns the current locator list.
    pub fn locators(&self) -> Vec<ServerLocation> {
        match self.inner.connections.source().locator() {
            Some(locator) => locator.locators(),
            None => Vec::new(),
        }
    }

    /// Returns true once the pool was destroyed.
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    /// Returns true if both handles refer to the same pool.
    pub fn ptr_eq(&self, other: &Pool) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(GeodeError::CacheClosed(format!(
                "pool {} is destroyed",
                self.name()
            )));
        }
        Ok(())
    }

    fn max_attempts(&self) -> usize {
        let retry = self.inner.config.retry_attempts();
        if retry < 0 {
            let known = self
                .servers()
                .len()
                .max(self.inner.connections.connected_endpoints().len());
            known.max(1)
        } else {
            retry as usize + 1
        }
    }

    /// Checks out a connection to any server not in `excluded`; used to bind
    /// transactions.
    pub async fn acquire(&self, excluded: &HashSet<ServerLocation>) -> Result<PooledConnection> {
        self.ensure_open()?;
        self.inner.connections.acquire(excluded).await
    }

    async fn acquire_routed(
        &self,
        opts: &RequestOptions,
        excluded: &HashSet<ServerLocation>,
    ) -> Result<PooledConnection> {
        match &opts.routing {
            Routing::Any => self.inner.connections.acquire(excluded).await,
            Routing::Server(server) if !excluded.contains(server) => {
                self.acquire_preferred(server, excluded).await
            }
            Routing::Server(_) => self.inner.connections.acquire(excluded).await,
            Routing::Bucket {
                region,
                key_hash,
                primary,
            } => {
                if !self.inner.config.pr_single_hop_enabled() {
                    return self.inner.connections.acquire(excluded).await;
                }
                let metadata = &self.inner.metadata;
                match metadata.get_bucket_server_location(region, *key_hash, *primary) {
                    Some(location) if !excluded.contains(&location.location) => {
                        self.acquire_preferred(&location.location, excluded).await
                    }
                    _ => {
                        if !metadata.is_known_unpartitioned(region) {
                            metadata.enqueue_for_metadata_refresh(region);
                        }
                        self.inner.connections.acquire(excluded).await
                    }
                }
            }
        }
    }

    async fn acquire_preferred(
        &self,
        server: &ServerLocation,
        excluded: &HashSet<ServerLocation>,
    ) -> Result<PooledConnection> {
        match self.inner.connections.acquire_for(server).await {
            Ok(conn) => Ok(conn),
            Err(e) if e.is_transient() => {
                tracing::warn!(server = %server, error = %e, "preferred server unreachable, using any server");
                self.server_failed(server);
                let mut excluded = excluded.clone();
                excluded.insert(server.clone());
                self.inner.connections.acquire(&excluded).await
            }
            Err(e) => Err(e),
        }
    }

    fn server_failed(&self, server: &ServerLocation) {
        self.inner.connections.evict_endpoint(server);
        self.inner.metadata.remove_bucket_server_location(server);
    }

    fn mark_timeout(&self, opts: &RequestOptions) {
        if let Routing::Bucket {
            region,
            key_hash,
            primary: true,
        } = &opts.routing
        {
            if let Some(metadata) = self.inner.metadata.get_client_metadata(region) {
                self.inner
                    .metadata
                    .mark_bucket_for_timeout(region, metadata.bucket_id_for(*key_hash));
            }
        }
    }

    fn refresh_hint(&self, opts: &RequestOptions) {
        if let Some(region) = &opts.region {
            tracing::debug!(region = %region, "server requested a metadata refresh");
            self.inner.metadata.enqueue_for_metadata_refresh(region);
        }
    }

    /// Runs `op` on a connection chosen by `opts`, retrying transient
    /// failures on other servers up to the pool's retry bound.
    ///
    /// `op` takes ownership of the connection and must hand it back with its
    /// outcome, so a failed connection can be discarded rather than reused.
    async fn with_retry<T, F, Fut>(&self, opts: &RequestOptions, mut op: F) -> Result<T>
    where
        F: FnMut(PooledConnection) -> Fut,
        Fut: Future<Output = (PooledConnection, Result<T>)>,
    {
        let attempts = self.max_attempts();
        let mut excluded: HashSet<ServerLocation> = HashSet::new();
        let mut last_error = None;

        for attempt in 1..=attempts {
            self.ensure_open()?;
            let conn = match self.acquire_routed(opts, &excluded).await {
                Ok(conn) => conn,
                Err(e) if e.is_transient() => {
                    tracing::debug!(attempt, error = %e, "no connection available");
                    excluded.clear();
                    last_error = Some(e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            let endpoint = conn.endpoint().clone();
            let (conn, result) = op(conn).await;
            let e = match result {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            if self.is_destroyed() {
                conn.discard();
                return Err(e);
            }

            let timed_out = matches!(e, GeodeError::Timeout(_));
            if timed_out {
                self.mark_timeout(opts);
            }
            if !(e.is_transient() || (timed_out && opts.retry_on_timeout)) {
                return Err(e);
            }
            conn.discard();
            if e.is_transient() {
                self.server_failed(&endpoint);
            }
            if !excluded.insert(endpoint.clone()) {
                excluded.clear();
            }
            tracing::warn!(attempt, attempts, server = %endpoint, error = %e, "request attempt failed");
            last_error = Some(e);
        }
        Err(last_error
            .unwrap_or_else(|| GeodeError::NotConnected("request was not attempted".to_string())))
    }

    /// Sends `request` and returns its reply, error replies mapped to errors.
    #[tracing::instrument(
        name = "pool.execute",
        skip_all,
        fields(pool = %self.name(), request = message_type_name(request.message_type()))
    )]
    pub async fn execute(&self, request: &Message, opts: &RequestOptions) -> Result<Message> {
        self.ensure_open()?;
        let read_timeout = self.inner.config.read_timeout();
        let reply = self
            .with_retry(opts, |mut conn| async move {
                let result = conn.send(request, read_timeout).await;
                (conn, result)
            })
            .await?;
        if reply.refresh_metadata_requested() {
            self.refresh_hint(opts);
        }
        reply.into_result()
    }

    /// Sends a request with a chunked response, feeding every chunk to a
    /// result made by `make_result`.
    ///
    /// Each attempt gets a fresh result, so a retried request never sees the
    /// chunks of a failed attempt. Returns the reply summary and the result
    /// of the successful attempt.
    #[tracing::instrument(
        name = "pool.execute_chunked",
        skip_all,
        fields(pool = %self.name(), request = message_type_name(request.message_type()))
    )]
    pub async fn execute_chunked<R, F>(
        &self,
        request: &Message,
        opts: &RequestOptions,
        mut make_result: F,
    ) -> Result<(ChunkedReply, Arc<R>)>
    where
        R: ChunkedResult + 'static,
        F: FnMut() -> R,
    {
        self.ensure_open()?;
        let read_timeout = self.inner.config.read_timeout();
        let handler = &self.inner.chunk_handler;
        let (reply, result) = self
            .with_retry(opts, |mut conn| {
                let result = Arc::new(make_result());
                async move {
                    let outcome = conn
                        .send_chunked(request, read_timeout, handler, result.clone())
                        .await;
                    (conn, outcome.map(|reply| (reply, result)))
                }
            })
            .await?;
        if reply.refresh_metadata {
            self.refresh_hint(opts);
        }
        Ok((reply, result))
    }

    /// Records `interest` and registers it on the primary subscription queue.
    pub async fn register_interest(&self, interest: Interest) -> Result<()> {
        self.ensure_open()?;
        self.subscription_or_err()?.register_interest(interest).await
    }

    /// Tells the servers a durable client is ready for its queued events.
    pub async fn ready_for_events(&self) -> Result<()> {
        self.ensure_open()?;
        self.subscription_or_err()?.ready_for_events().await
    }

    fn subscription_or_err(&self) -> Result<&Arc<SubscriptionManager>> {
        self.inner.subscription.as_ref().ok_or_else(|| {
            GeodeError::IllegalState(format!(
                "subscription is not enabled on pool {}",
                self.name()
            ))
        })
    }

    fn spawn_tasks(&self, refresh_queue: tokio::sync::mpsc::UnboundedReceiver<String>) {
        let config = &self.inner.config;
        let mut tasks = Vec::new();

        let maintenance_period = config
            .idle_timeout()
            .min(config.load_conditioning_interval());
        let connections = self.inner.connections.clone();
        tasks.push(self.spawn_periodic("maintenance", maintenance_period, move || {
            let connections = connections.clone();
            async move { connections.manage_connections().await }
        }));

        if !config.ping_interval().is_zero() {
            let connections = self.inner.connections.clone();
            tasks.push(self.spawn_periodic("ping", config.ping_interval(), move || {
                let connections = connections.clone();
                async move { connections.ping_idle().await }
            }));
        }

        if let Some(locator) = self.inner.connections.source().locator() {
            if !config.update_locator_list_interval().is_zero() {
                let locator = locator.clone();
                tasks.push(self.spawn_periodic(
                    "locator-update",
                    config.update_locator_list_interval(),
                    move || {
                        let locator = locator.clone();
                        async move {
                            if let Err(e) = locator.update_locators().await {
                                tracing::debug!(error = %e, "locator list update failed");
                            }
                            if let Err(e) = locator.get_all_servers().await {
                                tracing::debug!(error = %e, "server list update failed");
                            }
                        }
                    },
                ));
            }
        }

        if config.pr_single_hop_enabled() {
            let fetcher: Arc<dyn MetadataFetcher> = Arc::new(PoolFetcher {
                inner: Arc::downgrade(&self.inner),
            });
            tasks.push(tokio::spawn(self.inner.metadata.clone().run_refresh_worker(
                fetcher,
                refresh_queue,
                self.inner.shutdown.subscribe(),
            )));
        }

        if let Some(subscription) = &self.inner.subscription {
            tasks.push(tokio::spawn(subscription.clone().run_maintenance()));
        }

        self.inner
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(tasks);
    }

    fn spawn_periodic<F, Fut>(&self, task: &'static str, period: Duration, mut f: F) -> JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut shutdown = self.inner.shutdown.subscribe();
        let pool = self.name().to_string();
        let period = period.max(Duration::from_millis(10));
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(period);
            ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticks.tick() => f().await,
                    _ = shutdown.changed() => break,
                }
            }
            tracing::debug!(pool = %pool, task, "background task stopped");
        })
    }

    /// Destroys the pool: stops background tasks, closes subscription queues
    /// (asking servers to keep durable queues when `keepalive`) and idle
    /// connections, and fails every later request with `CacheClosed`.
    /// Calling it again has no effect.
    pub async fn destroy(&self, keepalive: bool) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.shutdown.send_replace(true);
        if let Some(subscription) = &self.inner.subscription {
            subscription.destroy(keepalive).await;
        }
        let tasks: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self.inner.tasks.lock().unwrap_or_else(|e| e.into_inner()),
        );
        for task in tasks {
            task.abort();
        }
        self.inner.connections.close().await;
        tracing::info!(pool = %self.name(), keepalive, "pool destroyed");
    }
}

/// Fetches metadata through the pool without keeping it alive.
struct PoolFetcher {
    inner: Weak<PoolInner>,
}

impl PoolFetcher {
    fn pool(&self) -> Result<Pool> {
        self.inner
            .upgrade()
            .map(|inner| Pool { inner })
            .ok_or_else(|| GeodeError::CacheClosed("pool was dropped".to_string()))
    }
}

#[async_trait]
impl MetadataFetcher for PoolFetcher {
    async fn partition_attributes(&self, region: &str) -> Result<Option<PartitionAttributes>> {
        let pool = self.pool()?;
        let request = Message::new(GET_CLIENT_PARTITION_ATTRIBUTES).with_part(Part::string(region));
        let reply = pool.execute(&request, &RequestOptions::any()).await?;
        let total_num_buckets = reply.part(0)?.as_int()?;
        if total_num_buckets < 0 {
            return Ok(None);
        }
        let colocated_with = match reply.parts().get(1) {
            Some(part) if !part.is_empty() => Some(part.as_string()?).filter(|s| !s.is_empty()),
            _ => None,
        };
        Ok(Some(PartitionAttributes {
            total_num_buckets,
            colocated_with,
        }))
    }

    async fn bucket_locations(&self, region: &str) -> Result<Vec<BucketServerLocation>> {
        let pool = self.pool()?;
        let request = Message::new(GET_CLIENT_PR_METADATA).with_part(Part::string(region));
        let (_, result) = pool
            .execute_chunked(&request, &RequestOptions::any(), BucketLocations::default)
            .await?;
        let locations = std::mem::take(
            &mut *result
                .locations
                .lock()
                .unwrap_or_else(|e| e.into_inner()),
        );
        Ok(locations)
    }
}

/// Collects the bucket owners of a GET_CLIENT_PR_METADATA response.
#[derive(Debug, Default)]
struct BucketLocations {
    locations: Mutex<Vec<BucketServerLocation>>,
}

impl ChunkedResult for BucketLocations {
    fn handle_chunk(&self, _message_type: i32, input: &mut ObjectDataInput<'_>) -> Result<()> {
        while input.remaining() > 0 {
            match read_chunk_part_header(input, "GET_CLIENT_PR_METADATA", Some(CACHEABLE_ARRAY_LIST))? {
                ChunkObjectType::Object => {
                    input.read_byte()?;
                    let count = input.read_int()?;
                    let mut locations = Vec::with_capacity(input.capacity_for(count, BucketServerLocation::MIN_ENCODED_SIZE));
                    for _ in 0..count {
                        locations.push(BucketServerLocation::read_from(input)?);
                    }
                    self.locations
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .extend(locations);
                }
                ChunkObjectType::NullObject => {}
                ChunkObjectType::Exception(exception) => return Err(exception.into_error()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use geode_core::serialization::ObjectDataOutput;
    use geode_core::DataOutput;

    #[test]
    fn test_request_options() {
        let opts = RequestOptions::for_key("orders", 42, true).no_retry_on_timeout();
        assert_eq!(
            opts.routing(),
            &Routing::Bucket {
                region: "orders".to_string(),
                key_hash: 42,
                primary: true
            }
        );
        assert!(!opts.retries_timeouts());
        assert!(RequestOptions::default().retries_timeouts());
        assert_eq!(RequestOptions::any().routing(), &Routing::Any);
    }

    #[test]
    fn test_bucket_locations_chunk() {
        let server = ServerLocation::new("10.0.0.1", 40404);
        let mut object = ObjectDataOutput::new();
        object.write_byte(CACHEABLE_ARRAY_LIST).unwrap();
        object.write_int(2).unwrap();
        BucketServerLocation::new(server.clone(), 0, true, 1)
            .write_to(&mut object)
            .unwrap();
        BucketServerLocation::new(server.clone(), 1, false, 1)
            .write_to(&mut object)
            .unwrap();
        let mut payload = BytesMut::new();
        Part::object_bytes(object.freeze()).write_to(&mut payload);

        let result = BucketLocations::default();
        let mut input = ObjectDataInput::new(&payload);
        result.handle_chunk(0, &mut input).unwrap();
        let locations = result.locations.lock().unwrap();
        assert_eq!(locations.len(), 2);
        assert!(locations[0].is_primary);
        assert_eq!(locations[1].bucket_id, 1);
    }

    #[test]
    fn test_bucket_locations_rejects_other_types() {
        let mut payload = BytesMut::new();
        Part::object(&5i32).unwrap().write_to(&mut payload);
        let result = BucketLocations::default();
        let mut input = ObjectDataInput::new(&payload);
        let err = result.handle_chunk(0, &mut input).unwrap_err();
        assert!(matches!(err, GeodeError::Protocol(_)));
    }
}
