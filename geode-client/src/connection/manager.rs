//! Connection manager: bounded set of pooled connections with background
//! maintenance.

use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use geode_core::protocol::{CommunicationMode, Message};
use geode_core::{GeodeError, Result, ServerLocation};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{broadcast, watch, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::time::timeout;

use super::connection::{ChunkedReply, ConnectOptions, Connection, ConnectionId};
use super::locator::LocatorClient;
use crate::chunk_handler::{ChunkHandler, ChunkedResult};
use crate::config::PoolConfig;

/// Events emitted by the connection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A connection was opened.
    Opened {
        /// Connection id.
        id: ConnectionId,
        /// Server endpoint.
        endpoint: ServerLocation,
    },
    /// A connection was closed.
    Closed {
        /// Connection id.
        id: ConnectionId,
        /// Server endpoint.
        endpoint: ServerLocation,
    },
    /// A server failed a ping; its idle connections were evicted.
    EndpointDown {
        /// Server endpoint.
        endpoint: ServerLocation,
    },
}

/// Where new connections are pointed.
#[derive(Debug)]
pub enum EndpointSource {
    /// Ask the locators for the least loaded server.
    Locator(Arc<LocatorClient>),
    /// Round-robin over a fixed server list.
    Servers {
        /// Configured servers.
        servers: Vec<ServerLocation>,
        /// Round-robin cursor.
        next: AtomicUsize,
    },
}

impl EndpointSource {
    /// Creates the source matching `config`: locators take precedence.
    pub fn from_config(config: &PoolConfig) -> Self {
        if config.locators().is_empty() {
            EndpointSource::Servers {
                servers: config.servers().to_vec(),
                next: AtomicUsize::new(0),
            }
        } else {
            EndpointSource::Locator(Arc::new(LocatorClient::new(
                config.locators().to_vec(),
                config.server_group(),
                config.connect_timeout(),
                config.retry_attempts(),
            )))
        }
    }

    /// Returns the locator client, if locators are used.
    pub fn locator(&self) -> Option<&Arc<LocatorClient>> {
        match self {
            EndpointSource::Locator(locator) => Some(locator),
            EndpointSource::Servers { .. } => None,
        }
    }

    async fn select(&self, excluded: &HashSet<ServerLocation>) -> Result<ServerLocation> {
        match self {
            EndpointSource::Locator(locator) => {
                locator.get_endpoint_for_new_connection(excluded).await
            }
            EndpointSource::Servers { servers, next } => {
                for _ in 0..servers.len() {
                    let index = next.fetch_add(1, Ordering::Relaxed) % servers.len();
                    let server = &servers[index];
                    if !excluded.contains(server) {
                        return Ok(server.clone());
                    }
                }
                Err(GeodeError::NotConnected(
                    "no server endpoints are available".to_string(),
                ))
            }
        }
    }
}

/// Source of per-connection expiry jitter in `[-9, 9]` percent.
#[derive(Debug)]
pub struct ExpiryJitter {
    rng: Mutex<StdRng>,
}

impl ExpiryJitter {
    /// Creates a jitter source, deterministic when `seed` is given.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng: Mutex::new(rng),
        }
    }

    /// Draws the variance for a new connection.
    pub fn next_variance(&self) -> i32 {
        self.rng
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .gen_range(-9..=9)
    }
}

/// Connection counts of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Open connections, idle or in use.
    pub total: usize,
    /// Connections waiting in the idle set.
    pub idle: usize,
    /// Connections handed out or being opened.
    pub in_use: usize,
}

#[derive(Debug, Default)]
struct PoolState {
    idle: VecDeque<Connection>,
    total: usize,
    per_endpoint: HashMap<ServerLocation, usize>,
    closed: bool,
}

impl PoolState {
    fn reserve(&mut self, endpoint: &ServerLocation) {
        self.total += 1;
        *self.per_endpoint.entry(endpoint.clone()).or_insert(0) += 1;
    }

    fn forget(&mut self, endpoint: &ServerLocation) {
        self.total = self.total.saturating_sub(1);
        if let Some(count) = self.per_endpoint.get_mut(endpoint) {
            *count -= 1;
            if *count == 0 {
                self.per_endpoint.remove(endpoint);
            }
        }
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<PoolState>,
    permits: Arc<Semaphore>,
    events: broadcast::Sender<ConnectionEvent>,
    closing: watch::Sender<bool>,
}

impl Shared {
    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn release(&self, mut conn: Connection) {
        let mut state = self.lock();
        if state.closed || conn.is_broken() {
            state.forget(conn.endpoint());
            drop(state);
            self.closed(&conn);
            return;
        }
        conn.touch();
        state.idle.push_back(conn);
    }

    /// Resolves once the pool is closed.
    async fn wait_closed(&self) {
        let mut closing = self.closing.subscribe();
        while !*closing.borrow_and_update() {
            if closing.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    fn closed(&self, conn: &Connection) {
        tracing::debug!(id = %conn.id(), endpoint = %conn.endpoint(), "connection removed from pool");
        let _ = self.events.send(ConnectionEvent::Closed {
            id: conn.id(),
            endpoint: conn.endpoint().clone(),
        });
    }
}

/// A connection checked out of the pool.
///
/// Dropping the guard returns the connection to the idle set, or closes it
/// if it was marked broken or the pool was closed meanwhile.
#[derive(Debug)]
pub struct PooledConnection {
    conn: Option<Connection>,
    shared: Arc<Shared>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    /// Closes the connection instead of returning it to the pool.
    pub fn discard(mut self) {
        if let Some(conn) = self.conn.as_mut() {
            conn.mark_broken();
        }
    }

    /// Like [`Connection::send`], but fails with `CacheClosed` as soon as
    /// the pool is closed. The interrupted connection is never reused.
    pub async fn send(&mut self, request: &Message, read_timeout: Duration) -> Result<Message> {
        let shared = self.shared.clone();
        let conn: &mut Connection = self;
        tokio::select! {
            result = conn.send(request, read_timeout) => return result,
            _ = shared.wait_closed() => {}
        }
        self.interrupted()
    }

    /// Like [`Connection::send_chunked`], but fails with `CacheClosed` as
    /// soon as the pool is closed.
    pub async fn send_chunked(
        &mut self,
        request: &Message,
        read_timeout: Duration,
        handler: &ChunkHandler,
        result: Arc<dyn ChunkedResult>,
    ) -> Result<ChunkedReply> {
        let shared = self.shared.clone();
        let conn: &mut Connection = self;
        tokio::select! {
            reply = conn.send_chunked(request, read_timeout, handler, result) => return reply,
            _ = shared.wait_closed() => {}
        }
        self.interrupted()
    }

    fn interrupted<T>(&mut self) -> Result<T> {
        self.mark_broken();
        tracing::debug!(id = %self.id(), endpoint = %self.endpoint(), "request interrupted by pool close");
        Err(pool_closed())
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn
            .as_ref()
            .unwrap_or_else(|| unreachable!("connection taken before drop"))
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn
            .as_mut()
            .unwrap_or_else(|| unreachable!("connection taken before drop"))
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.shared.release(conn);
        }
    }
}

/// Manages the request connections of one pool.
#[derive(Debug)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
    source: EndpointSource,
    options: ConnectOptions,
    jitter: ExpiryJitter,
    min_connections: usize,
    max_connections: Option<usize>,
    free_connection_timeout: Duration,
    idle_timeout: Duration,
    load_conditioning_interval: Duration,
    read_timeout: Duration,
}

impl ConnectionManager {
    /// Creates a manager for `config`; no connection is opened yet.
    pub fn new(config: &PoolConfig, source: EndpointSource, member_id: Arc<Vec<u8>>) -> Self {
        let (events, _) = broadcast::channel(64);
        let permits = config
            .max_connections()
            .unwrap_or(Semaphore::MAX_PERMITS)
            .min(Semaphore::MAX_PERMITS);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(PoolState::default()),
                permits: Arc::new(Semaphore::new(permits)),
                events,
                closing: watch::channel(false).0,
            }),
            source,
            options: ConnectOptions {
                mode: CommunicationMode::ClientToServer,
                connect_timeout: config.connect_timeout(),
                read_timeout: config.read_timeout(),
                member_id,
                socket_buffer_size: config.socket_buffer_size(),
            },
            jitter: ExpiryJitter::new(config.expiry_jitter_seed()),
            min_connections: config.min_connections(),
            max_connections: config.max_connections(),
            free_connection_timeout: config.free_connection_timeout(),
            idle_timeout: config.idle_timeout(),
            load_conditioning_interval: config.load_conditioning_interval(),
            read_timeout: config.read_timeout(),
        }
    }

    /// Subscribes to connection events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events.subscribe()
    }

    /// Returns where new connections are pointed.
    pub fn source(&self) -> &EndpointSource {
        &self.source
    }

    /// Returns the options used for new connections.
    pub fn connect_options(&self) -> &ConnectOptions {
        &self.options
    }

    /// Returns the current connection counts.
    pub fn stats(&self) -> PoolStats {
        let state = self.shared.lock();
        PoolStats {
            total: state.total,
            idle: state.idle.len(),
            in_use: state.total - state.idle.len(),
        }
    }

    /// Returns the servers the pool currently holds connections to.
    pub fn connected_endpoints(&self) -> Vec<ServerLocation> {
        let mut endpoints: Vec<_> = self.shared.lock().per_endpoint.keys().cloned().collect();
        endpoints.sort();
        endpoints
    }

    /// Returns true once [`ConnectionManager::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Checks out a connection to any server not in `excluded`.
    #[tracing::instrument(name = "pool.acquire", skip(self, excluded), fields(excluded = excluded.len()))]
    pub async fn acquire(&self, excluded: &HashSet<ServerLocation>) -> Result<PooledConnection> {
        let permit = self.permit().await?;
        if let Some(conn) = self.take_idle(|c| !excluded.contains(c.endpoint())) {
            return Ok(self.wrap(conn, permit));
        }
        let endpoint = self.source.select(excluded).await?;
        let conn = self.create(&endpoint).await?;
        Ok(self.wrap(conn, permit))
    }

    /// Checks out a connection to `endpoint`, opening one if none is idle.
    #[tracing::instrument(name = "pool.acquire_for", skip(self), fields(endpoint = %endpoint))]
    pub async fn acquire_for(&self, endpoint: &ServerLocation) -> Result<PooledConnection> {
        let permit = self.permit().await?;
        if let Some(conn) = self.take_idle(|c| c.endpoint() == endpoint) {
            return Ok(self.wrap(conn, permit));
        }
        let conn = self.create(endpoint).await?;
        Ok(self.wrap(conn, permit))
    }

    /// Opens a connection outside the pool's accounting, used for
    /// subscription channels.
    pub async fn open_dedicated(
        &self,
        endpoint: &ServerLocation,
        mode: CommunicationMode,
    ) -> Result<Connection> {
        if self.is_closed() {
            return Err(pool_closed());
        }
        let options = ConnectOptions {
            mode,
            ..self.options.clone()
        };
        Connection::connect(endpoint, &options, self.jitter.next_variance()).await
    }

    async fn permit(&self) -> Result<OwnedSemaphorePermit> {
        if self.is_closed() {
            return Err(pool_closed());
        }
        let permits = self.shared.permits.clone();
        if self.free_connection_timeout.is_zero() {
            return match permits.try_acquire_owned() {
                Ok(permit) => Ok(permit),
                Err(TryAcquireError::Closed) => Err(pool_closed()),
                Err(TryAcquireError::NoPermits) => Err(exhausted()),
            };
        }
        match timeout(self.free_connection_timeout, permits.acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(pool_closed()),
            Err(_) => {
                tracing::warn!(timeout = ?self.free_connection_timeout, "no free connection");
                Err(exhausted())
            }
        }
    }

    fn take_idle(&self, accept: impl Fn(&Connection) -> bool) -> Option<Connection> {
        let mut state = self.shared.lock();
        let position = state.idle.iter().rposition(|c| accept(c))?;
        state.idle.remove(position)
    }

    fn wrap(&self, conn: Connection, permit: OwnedSemaphorePermit) -> PooledConnection {
        PooledConnection {
            conn: Some(conn),
            shared: self.shared.clone(),
            _permit: permit,
        }
    }

    async fn create(&self, endpoint: &ServerLocation) -> Result<Connection> {
        let evicted = {
            let mut state = self.shared.lock();
            if state.closed {
                return Err(pool_closed());
            }
            let mut evicted = None;
            if let Some(max) = self.max_connections {
                if state.total >= max {
                    let position = state
                        .idle
                        .iter()
                        .position(|c| c.endpoint() != endpoint)
                        .or(if state.idle.is_empty() { None } else { Some(0) });
                    match position.and_then(|p| state.idle.remove(p)) {
                        Some(conn) => {
                            state.forget(conn.endpoint());
                            evicted = Some(conn);
                        }
                        None => return Err(exhausted()),
                    }
                }
            }
            state.reserve(endpoint);
            evicted
        };
        if let Some(conn) = evicted {
            self.shared.closed(&conn);
            conn.close(false).await;
        }

        match Connection::connect(endpoint, &self.options, self.jitter.next_variance()).await {
            Ok(conn) => {
                let _ = self.shared.events.send(ConnectionEvent::Opened {
                    id: conn.id(),
                    endpoint: endpoint.clone(),
                });
                Ok(conn)
            }
            Err(e) => {
                self.shared.lock().forget(endpoint);
                tracing::warn!(endpoint = %endpoint, error = %e, "failed to open connection");
                Err(e)
            }
        }
    }

    /// One maintenance pass: closes idle connections past their jittered
    /// lifetime, or past their jittered idle timeout while above the
    /// minimum, then opens connections until the minimum is met.
    pub async fn manage_connections(&self) {
        let removed = {
            let mut state = self.shared.lock();
            if state.closed {
                return;
            }
            let mut kept = VecDeque::with_capacity(state.idle.len());
            let mut removed = Vec::new();
            while let Some(conn) = state.idle.pop_front() {
                let above_min = state.total > self.min_connections;
                if conn.has_expired(self.load_conditioning_interval)
                    || (above_min && conn.is_idle(self.idle_timeout))
                {
                    state.forget(conn.endpoint());
                    removed.push(conn);
                } else {
                    kept.push_back(conn);
                }
            }
            state.idle = kept;
            removed
        };
        for conn in removed {
            self.shared.closed(&conn);
            conn.close(false).await;
        }

        let mut attempts = self.min_connections * 2;
        while attempts > 0 && self.stats().total < self.min_connections && !self.is_closed() {
            attempts -= 1;
            let endpoint = match self.source.select(&HashSet::new()).await {
                Ok(endpoint) => endpoint,
                Err(e) => {
                    tracing::debug!(error = %e, "cannot restore minimum connections");
                    break;
                }
            };
            if let Ok(conn) = self.create(&endpoint).await {
                self.shared.release(conn);
            }
        }
    }

    /// Pings one idle connection per server; a failed ping evicts every
    /// idle connection to that server.
    pub async fn ping_idle(&self) {
        let Ok(_permit) = self.shared.permits.clone().try_acquire_owned() else {
            return;
        };
        let endpoints: Vec<ServerLocation> = {
            let state = self.shared.lock();
            let mut seen: Vec<ServerLocation> =
                state.idle.iter().map(|c| c.endpoint().clone()).collect();
            seen.sort();
            seen.dedup();
            seen
        };
        for endpoint in endpoints {
            let Some(mut conn) = self.take_idle(|c| c.endpoint() == &endpoint) else {
                continue;
            };
            match conn.ping(self.read_timeout).await {
                Ok(()) => self.shared.release(conn),
                Err(e) => {
                    tracing::warn!(endpoint = %endpoint, error = %e, "ping failed");
                    conn.mark_broken();
                    self.shared.release(conn);
                    self.evict_endpoint(&endpoint);
                }
            }
        }
    }

    /// Drops every idle connection to `endpoint`.
    pub fn evict_endpoint(&self, endpoint: &ServerLocation) {
        let removed: Vec<Connection> = {
            let mut state = self.shared.lock();
            let (removed, kept): (VecDeque<_>, VecDeque<_>) =
                state.idle.drain(..).partition(|c| c.endpoint() == endpoint);
            state.idle = kept;
            for conn in &removed {
                state.forget(conn.endpoint());
            }
            removed.into_iter().collect()
        };
        for conn in &removed {
            self.shared.closed(conn);
        }
        let _ = self.shared.events.send(ConnectionEvent::EndpointDown {
            endpoint: endpoint.clone(),
        });
    }

    /// Closes the pool: idle connections are closed now, requests in flight
    /// on checked-out ones fail with `CacheClosed`, and every later acquire
    /// fails.
    pub async fn close(&self) {
        let idle: Vec<Connection> = {
            let mut state = self.shared.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let idle: Vec<Connection> = state.idle.drain(..).collect();
            for conn in &idle {
                state.forget(conn.endpoint());
            }
            idle
        };
        self.shared.permits.close();
        self.shared.closing.send_replace(true);
        for conn in idle {
            self.shared.closed(&conn);
            conn.close(false).await;
        }
    }
}

fn pool_closed() -> GeodeError {
    GeodeError::CacheClosed("pool is closed".to_string())
}

fn exhausted() -> GeodeError {
    GeodeError::PoolExhausted("all connections in use".to_string())
}
