//! Pool, cache and region configuration.
//!
//! Every configuration type is built through a builder whose `build()`
//! validates the settings and fills in defaults.

use std::time::Duration;

use geode_core::{GeodeError, ServerLocation};

const DEFAULT_POOL_NAME: &str = "default";
const DEFAULT_MIN_CONNECTIONS: usize = 1;
const DEFAULT_FREE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_LOAD_CONDITIONING_INTERVAL: Duration = Duration::from_secs(300);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_UPDATE_LOCATOR_LIST_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(59);
const DEFAULT_RETRY_ATTEMPTS: i32 = -1;
const DEFAULT_SUBSCRIPTION_REDUNDANCY: i32 = 0;
const DEFAULT_SUBSCRIPTION_MESSAGE_TRACKING_TIMEOUT: Duration = Duration::from_secs(900);
const DEFAULT_SUBSCRIPTION_ACK_INTERVAL: Duration = Duration::from_secs(100);
const DEFAULT_SOCKET_BUFFER_SIZE: usize = 32 * 1024;
const DEFAULT_DURABLE_CLIENT_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Error returned when a configuration fails validation.
#[derive(Debug, Clone, thiserror::Error)]
#[error("configuration error: {message}")]
pub struct ConfigError {
    message: String,
}

impl ConfigError {
    /// Creates a configuration error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<ConfigError> for GeodeError {
    fn from(err: ConfigError) -> Self {
        GeodeError::Configuration(err.message)
    }
}

/// Connection pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    name: String,
    locators: Vec<ServerLocation>,
    servers: Vec<ServerLocation>,
    server_group: String,
    min_connections: usize,
    max_connections: Option<usize>,
    free_connection_timeout: Duration,
    load_conditioning_interval: Duration,
    read_timeout: Duration,
    idle_timeout: Duration,
    ping_interval: Duration,
    update_locator_list_interval: Duration,
    connect_timeout: Duration,
    retry_attempts: i32,
    socket_buffer_size: usize,
    pr_single_hop_enabled: bool,
    bucket_wait_timeout: Duration,
    subscription_enabled: bool,
    subscription_redundancy: i32,
    subscription_message_tracking_timeout: Duration,
    subscription_ack_interval: Duration,
    expiry_jitter_seed: Option<u64>,
}

impl PoolConfig {
    /// Creates a new pool configuration builder.
    pub fn builder(name: impl Into<String>) -> PoolConfigBuilder {
        PoolConfigBuilder::new(name)
    }

    /// Returns the pool name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the configured locators.
    pub fn locators(&self) -> &[ServerLocation] {
        &self.locators
    }

    /// Returns the configured servers.
    pub fn servers(&self) -> &[ServerLocation] {
        &self.servers
    }

    /// Returns the server group, empty for all servers.
    pub fn server_group(&self) -> &str {
        &self.server_group
    }

    /// Returns the minimum number of connections kept open.
    pub fn min_connections(&self) -> usize {
        self.min_connections
    }

    /// Returns the maximum number of connections, `None` for unlimited.
    pub fn max_connections(&self) -> Option<usize> {
        self.max_connections
    }

    /// Returns how long an acquire waits for a free connection at max.
    pub fn free_connection_timeout(&self) -> Duration {
        self.free_connection_timeout
    }

    /// Returns the connection lifetime used for load conditioning.
    pub fn load_conditioning_interval(&self) -> Duration {
        self.load_conditioning_interval
    }

    /// Returns the read timeout for a single request.
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Returns how long a connection above the minimum may stay idle.
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Returns the interval between server pings.
    pub fn ping_interval(&self) -> Duration {
        self.ping_interval
    }

    /// Returns the interval between locator list refreshes.
    pub fn update_locator_list_interval(&self) -> Duration {
        self.update_locator_list_interval
    }

    /// Returns the TCP connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Returns the retry bound; `-1` means try every known server once.
    pub fn retry_attempts(&self) -> i32 {
        self.retry_attempts
    }

    /// Returns the socket buffer size.
    pub fn socket_buffer_size(&self) -> usize {
        self.socket_buffer_size
    }

    /// Returns whether requests are routed to the bucket's server.
    pub fn pr_single_hop_enabled(&self) -> bool {
        self.pr_single_hop_enabled
    }

    /// Returns how long a bucket marked for timeout is skipped by single-hop
    /// routing. Zero disables marking.
    pub fn bucket_wait_timeout(&self) -> Duration {
        self.bucket_wait_timeout
    }

    /// Returns whether subscription queues are opened.
    pub fn subscription_enabled(&self) -> bool {
        self.subscription_enabled
    }

    /// Returns the number of redundant subscription queues, `-1` for all.
    pub fn subscription_redundancy(&self) -> i32 {
        self.subscription_redundancy
    }

    /// Returns how long event-tracker entries are kept.
    pub fn subscription_message_tracking_timeout(&self) -> Duration {
        self.subscription_message_tracking_timeout
    }

    /// Returns the interval between periodic acknowledgements.
    pub fn subscription_ack_interval(&self) -> Duration {
        self.subscription_ack_interval
    }

    /// Returns the seed for connection expiry jitter, if fixed.
    pub fn expiry_jitter_seed(&self) -> Option<u64> {
        self.expiry_jitter_seed
    }
}

/// Builder for [`PoolConfig`].
#[derive(Debug, Clone, Default)]
pub struct PoolConfigBuilder {
    name: Option<String>,
    locators: Vec<ServerLocation>,
    servers: Vec<ServerLocation>,
    server_group: Option<String>,
    min_connections: Option<usize>,
    max_connections: Option<i32>,
    free_connection_timeout: Option<Duration>,
    load_conditioning_interval: Option<Duration>,
    read_timeout: Option<Duration>,
    idle_timeout: Option<Duration>,
    ping_interval: Option<Duration>,
    update_locator_list_interval: Option<Duration>,
    connect_timeout: Option<Duration>,
    retry_attempts: Option<i32>,
    socket_buffer_size: Option<usize>,
    pr_single_hop_enabled: Option<bool>,
    bucket_wait_timeout: Option<Duration>,
    subscription_enabled: Option<bool>,
    subscription_redundancy: Option<i32>,
    subscription_message_tracking_timeout: Option<Duration>,
    subscription_ack_interval: Option<Duration>,
    expiry_jitter_seed: Option<u64>,
}

impl PoolConfigBuilder {
    /// Creates a builder for a pool called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Adds a locator endpoint.
    pub fn add_locator(mut self, location: ServerLocation) -> Self {
        self.locators.push(location);
        self
    }

    /// Adds a server endpoint, used when no locator is configured.
    pub fn add_server(mut self, location: ServerLocation) -> Self {
        self.servers.push(location);
        self
    }

    /// Restricts the pool to servers of `group`.
    pub fn server_group(mut self, group: impl Into<String>) -> Self {
        self.server_group = Some(group.into());
        self
    }

    /// Sets the minimum number of connections.
    pub fn min_connections(mut self, min: usize) -> Self {
        self.min_connections = Some(min);
        self
    }

    /// Sets the maximum number of connections; `-1` means unlimited.
    pub fn max_connections(mut self, max: i32) -> Self {
        self.max_connections = Some(max);
        self
    }

    /// Sets how long an acquire waits for a free connection.
    pub fn free_connection_timeout(mut self, timeout: Duration) -> Self {
        self.free_connection_timeout = Some(timeout);
        self
    }

    /// Sets the connection lifetime for load conditioning.
    pub fn load_conditioning_interval(mut self, interval: Duration) -> Self {
        self.load_conditioning_interval = Some(interval);
        self
    }

    /// Sets the read timeout.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Sets the idle timeout.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Sets the ping interval.
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = Some(interval);
        self
    }

    /// Sets the locator list refresh interval.
    pub fn update_locator_list_interval(mut self, interval: Duration) -> Self {
        self.update_locator_list_interval = Some(interval);
        self
    }

    /// Sets the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets the retry bound.
    pub fn retry_attempts(mut self, attempts: i32) -> Self {
        self.retry_attempts = Some(attempts);
        self
    }

    /// Sets the socket buffer size.
    pub fn socket_buffer_size(mut self, size: usize) -> Self {
        self.socket_buffer_size = Some(size);
        self
    }

    /// Enables or disables single-hop routing.
    pub fn pr_single_hop_enabled(mut self, enabled: bool) -> Self {
        self.pr_single_hop_enabled = Some(enabled);
        self
    }

    /// Sets the bucket wait timeout.
    pub fn bucket_wait_timeout(mut self, timeout: Duration) -> Self {
        self.bucket_wait_timeout = Some(timeout);
        self
    }

    /// Enables or disables subscription queues.
    pub fn subscription_enabled(mut self, enabled: bool) -> Self {
        self.subscription_enabled = Some(enabled);
        self
    }

    /// Sets subscription redundancy.
    pub fn subscription_redundancy(mut self, redundancy: i32) -> Self {
        self.subscription_redundancy = Some(redundancy);
        self
    }

    /// Sets the event-tracker entry timeout.
    pub fn subscription_message_tracking_timeout(mut self, timeout: Duration) -> Self {
        self.subscription_message_tracking_timeout = Some(timeout);
        self
    }

    /// Sets the periodic acknowledgement interval.
    pub fn subscription_ack_interval(mut self, interval: Duration) -> Self {
        self.subscription_ack_interval = Some(interval);
        self
    }

    /// Fixes the seed used for connection expiry jitter.
    pub fn expiry_jitter_seed(mut self, seed: u64) -> Self {
        self.expiry_jitter_seed = Some(seed);
        self
    }

    /// Builds the configuration, validating all settings.
    pub fn build(self) -> Result<PoolConfig, ConfigError> {
        let name = self.name.unwrap_or_else(|| DEFAULT_POOL_NAME.to_string());
        if name.is_empty() {
            return Err(ConfigError::new("pool name must not be empty"));
        }
        if self.locators.is_empty() && self.servers.is_empty() {
            return Err(ConfigError::new(format!(
                "pool '{}' needs at least one locator or server",
                name
            )));
        }

        let min_connections = self.min_connections.unwrap_or(DEFAULT_MIN_CONNECTIONS);
        let max_connections = match self.max_connections {
            None | Some(-1) => None,
            Some(max) if max <= 0 => {
                return Err(ConfigError::new(format!(
                    "max_connections must be positive or -1, got {}",
                    max
                )))
            }
            Some(max) => Some(max as usize),
        };
        if let Some(max) = max_connections {
            if min_connections > max {
                return Err(ConfigError::new(format!(
                    "min_connections ({}) exceeds max_connections ({})",
                    min_connections, max
                )));
            }
        }

        let read_timeout = self.read_timeout.unwrap_or(DEFAULT_READ_TIMEOUT);
        if read_timeout.is_zero() {
            return Err(ConfigError::new("read_timeout must be positive"));
        }

        let retry_attempts = self.retry_attempts.unwrap_or(DEFAULT_RETRY_ATTEMPTS);
        if retry_attempts < -1 {
            return Err(ConfigError::new(format!(
                "retry_attempts must be -1 or greater, got {}",
                retry_attempts
            )));
        }

        let subscription_redundancy = self
            .subscription_redundancy
            .unwrap_or(DEFAULT_SUBSCRIPTION_REDUNDANCY);
        if subscription_redundancy < -1 {
            return Err(ConfigError::new(format!(
                "subscription_redundancy must be -1 or greater, got {}",
                subscription_redundancy
            )));
        }

        let socket_buffer_size = self.socket_buffer_size.unwrap_or(DEFAULT_SOCKET_BUFFER_SIZE);
        if socket_buffer_size == 0 {
            return Err(ConfigError::new("socket_buffer_size must be positive"));
        }

        Ok(PoolConfig {
            name,
            locators: self.locators,
            servers: self.servers,
            server_group: self.server_group.unwrap_or_default(),
            min_connections,
            max_connections,
            free_connection_timeout: self
                .free_connection_timeout
                .unwrap_or(DEFAULT_FREE_CONNECTION_TIMEOUT),
            load_conditioning_interval: self
                .load_conditioning_interval
                .unwrap_or(DEFAULT_LOAD_CONDITIONING_INTERVAL),
            read_timeout,
            idle_timeout: self.idle_timeout.unwrap_or(DEFAULT_IDLE_TIMEOUT),
            ping_interval: self.ping_interval.unwrap_or(DEFAULT_PING_INTERVAL),
            update_locator_list_interval: self
                .update_locator_list_interval
                .unwrap_or(DEFAULT_UPDATE_LOCATOR_LIST_INTERVAL),
            connect_timeout: self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            retry_attempts,
            socket_buffer_size,
            pr_single_hop_enabled: self.pr_single_hop_enabled.unwrap_or(true),
            bucket_wait_timeout: self.bucket_wait_timeout.unwrap_or(Duration::ZERO),
            subscription_enabled: self.subscription_enabled.unwrap_or(false),
            subscription_redundancy,
            subscription_message_tracking_timeout: self
                .subscription_message_tracking_timeout
                .unwrap_or(DEFAULT_SUBSCRIPTION_MESSAGE_TRACKING_TIMEOUT),
            subscription_ack_interval: self
                .subscription_ack_interval
                .unwrap_or(DEFAULT_SUBSCRIPTION_ACK_INTERVAL),
            expiry_jitter_seed: self.expiry_jitter_seed,
        })
    }
}

/// Client cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    name: String,
    enable_chunk_handler_thread: bool,
    durable_client_id: Option<String>,
    durable_client_timeout: Duration,
}

impl CacheConfig {
    /// Creates a new cache configuration builder.
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::new()
    }

    /// Returns the cache name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns whether chunk processing and listener dispatch run on a
    /// dedicated thread.
    pub fn enable_chunk_handler_thread(&self) -> bool {
        self.enable_chunk_handler_thread
    }

    /// Returns the durable client id, if any.
    pub fn durable_client_id(&self) -> Option<&str> {
        self.durable_client_id.as_deref()
    }

    /// Returns how long servers keep the durable queue after disconnect.
    pub fn durable_client_timeout(&self) -> Duration {
        self.durable_client_timeout
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: "geode-client".to_string(),
            enable_chunk_handler_thread: false,
            durable_client_id: None,
            durable_client_timeout: DEFAULT_DURABLE_CLIENT_TIMEOUT,
        }
    }
}

/// Builder for [`CacheConfig`].
#[derive(Debug, Clone, Default)]
pub struct CacheConfigBuilder {
    name: Option<String>,
    enable_chunk_handler_thread: Option<bool>,
    durable_client_id: Option<String>,
    durable_client_timeout: Option<Duration>,
}

impl CacheConfigBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cache name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Runs chunk processing and listener dispatch on a dedicated thread.
    pub fn enable_chunk_handler_thread(mut self, enabled: bool) -> Self {
        self.enable_chunk_handler_thread = Some(enabled);
        self
    }

    /// Makes the client durable under `id`.
    pub fn durable_client_id(mut self, id: impl Into<String>) -> Self {
        self.durable_client_id = Some(id.into());
        self
    }

    /// Sets the durable queue timeout.
    pub fn durable_client_timeout(mut self, timeout: Duration) -> Self {
        self.durable_client_timeout = Some(timeout);
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> Result<CacheConfig, ConfigError> {
        let defaults = CacheConfig::default();
        if let Some(id) = &self.durable_client_id {
            if id.is_empty() {
                return Err(ConfigError::new("durable_client_id must not be empty"));
            }
        }
        let durable_client_timeout = self
            .durable_client_timeout
            .unwrap_or(defaults.durable_client_timeout);
        if durable_client_timeout.as_secs() > i32::MAX as u64 {
            return Err(ConfigError::new("durable_client_timeout is too large"));
        }
        Ok(CacheConfig {
            name: self.name.unwrap_or(defaults.name),
            enable_chunk_handler_thread: self
                .enable_chunk_handler_thread
                .unwrap_or(defaults.enable_chunk_handler_thread),
            durable_client_id: self.durable_client_id,
            durable_client_timeout,
        })
    }
}

/// What happens to a local entry when it expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpirationAction {
    /// Drop the value, keep the key.
    #[default]
    LocalInvalidate,
    /// Drop the entry.
    LocalDestroy,
}

/// An expiration timeout and the action taken when it elapses.
///
/// A zero timeout disables expiration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExpirationAttributes {
    timeout: Duration,
    action: ExpirationAction,
}

impl ExpirationAttributes {
    /// Creates expiration attributes.
    pub fn new(timeout: Duration, action: ExpirationAction) -> Self {
        Self { timeout, action }
    }

    /// Returns the timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the action.
    pub fn action(&self) -> ExpirationAction {
        self.action
    }

    /// Returns true if expiration is enabled.
    pub fn is_enabled(&self) -> bool {
        !self.timeout.is_zero()
    }
}

/// Region configuration.
#[derive(Debug, Clone)]
pub struct RegionConfig {
    name: String,
    pool_name: Option<String>,
    caching_enabled: bool,
    entry_idle_timeout: ExpirationAttributes,
    entry_time_to_live: ExpirationAttributes,
    lru_entries_limit: Option<usize>,
    expiry_sweep_interval: Duration,
}

impl RegionConfig {
    /// Creates a new region configuration builder.
    pub fn builder(name: impl Into<String>) -> RegionConfigBuilder {
        RegionConfigBuilder::new(name)
    }

    /// Returns the region name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the pool name; `None` selects the default pool.
    pub fn pool_name(&self) -> Option<&str> {
        self.pool_name.as_deref()
    }

    /// Returns whether values are kept in a local entry cache.
    pub fn caching_enabled(&self) -> bool {
        self.caching_enabled
    }

    /// Returns the entry idle timeout.
    pub fn entry_idle_timeout(&self) -> ExpirationAttributes {
        self.entry_idle_timeout
    }

    /// Returns the entry time to live.
    pub fn entry_time_to_live(&self) -> ExpirationAttributes {
        self.entry_time_to_live
    }

    /// Returns the LRU entry limit, if any.
    pub fn lru_entries_limit(&self) -> Option<usize> {
        self.lru_entries_limit
    }

    /// Returns how often the expiry task sweeps the local cache.
    pub fn expiry_sweep_interval(&self) -> Duration {
        self.expiry_sweep_interval
    }

    /// Returns true if any expiration is configured.
    pub fn has_expiration(&self) -> bool {
        self.entry_idle_timeout.is_enabled() || self.entry_time_to_live.is_enabled()
    }
}

/// Builder for [`RegionConfig`].
#[derive(Debug, Clone, Default)]
pub struct RegionConfigBuilder {
    name: Option<String>,
    pool_name: Option<String>,
    caching_enabled: Option<bool>,
    entry_idle_timeout: Option<ExpirationAttributes>,
    entry_time_to_live: Option<ExpirationAttributes>,
    lru_entries_limit: Option<usize>,
    expiry_sweep_interval: Option<Duration>,
}

impl RegionConfigBuilder {
    /// Creates a builder for a region called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Binds the region to the pool called `name`.
    pub fn pool_name(mut self, name: impl Into<String>) -> Self {
        self.pool_name = Some(name.into());
        self
    }

    /// Keeps values in a local entry cache.
    pub fn caching_enabled(mut self, enabled: bool) -> Self {
        self.caching_enabled = Some(enabled);
        self
    }

    /// Sets the entry idle timeout.
    pub fn entry_idle_timeout(mut self, attributes: ExpirationAttributes) -> Self {
        self.entry_idle_timeout = Some(attributes);
        self
    }

    /// Sets the entry time to live.
    pub fn entry_time_to_live(mut self, attributes: ExpirationAttributes) -> Self {
        self.entry_time_to_live = Some(attributes);
        self
    }

    /// Limits the local cache to `limit` entries, least recently used first out.
    pub fn lru_entries_limit(mut self, limit: usize) -> Self {
        self.lru_entries_limit = Some(limit);
        self
    }

    /// Sets how often the expiry task sweeps the local cache.
    pub fn expiry_sweep_interval(mut self, interval: Duration) -> Self {
        self.expiry_sweep_interval = Some(interval);
        self
    }

    /// Builds the configuration, validating all settings.
    pub fn build(self) -> Result<RegionConfig, ConfigError> {
        let name = self.name.unwrap_or_default();
        if name.is_empty() {
            return Err(ConfigError::new("region name must not be empty"));
        }
        if name.contains('/') {
            return Err(ConfigError::new(format!(
                "region name '{}' must not contain '/'",
                name
            )));
        }

        let caching_enabled = self.caching_enabled.unwrap_or(false);
        let entry_idle_timeout = self.entry_idle_timeout.unwrap_or_default();
        let entry_time_to_live = self.entry_time_to_live.unwrap_or_default();
        let uses_local_cache = entry_idle_timeout.is_enabled()
            || entry_time_to_live.is_enabled()
            || self.lru_entries_limit.is_some();
        if uses_local_cache && !caching_enabled {
            return Err(ConfigError::new(format!(
                "region '{}' configures expiration or LRU without caching enabled",
                name
            )));
        }
        if self.lru_entries_limit == Some(0) {
            return Err(ConfigError::new("lru_entries_limit must be positive"));
        }

        let expiry_sweep_interval = self
            .expiry_sweep_interval
            .unwrap_or(DEFAULT_EXPIRY_SWEEP_INTERVAL);
        if expiry_sweep_interval.is_zero() {
            return Err(ConfigError::new("expiry_sweep_interval must be positive"));
        }

        Ok(RegionConfig {
            name,
            pool_name: self.pool_name,
            caching_enabled,
            entry_idle_timeout,
            entry_time_to_live,
            lru_entries_limit: self.lru_entries_limit,
            expiry_sweep_interval,
        })
    }
}
