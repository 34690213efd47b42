//! Async native client for Geode cache clusters.
//!
//! The client talks the Geode binary client/server protocol over Tokio.
//! A [`ClientCache`] owns named connection [`Pool`]s. Each pool finds its
//! servers through locators (or a fixed server list), keeps a bounded set
//! of connections, routes single-key operations to the server owning the
//! key's bucket, and optionally maintains redundant subscription queues for
//! server push events.
//!
//! [`Region`]s are the typed key/value front end. They can keep a local
//! copy of entries with expiration and an entry limit, and they deliver
//! events to [`CacheListener`]s. Transactions are started from the
//! cache's [`TransactionManager`].
//!
//! # Quick start
//!
//! ```rust,no_run
//! use geode_client::{CacheConfig, ClientCache, PoolConfig, RegionConfig};
//! use geode_core::ServerLocation;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cache = ClientCache::new(CacheConfig::default())?;
//!     cache
//!         .create_pool(
//!             PoolConfig::builder("default")
//!                 .add_locator(ServerLocation::new("localhost", 10334))
//!                 .pr_single_hop_enabled(true)
//!                 .build()?,
//!         )
//!         .await?;
//!
//!     let region = cache.create_region::<String, String>(
//!         RegionConfig::builder("orders").caching_enabled(true).build()?,
//!     )?;
//!     region.put("o-1".to_string(), "open".to_string()).await?;
//!     println!("{:?}", region.get(&"o-1".to_string()).await?);
//!
//!     let tx = cache.transaction_manager().begin()?;
//!     region.transactional(&tx).put("o-2".to_string(), "open".to_string()).await?;
//!     tx.commit().await?;
//!
//!     cache.close(false).await;
//!     Ok(())
//! }
//! ```
//!
//! # Logging
//!
//! The crate logs through [`tracing`]. Install a subscriber such as
//! `tracing-subscriber` to see connection, failover and subscription
//! events.

#![warn(missing_docs)]

pub mod cache;
pub mod chunk_handler;
pub mod config;
pub mod connection;
pub mod listener;
pub mod metadata;
pub mod pool;
pub mod region;
pub mod transaction;

pub use cache::ClientCache;
pub use chunk_handler::{ChunkHandler, ChunkedResult};
pub use config::{
    CacheConfig, CacheConfigBuilder, ConfigError, ExpirationAction, ExpirationAttributes,
    PoolConfig, PoolConfigBuilder, RegionConfig, RegionConfigBuilder,
};
pub use connection::{Connection, ConnectionManager, LocatorClient};
pub use geode_core as core;
pub use geode_core::{GeodeError, Result, ServerLocation};
pub use listener::{
    CacheListener, EntryEvent, FnCacheListener, FnCacheListenerBuilder, ListenerId, Operation,
    RegionEvent,
};
pub use metadata::{ClientMetadata, ClientMetadataService};
pub use pool::{Interest, InterestKeys, Pool, PoolManager, RequestOptions, Routing};
pub use region::{EntryCacheStats, Region, ResultCollector, TransactionalRegion};
pub use transaction::{TransactionContext, TransactionId, TransactionManager, TransactionState};
