//! Named regions of a cache and routing of pushed events to them.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

use async_trait::async_trait;
use geode_core::{CacheableKey, CacheableValue, GeodeError, Result};

use crate::listener::Operation;
use crate::pool::{Notification, NotificationSink};

use super::{Region, RegionInner};

/// Type-erased view of a region used by the cache.
#[async_trait]
pub(crate) trait RegionHandle: Send + Sync {
    fn pool_name(&self) -> &str;

    /// Applies a server push event to the local state and listeners.
    async fn apply_notification(&self, notification: Notification);

    /// Raises a region-level listener event.
    async fn fire_region_event(&self, operation: Operation);

    /// Stops background work and closes the listeners.
    async fn shutdown(&self);
}

struct Registered {
    handle: Arc<dyn RegionHandle>,
    typed: Arc<dyn Any + Send + Sync>,
}

/// The regions of one cache, by name.
#[derive(Default)]
pub(crate) struct RegionRegistry {
    regions: RwLock<HashMap<String, Registered>>,
}

impl std::fmt::Debug for RegionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self
            .regions
            .read()
            .map(|r| r.keys().cloned().collect())
            .unwrap_or_default();
        f.debug_struct("RegionRegistry").field("regions", &names).finish()
    }
}

impl RegionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert<K, V>(&self, inner: Arc<RegionInner<K, V>>) -> Result<()>
    where
        K: CacheableKey,
        V: CacheableValue,
    {
        let mut regions = self.regions.write().unwrap_or_else(|e| e.into_inner());
        let name = inner.name().to_string();
        if regions.contains_key(&name) {
            return Err(GeodeError::IllegalState(format!(
                "region {} already exists",
                name
            )));
        }
        regions.insert(
            name,
            Registered {
                handle: inner.clone(),
                typed: inner,
            },
        );
        Ok(())
    }

    /// Returns the region `name` typed as `Region<K, V>`.
    pub(crate) fn get<K, V>(&self, name: &str) -> Result<Option<Region<K, V>>>
    where
        K: CacheableKey,
        V: CacheableValue,
    {
        let typed = match self
            .regions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
        {
            Some(registered) => registered.typed.clone(),
            None => return Ok(None),
        };
        typed
            .downcast::<RegionInner<K, V>>()
            .map(|inner| Some(Region::from_inner(inner)))
            .map_err(|_| {
                GeodeError::IllegalArgument(format!(
                    "region {} has different key or value types",
                    name
                ))
            })
    }

    pub(crate) fn remove(&self, name: &str) -> bool {
        self.regions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name)
            .is_some()
    }

    fn handle(&self, name: &str) -> Option<Arc<dyn RegionHandle>> {
        self.regions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .map(|r| r.handle.clone())
    }

    fn handles_for_pool(&self, pool: &str) -> Vec<Arc<dyn RegionHandle>> {
        self.regions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|r| r.handle.pool_name() == pool)
            .map(|r| r.handle.clone())
            .collect()
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.regions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    /// Removes every region and shuts it down.
    pub(crate) async fn shutdown_all(&self) {
        let handles: Vec<Arc<dyn RegionHandle>> = self
            .regions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, r)| r.handle)
            .collect();
        for handle in handles {
            handle.shutdown().await;
        }
    }
}

/// Delivers the events of one pool's subscription queues to the regions
/// using that pool.
pub(crate) struct RegistrySink {
    registry: Weak<RegionRegistry>,
    pool: String,
}

impl RegistrySink {
    pub(crate) fn new(registry: &Arc<RegionRegistry>, pool: impl Into<String>) -> Self {
        Self {
            registry: Arc::downgrade(registry),
            pool: pool.into(),
        }
    }

    async fn fire_all(&self, operation: Operation) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        for handle in registry.handles_for_pool(&self.pool) {
            handle.fire_region_event(operation).await;
        }
    }
}

#[async_trait]
impl NotificationSink for RegistrySink {
    async fn deliver(&self, notification: Notification) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        match registry.handle(&notification.region) {
            Some(handle) => handle.apply_notification(notification).await,
            None => tracing::trace!(region = %notification.region, "event for unknown region dropped"),
        }
    }

    async fn region_live(&self) {
        self.fire_all(Operation::RegionLive).await;
    }

    async fn region_disconnected(&self) {
        self.fire_all(Operation::RegionDisconnected).await;
    }
}
