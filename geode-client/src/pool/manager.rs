//! Registry of the pools of a cache.

use std::sync::RwLock;

use geode_core::{GeodeError, Result};

use super::Pool;

#[derive(Debug, Default)]
struct Registry {
    pools: Vec<Pool>,
    default: Option<Pool>,
    default_assigned: bool,
    closed: bool,
}

/// Named pools of one cache.
///
/// The first pool added becomes the default pool. The default is never
/// reassigned: once it is removed, [`PoolManager::default_pool`] stays empty.
#[derive(Debug, Default)]
pub struct PoolManager {
    registry: RwLock<Registry>,
}

impl PoolManager {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `pool`; fails if a pool with the same name exists.
    pub fn add(&self, pool: Pool) -> Result<()> {
        let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
        if registry.closed {
            return Err(GeodeError::CacheClosed("pool manager is closed".to_string()));
        }
        if registry.pools.iter().any(|p| p.name() == pool.name()) {
            return Err(GeodeError::IllegalArgument(format!(
                "pool {} already exists",
                pool.name()
            )));
        }
        if !registry.default_assigned {
            tracing::debug!(pool = %pool.name(), "default pool assigned");
            registry.default = Some(pool.clone());
            registry.default_assigned = true;
        }
        registry.pools.push(pool);
        Ok(())
    }

    /// Returns the pool named `name`.
    pub fn find(&self, name: &str) -> Option<Pool> {
        self.registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .pools
            .iter()
            .find(|p| p.name() == name)
            .cloned()
    }

    /// Removes the pool named `name` and returns it. The pool itself is not
    /// destroyed.
    pub fn remove(&self, name: &str) -> Option<Pool> {
        let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
        let index = registry.pools.iter().position(|p| p.name() == name)?;
        let pool = registry.pools.remove(index);
        if registry
            .default
            .as_ref()
            .is_some_and(|default| default.ptr_eq(&pool))
        {
            registry.default = None;
        }
        Some(pool)
    }

    /// Returns every pool, in the order they were added.
    pub fn pools(&self) -> Vec<Pool> {
        self.registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .pools
            .clone()
    }

    /// Returns the default pool.
    pub fn default_pool(&self) -> Option<Pool> {
        self.registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .default
            .clone()
    }

    /// Destroys every pool. Later adds fail.
    pub async fn close(&self, keepalive: bool) {
        let pools = {
            let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
            registry.closed = true;
            registry.default = None;
            std::mem::take(&mut registry.pools)
        };
        for pool in pools {
            pool.destroy(keepalive).await;
        }
    }
}
