//! Region operations bound to a transaction.

use futures::FutureExt;
use geode_core::{CacheableKey, CacheableValue, Result};

use crate::transaction::TransactionContext;

use super::{existed_flag, first_value, Region};

/// A view of a region whose operations run inside one transaction.
///
/// Every operation goes to the server hosting the transaction. Local
/// copies and listeners see the writes only after a successful commit.
pub struct TransactionalRegion<'a, K, V> {
    region: &'a Region<K, V>,
    tx: &'a TransactionContext,
}

impl<'a, K, V> TransactionalRegion<'a, K, V>
where
    K: CacheableKey,
    V: CacheableValue,
{
    pub(super) fn new(region: &'a Region<K, V>, tx: &'a TransactionContext) -> Self {
        Self { region, tx }
    }

    /// Returns the transaction of this view.
    pub fn transaction(&self) -> &TransactionContext {
        self.tx
    }

    /// Stores `value` under `key` in the transaction.
    pub async fn put(&self, key: K, value: V) -> Result<()> {
        let inner = self.region.inner();
        inner.ensure_open()?;
        let request = inner.put_request(&key, &value)?;
        let reply = self.tx.execute(inner.pool(), request).await?;
        let existed = existed_flag(&reply);
        let inner = inner.clone();
        self.tx
            .defer(
                async move { inner.apply_put(key, value, existed, false, false).await }.boxed(),
            )
            .await;
        Ok(())
    }

    /// Reads `key` as seen by the transaction.
    pub async fn get(&self, key: &K) -> Result<Option<V>> {
        let inner = self.region.inner();
        inner.ensure_open()?;
        let reply = self.tx.execute(inner.pool(), inner.get_request(key)?).await?;
        first_value::<V>(&reply)
    }

    /// Destroys `key` in the transaction.
    pub async fn remove(&self, key: &K) -> Result<()> {
        let inner = self.region.inner();
        inner.ensure_open()?;
        let request = inner.keyed_event_request(geode_core::protocol::constants::DESTROY, key)?;
        self.tx.execute(inner.pool(), request).await?;
        let (inner, key) = (inner.clone(), key.clone());
        self.tx
            .defer(async move { inner.apply_destroy(key, false).await }.boxed())
            .await;
        Ok(())
    }

    /// Invalidates `key` in the transaction.
    pub async fn invalidate(&self, key: &K) -> Result<()> {
        let inner = self.region.inner();
        inner.ensure_open()?;
        let request =
            inner.keyed_event_request(geode_core::protocol::constants::INVALIDATE, key)?;
        self.tx.execute(inner.pool(), request).await?;
        let (inner, key) = (inner.clone(), key.clone());
        self.tx
            .defer(async move { inner.apply_invalidate(key, false).await }.boxed())
            .await;
        Ok(())
    }

    /// Returns true if `key` exists as seen by the transaction.
    pub async fn contains_key_on_server(&self, key: &K) -> Result<bool> {
        let inner = self.region.inner();
        inner.ensure_open()?;
        let reply = self
            .tx
            .execute(inner.pool(), inner.contains_key_request(key)?)
            .await?;
        reply.part(0)?.deserialize::<bool>()
    }
}
