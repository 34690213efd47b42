//! Listener trait for region events.

use super::{EntryEvent, RegionEvent};

/// Receives the events of a region.
///
/// Every method defaults to doing nothing. Listeners run on the cache's
/// chunk handler: on the calling task when the chunk handler thread is
/// disabled, on the dedicated thread otherwise. They must not block for
/// long.
///
/// # Example
///
/// ```ignore
/// struct Audit;
///
/// impl CacheListener<String, String> for Audit {
///     fn after_create(&self, event: EntryEvent<String, String>) {
///         tracing::info!(key = %event.key, "created");
///     }
/// }
/// ```
pub trait CacheListener<K, V>: Send + Sync {
    /// Called after an entry was created.
    fn after_create(&self, event: EntryEvent<K, V>) {
        let _ = event;
    }

    /// Called after an entry was updated.
    fn after_update(&self, event: EntryEvent<K, V>) {
        let _ = event;
    }

    /// Called after an entry was invalidated, including by expiration.
    fn after_invalidate(&self, event: EntryEvent<K, V>) {
        let _ = event;
    }

    /// Called after an entry was destroyed, including by expiration or
    /// eviction.
    fn after_destroy(&self, event: EntryEvent<K, V>) {
        let _ = event;
    }

    /// Called after the region was invalidated.
    fn after_region_invalidate(&self, event: RegionEvent) {
        let _ = event;
    }

    /// Called after the region was destroyed.
    fn after_region_destroy(&self, event: RegionEvent) {
        let _ = event;
    }

    /// Called after the region was cleared.
    fn after_region_clear(&self, event: RegionEvent) {
        let _ = event;
    }

    /// Called once the subscription queue delivered its initial events.
    fn after_region_live(&self, event: RegionEvent) {
        let _ = event;
    }

    /// Called when every subscription endpoint was lost.
    fn after_region_disconnected(&self, event: RegionEvent) {
        let _ = event;
    }

    /// Called when the listener is removed or the region closes.
    fn close(&self) {}
}

type EntryFn<K, V> = Box<dyn Fn(EntryEvent<K, V>) + Send + Sync>;
type RegionFn = Box<dyn Fn(RegionEvent) + Send + Sync>;

/// A listener built from closures.
///
/// Use [`FnCacheListener::builder`] to create one.
pub struct FnCacheListener<K, V> {
    on_create: Option<EntryFn<K, V>>,
    on_update: Option<EntryFn<K, V>>,
    on_invalidate: Option<EntryFn<K, V>>,
    on_destroy: Option<EntryFn<K, V>>,
    on_region: Option<RegionFn>,
}

impl<K, V> FnCacheListener<K, V> {
    /// Creates a builder.
    pub fn builder() -> FnCacheListenerBuilder<K, V> {
        FnCacheListenerBuilder::new()
    }

    fn region_event(&self, event: RegionEvent) {
        if let Some(ref f) = self.on_region {
            f(event);
        }
    }
}

impl<K, V> CacheListener<K, V> for FnCacheListener<K, V>
where
    K: Send + Sync,
    V: Send + Sync,
{
    fn after_create(&self, event: EntryEvent<K, V>) {
        if let Some(ref f) = self.on_create {
            f(event);
        }
    }

    fn after_update(&self, event: EntryEvent<K, V>) {
        if let Some(ref f) = self.on_update {
            f(event);
        }
    }

    fn after_invalidate(&self, event: EntryEvent<K, V>) {
        if let Some(ref f) = self.on_invalidate {
            f(event);
        }
    }

    fn after_destroy(&self, event: EntryEvent<K, V>) {
        if let Some(ref f) = self.on_destroy {
            f(event);
        }
    }

    fn after_region_invalidate(&self, event: RegionEvent) {
        self.region_event(event);
    }

    fn after_region_destroy(&self, event: RegionEvent) {
        self.region_event(event);
    }

    fn after_region_clear(&self, event: RegionEvent) {
        self.region_event(event);
    }

    fn after_region_live(&self, event: RegionEvent) {
        self.region_event(event);
    }

    fn after_region_disconnected(&self, event: RegionEvent) {
        self.region_event(event);
    }
}

impl<K, V> std::fmt::Debug for FnCacheListener<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnCacheListener")
            .field("on_create", &self.on_create.is_some())
            .field("on_update", &self.on_update.is_some())
            .field("on_invalidate", &self.on_invalidate.is_some())
            .field("on_destroy", &self.on_destroy.is_some())
            .field("on_region", &self.on_region.is_some())
            .finish()
    }
}

/// Builder for [`FnCacheListener`].
pub struct FnCacheListenerBuilder<K, V> {
    listener: FnCacheListener<K, V>,
}

impl<K, V> FnCacheListenerBuilder<K, V> {
    fn new() -> Self {
        Self {
            listener: FnCacheListener {
                on_create: None,
                on_update: None,
                on_invalidate: None,
                on_destroy: None,
                on_region: None,
            },
        }
    }

    /// Sets the handler for created entries.
    pub fn on_create<F>(mut self, f: F) -> Self
    where
        F: Fn(EntryEvent<K, V>) + Send + Sync + 'static,
    {
        self.listener.on_create = Some(Box::new(f));
        self
    }

    /// Sets the handler for updated entries.
    pub fn on_update<F>(mut self, f: F) -> Self
    where
        F: Fn(EntryEvent<K, V>) + Send + Sync + 'static,
    {
        self.listener.on_update = Some(Box::new(f));
        self
    }

    /// Sets the handler for invalidated entries.
    pub fn on_invalidate<F>(mut self, f: F) -> Self
    where
        F: Fn(EntryEvent<K, V>) + Send + Sync + 'static,
    {
        self.listener.on_invalidate = Some(Box::new(f));
        self
    }

    /// Sets the handler for destroyed entries.
    pub fn on_destroy<F>(mut self, f: F) -> Self
    where
        F: Fn(EntryEvent<K, V>) + Send + Sync + 'static,
    {
        self.listener.on_destroy = Some(Box::new(f));
        self
    }

    /// Sets one handler for every region-level event.
    pub fn on_region_event<F>(mut self, f: F) -> Self
    where
        F: Fn(RegionEvent) + Send + Sync + 'static,
    {
        self.listener.on_region = Some(Box::new(f));
        self
    }

    /// Builds the listener.
    pub fn build(self) -> FnCacheListener<K, V> {
        self.listener
    }
}

impl<K, V> Default for FnCacheListenerBuilder<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> std::fmt::Debug for FnCacheListenerBuilder<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnCacheListenerBuilder").finish()
    }
}
