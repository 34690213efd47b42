//! Listener registration and event dispatch.

use std::sync::{Arc, RwLock};

use geode_core::Result;

use crate::chunk_handler::ChunkHandler;

use super::{CacheListener, EntryEvent, ListenerId, Operation, RegionEvent};

/// Calls the listener method matching the event's operation.
pub fn dispatch_entry_event<K, V>(listener: &dyn CacheListener<K, V>, event: EntryEvent<K, V>) {
    match event.operation {
        Operation::Create | Operation::PutAllCreate => listener.after_create(event),
        Operation::Update | Operation::PutAllUpdate => listener.after_update(event),
        Operation::Invalidate | Operation::ExpireInvalidate => listener.after_invalidate(event),
        Operation::Destroy | Operation::ExpireDestroy | Operation::Evict => {
            listener.after_destroy(event)
        }
        op => tracing::debug!(?op, "region operation in entry event ignored"),
    }
}

/// Calls the listener method matching the region event's operation.
pub fn dispatch_region_event<K, V>(listener: &dyn CacheListener<K, V>, event: RegionEvent) {
    match event.operation {
        Operation::RegionInvalidate => listener.after_region_invalidate(event),
        Operation::RegionDestroy => listener.after_region_destroy(event),
        Operation::RegionClear => listener.after_region_clear(event),
        Operation::RegionLive => listener.after_region_live(event),
        Operation::RegionDisconnected => listener.after_region_disconnected(event),
        op => tracing::debug!(?op, "entry operation in region event ignored"),
    }
}

type Registered<K, V> = (ListenerId, Arc<dyn CacheListener<K, V>>);

/// The listeners of one region.
pub struct ListenerRegistry<K, V> {
    listeners: RwLock<Vec<Registered<K, V>>>,
}

impl<K, V> ListenerRegistry<K, V>
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Registers `listener`.
    pub fn add(&self, listener: Arc<dyn CacheListener<K, V>>) -> ListenerId {
        let id = ListenerId::new();
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, listener));
        id
    }

    /// Removes and closes the listener `id`. Returns false if unknown.
    pub fn remove(&self, id: ListenerId) -> bool {
        let removed = {
            let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
            listeners
                .iter()
                .position(|(lid, _)| *lid == id)
                .map(|index| listeners.remove(index))
        };
        match removed {
            Some((_, listener)) => {
                listener.close();
                true
            }
            None => false,
        }
    }

    /// Returns the number of listeners.
    pub fn len(&self) -> usize {
        self.listeners.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Returns true if no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<dyn CacheListener<K, V>>> {
        self.listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, l)| l.clone())
            .collect()
    }

    /// Delivers `event` to every listener on the chunk handler.
    pub async fn fire_entry(&self, handler: &ChunkHandler, event: EntryEvent<K, V>) -> Result<()> {
        let listeners = self.snapshot();
        if listeners.is_empty() {
            return Ok(());
        }
        handler
            .run(move || {
                for listener in listeners {
                    dispatch_entry_event(listener.as_ref(), event.clone());
                }
            })
            .await
    }

    /// Delivers a region event to every listener on the chunk handler.
    pub async fn fire_region(&self, handler: &ChunkHandler, event: RegionEvent) -> Result<()> {
        let listeners = self.snapshot();
        if listeners.is_empty() {
            return Ok(());
        }
        handler
            .run(move || {
                for listener in listeners {
                    dispatch_region_event(listener.as_ref(), event.clone());
                }
            })
            .await
    }

    /// Removes and closes every listener.
    pub fn close_all(&self) {
        let listeners = std::mem::take(&mut *self.listeners.write().unwrap_or_else(|e| e.into_inner()));
        for (_, listener) in listeners {
            listener.close();
        }
    }
}

impl<K, V> Default for ListenerRegistry<K, V>
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> std::fmt::Debug for ListenerRegistry<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.listeners.read().map(|l| l.len()).unwrap_or_default();
        f.debug_struct("ListenerRegistry")
            .field("listeners", &count)
            .finish()
    }
}
