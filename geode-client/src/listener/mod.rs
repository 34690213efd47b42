//! Region event listeners.

use std::fmt;

use uuid::Uuid;

mod cache_listener;
mod dispatcher;

pub use cache_listener::{CacheListener, FnCacheListener, FnCacheListenerBuilder};
pub use dispatcher::{dispatch_entry_event, dispatch_region_event, ListenerRegistry};

/// Identifies a listener added to a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

impl ListenerId {
    /// Creates a new unique id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// What caused an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// An entry was created.
    Create,
    /// An existing entry got a new value.
    Update,
    /// An entry was created by a bulk put.
    PutAllCreate,
    /// An entry was updated by a bulk put.
    PutAllUpdate,
    /// An entry's value was invalidated.
    Invalidate,
    /// An entry was destroyed.
    Destroy,
    /// The local copy was invalidated because it expired.
    ExpireInvalidate,
    /// The local copy was destroyed because it expired.
    ExpireDestroy,
    /// The local copy was evicted to respect the entry limit.
    Evict,
    /// Every entry of the region was invalidated.
    RegionInvalidate,
    /// The region was destroyed.
    RegionDestroy,
    /// The region was cleared.
    RegionClear,
    /// The subscription queue of the region finished its initial delivery.
    RegionLive,
    /// Every subscription endpoint of the region was lost.
    RegionDisconnected,
}

impl Operation {
    /// Returns true for expiration events.
    pub fn is_expiration(&self) -> bool {
        matches!(self, Operation::ExpireInvalidate | Operation::ExpireDestroy)
    }

    /// Returns true for eviction events.
    pub fn is_eviction(&self) -> bool {
        matches!(self, Operation::Evict)
    }

    /// Returns true for operations concerning a single entry.
    pub fn is_entry(&self) -> bool {
        matches!(
            self,
            Operation::Create
                | Operation::Update
                | Operation::PutAllCreate
                | Operation::PutAllUpdate
                | Operation::Invalidate
                | Operation::Destroy
                | Operation::ExpireInvalidate
                | Operation::ExpireDestroy
                | Operation::Evict
        )
    }
}

/// An event concerning one entry.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryEvent<K, V> {
    /// Name of the region.
    pub region: String,
    /// Key of the entry.
    pub key: K,
    /// Value before the operation, if known.
    pub old_value: Option<V>,
    /// Value after the operation.
    pub new_value: Option<V>,
    /// What caused the event.
    pub operation: Operation,
    /// True if the event was pushed by a server.
    pub origin_remote: bool,
}

impl<K, V> EntryEvent<K, V> {
    /// Creates an event.
    pub fn new(
        region: impl Into<String>,
        key: K,
        old_value: Option<V>,
        new_value: Option<V>,
        operation: Operation,
        origin_remote: bool,
    ) -> Self {
        Self {
            region: region.into(),
            key,
            old_value,
            new_value,
            operation,
            origin_remote,
        }
    }
}

/// An event concerning a whole region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionEvent {
    /// Name of the region.
    pub region: String,
    /// What caused the event.
    pub operation: Operation,
    /// True if the event was pushed by a server.
    pub origin_remote: bool,
}

impl RegionEvent {
    /// Creates an event.
    pub fn new(region: impl Into<String>, operation: Operation, origin_remote: bool) -> Self {
        Self {
            region: region.into(),
            operation,
            origin_remote,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listener_ids_are_unique() {
        let a = ListenerId::new();
        let b = ListenerId::new();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("listener-"));
    }

    #[test]
    fn test_operation_flags() {
        assert!(Operation::ExpireDestroy.is_expiration());
        assert!(Operation::ExpireInvalidate.is_entry());
        assert!(Operation::Evict.is_eviction());
        assert!(!Operation::Destroy.is_expiration());
        assert!(!Operation::RegionClear.is_entry());
    }
}
