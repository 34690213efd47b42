//! Client-side transactions.
//!
//! A transaction is driven through an explicit [`TransactionContext`]
//! obtained from [`TransactionManager::begin`]. Regions accept the context
//! through `Region::transactional`, which routes every operation of the
//! transaction over one sticky server connection.
//!
//! # Example
//!
//! ```ignore
//! let tx = cache.transaction_manager().begin()?;
//! let orders = cache.region::<String, String>("orders")?;
//! orders.transactional(&tx).put("o-1".to_string(), "open".to_string()).await?;
//! tx.commit().await?;
//! ```

use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};

mod cleaner;
mod context;
mod manager;

pub use context::TransactionContext;
pub use manager::TransactionManager;

static NEXT_TRANSACTION_ID: AtomicI32 = AtomicI32::new(1);

/// Process-wide identifier of a client transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(i32);

impl TransactionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the id carried in message headers.
    pub fn value(&self) -> i32 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Operations may be added.
    Active,
    /// The server accepted the commit.
    Committed,
    /// The transaction was rolled back.
    RolledBack,
    /// The transaction ended after an error.
    Failed,
}

impl TransactionState {
    /// Returns true once the transaction can no longer be used.
    pub fn is_finished(&self) -> bool {
        !matches!(self, TransactionState::Active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_increasing() {
        let first = TransactionId::next();
        let second = TransactionId::next();
        assert!(second > first);
        assert!(first.value() >= 1);
        assert_eq!(first.to_string(), format!("tx-{}", first.value()));
    }

    #[test]
    fn test_finished_states() {
        assert!(!TransactionState::Active.is_finished());
        assert!(TransactionState::Committed.is_finished());
        assert!(TransactionState::RolledBack.is_finished());
        assert!(TransactionState::Failed.is_finished());
    }
}
