use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, Weak};
use std::time::Duration;

use geode_core::{GeodeError, Result};
use tokio::sync::Notify;
use tokio::time::Instant;

use super::context::{TransactionContext, TxInner};
use super::TransactionId;

/// Creates transactions and parks suspended ones.
#[derive(Debug, Default)]
pub struct TransactionManager {
    suspended: Mutex<HashMap<TransactionId, TransactionContext>>,
    known: Mutex<HashMap<TransactionId, Weak<TxInner>>>,
    suspended_changed: Notify,
    closed: AtomicBool,
}

impl TransactionManager {
    /// Creates a manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a transaction.
    pub fn begin(&self) -> Result<TransactionContext> {
        if self.closed.load(Ordering::Acquire) {
            return Err(GeodeError::CacheClosed("cache is closed".to_string()));
        }
        let tx = TransactionContext::new(TransactionId::next());
        let mut known = self.known.lock().unwrap_or_else(|e| e.into_inner());
        known.retain(|_, weak| TransactionContext::upgrade(weak).is_some_and(|t| t.is_active()));
        known.insert(tx.id(), tx.downgrade());
        tracing::debug!(tx = %tx.id(), "transaction started");
        Ok(tx)
    }

    /// Suspends `tx` and returns the id to resume it with.
    pub fn suspend(&self, tx: TransactionContext) -> Result<TransactionId> {
        if !tx.is_active() {
            return Err(GeodeError::IllegalState(format!(
                "transaction {} is not active",
                tx.id()
            )));
        }
        if tx.is_suspended() {
            return Err(GeodeError::IllegalState(format!(
                "transaction {} is already suspended",
                tx.id()
            )));
        }
        let id = tx.id();
        tx.set_suspended(true);
        self.suspended
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, tx);
        self.suspended_changed.notify_waiters();
        tracing::debug!(tx = %id, "transaction suspended");
        Ok(id)
    }

    /// Resumes the suspended transaction `id`.
    pub fn resume(&self, id: TransactionId) -> Result<TransactionContext> {
        self.take_suspended(id).ok_or_else(|| {
            GeodeError::IllegalState(format!("transaction {} is not suspended", id))
        })
    }

    /// Resumes `id`, waiting up to `wait` for it to be suspended.
    ///
    /// Returns `None` if the transaction is not suspended within `wait` or
    /// no longer exists.
    pub async fn try_resume(&self, id: TransactionId, wait: Duration) -> Option<TransactionContext> {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.suspended_changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(tx) = self.take_suspended(id) {
                return Some(tx);
            }
            if !self.exists(id) {
                return None;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.take_suspended(id);
            }
        }
    }

    fn take_suspended(&self, id: TransactionId) -> Option<TransactionContext> {
        let tx = self
            .suspended
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)?;
        tx.set_suspended(false);
        tracing::debug!(tx = %id, "transaction resumed");
        Some(tx)
    }

    /// Returns true if `id` is currently suspended.
    pub fn is_suspended(&self, id: TransactionId) -> bool {
        self.suspended
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&id)
    }

    /// Returns true if `id` names a transaction that is still active.
    pub fn exists(&self, id: TransactionId) -> bool {
        self.known
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .and_then(TransactionContext::upgrade)
            .is_some_and(|tx| tx.is_active())
    }

    /// Returns true if `a` and `b` are handles to the same transaction.
    pub fn same_transaction(a: &TransactionContext, b: &TransactionContext) -> bool {
        a.ptr_eq(b)
    }

    /// Rolls back suspended transactions and rejects new ones.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let suspended: Vec<_> = self
            .suspended
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, tx)| tx)
            .collect();
        self.suspended_changed.notify_waiters();
        for tx in suspended {
            tx.set_suspended(false);
            if let Err(e) = tx.rollback().await {
                tracing::debug!(tx = %tx.id(), error = %e, "rollback on close failed");
            }
        }
        self.known.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}
