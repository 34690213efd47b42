use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use futures::future::BoxFuture;
use geode_core::protocol::constants::{COMMIT, ROLLBACK, TX_FAILOVER};
use geode_core::protocol::Message;
use geode_core::{GeodeError, Result};

use crate::connection::PooledConnection;
use crate::pool::Pool;

use super::cleaner::TxCleaner;
use super::{TransactionId, TransactionState};

/// A local change applied once the transaction commits.
pub(crate) type Effect = BoxFuture<'static, ()>;

#[derive(Default)]
pub(super) struct TxState {
    pub(super) pool: Option<Pool>,
    pub(super) connection: Option<PooledConnection>,
    pub(super) effects: Vec<Effect>,
}

pub(super) struct TxInner {
    id: TransactionId,
    status: Mutex<TransactionState>,
    suspended: AtomicBool,
    state: tokio::sync::Mutex<TxState>,
}

impl Drop for TxInner {
    fn drop(&mut self) {
        let status = *self.status.get_mut().unwrap_or_else(|e| e.into_inner());
        if status == TransactionState::Active {
            if let Some(conn) = self.state.get_mut().connection.take() {
                tracing::debug!(tx = %self.id, "active transaction dropped, discarding its connection");
                conn.discard();
            }
        }
    }
}

/// Handle to one transaction.
///
/// Clones share the transaction. Operations of the transaction are
/// serialized: each one holds the transaction for the duration of its
/// server exchange.
#[derive(Clone)]
pub struct TransactionContext {
    inner: Arc<TxInner>,
}

impl fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionContext")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("suspended", &self.is_suspended())
            .finish()
    }
}

impl TransactionContext {
    pub(super) fn new(id: TransactionId) -> Self {
        Self {
            inner: Arc::new(TxInner {
                id,
                status: Mutex::new(TransactionState::Active),
                suspended: AtomicBool::new(false),
                state: tokio::sync::Mutex::new(TxState::default()),
            }),
        }
    }

    /// Returns the transaction id.
    pub fn id(&self) -> TransactionId {
        self.inner.id
    }

    /// Returns the current state.
    pub fn state(&self) -> TransactionState {
        *self.inner.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns true while the transaction accepts operations.
    pub fn is_active(&self) -> bool {
        self.state() == TransactionState::Active
    }

    /// Returns true while the transaction is suspended.
    pub fn is_suspended(&self) -> bool {
        self.inner.suspended.load(Ordering::Acquire)
    }

    pub(super) fn set_suspended(&self, suspended: bool) {
        self.inner.suspended.store(suspended, Ordering::Release);
    }

    /// Returns the name of the pool the transaction is bound to, once the
    /// first operation ran.
    pub async fn pool_name(&self) -> Option<String> {
        let state = self.inner.state.lock().await;
        state.pool.as_ref().map(|p| p.name().to_string())
    }

    pub(super) fn downgrade(&self) -> Weak<TxInner> {
        Arc::downgrade(&self.inner)
    }

    pub(super) fn upgrade(weak: &Weak<TxInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub(super) fn ptr_eq(&self, other: &TransactionContext) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.is_suspended() {
            return Err(GeodeError::IllegalState(format!(
                "transaction {} is suspended",
                self.inner.id
            )));
        }
        match self.state() {
            TransactionState::Active => Ok(()),
            state => Err(GeodeError::IllegalState(format!(
                "transaction {} is {:?}",
                self.inner.id, state
            ))),
        }
    }

    /// Sends `request` as part of the transaction on `pool`.
    ///
    /// The first call binds the transaction to `pool` and checks out the
    /// sticky connection. If that connection is lost, the transaction fails
    /// over to another server and the request is sent once more. Any other
    /// error that leaves the connection unusable, such as a read timeout,
    /// discards it and fails the transaction.
    pub(crate) async fn execute(&self, pool: &Pool, request: Message) -> Result<Message> {
        let mut state = self.inner.state.lock().await;
        self.ensure_usable()?;
        match &state.pool {
            Some(bound) if !bound.ptr_eq(pool) => {
                return Err(GeodeError::IllegalState(format!(
                    "transaction {} is bound to pool {}, not {}",
                    self.inner.id,
                    bound.name(),
                    pool.name()
                )));
            }
            Some(_) => {}
            None => state.pool = Some(pool.clone()),
        }

        let request = request.with_transaction_id(self.inner.id.value());
        let read_timeout = pool.config().read_timeout();
        if state.connection.is_none() {
            state.connection = Some(pool.acquire(&HashSet::new()).await?);
        }
        let Some(conn) = state.connection.as_mut() else {
            return Err(GeodeError::NotConnected("no transaction connection".to_string()));
        };

        let e = match conn.send(&request, read_timeout).await {
            Ok(reply) => return reply.into_result(),
            Err(e) if !e.is_fatal_for_connection() && !conn.is_broken() => return Err(e),
            Err(e) => e,
        };
        let dead = conn.endpoint().clone();
        if let Some(conn) = state.connection.take() {
            conn.discard();
        }
        if !e.is_transient() {
            tracing::warn!(tx = %self.inner.id, server = %dead, error = %e, "transaction connection unusable");
            self.fail(&mut state);
            return Err(e);
        }

        tracing::warn!(tx = %self.inner.id, server = %dead, error = %e, "transaction connection lost, failing over");
        let mut conn = match self.fail_over(pool, dead, read_timeout).await {
            Ok(conn) => conn,
            Err(e) => {
                self.fail(&mut state);
                return Err(e);
            }
        };
        match conn.send(&request, read_timeout).await {
            Ok(reply) => {
                state.connection = Some(conn);
                reply.into_result()
            }
            Err(e) => {
                conn.discard();
                self.fail(&mut state);
                Err(e)
            }
        }
    }

    fn fail(&self, state: &mut TxState) {
        *self.inner.status.lock().unwrap_or_else(|e| e.into_inner()) = TransactionState::Failed;
        state.effects.clear();
    }

    async fn fail_over(
        &self,
        pool: &Pool,
        dead: geode_core::ServerLocation,
        read_timeout: Duration,
    ) -> Result<PooledConnection> {
        let mut excluded = HashSet::new();
        excluded.insert(dead);
        let mut conn = pool.acquire(&excluded).await?;
        let request = Message::new(TX_FAILOVER).with_transaction_id(self.inner.id.value());
        conn.send(&request, read_timeout).await?.into_result()?;
        tracing::debug!(tx = %self.inner.id, server = %conn.endpoint(), "transaction failed over");
        Ok(conn)
    }

    /// Queues a local change to apply after a successful commit.
    pub(crate) async fn defer(&self, effect: Effect) {
        self.inner.state.lock().await.effects.push(effect);
    }

    /// Commits the transaction.
    ///
    /// A transaction that never ran an operation commits trivially. The
    /// commit is never retried; a rejected commit leaves the transaction
    /// failed.
    pub async fn commit(&self) -> Result<()> {
        let effects = {
            let mut state = self.inner.state.lock().await;
            self.ensure_usable()?;
            let read_timeout = state
                .pool
                .as_ref()
                .map(|p| p.config().read_timeout())
                .unwrap_or_default();
            let mut cleaner = TxCleaner::new(&mut state, &self.inner.status);
            let request = Message::new(COMMIT).with_transaction_id(self.inner.id.value());
            let outcome = match cleaner.connection() {
                Some(conn) => Some(
                    conn.send(&request, read_timeout)
                        .await
                        .and_then(Message::into_result),
                ),
                None => None,
            };
            match outcome {
                None | Some(Ok(_)) => {
                    let effects = cleaner.take_effects();
                    cleaner.finish(TransactionState::Committed);
                    effects
                }
                Some(Err(e)) => {
                    tracing::debug!(tx = %self.inner.id, error = %e, "commit failed");
                    if !e.is_fatal_for_connection() {
                        cleaner.finish(TransactionState::Failed);
                    }
                    return Err(e);
                }
            }
        };
        tracing::debug!(tx = %self.inner.id, effects = effects.len(), "transaction committed");
        for effect in effects {
            effect.await;
        }
        Ok(())
    }

    /// Rolls the transaction back.
    pub async fn rollback(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        self.ensure_usable()?;
        let read_timeout = state
            .pool
            .as_ref()
            .map(|p| p.config().read_timeout())
            .unwrap_or_default();
        let mut cleaner = TxCleaner::new(&mut state, &self.inner.status);
        let request = Message::new(ROLLBACK).with_transaction_id(self.inner.id.value());
        let outcome = match cleaner.connection() {
            Some(conn) => conn
                .send(&request, read_timeout)
                .await
                .and_then(Message::into_result)
                .map(|_| ()),
            None => Ok(()),
        };
        if outcome.as_ref().map_or_else(|e| !e.is_fatal_for_connection(), |_| true) {
            cleaner.finish(TransactionState::RolledBack);
        }
        outcome
    }
}
