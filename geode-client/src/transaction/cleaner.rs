use std::sync::Mutex;

use crate::connection::PooledConnection;

use super::context::{Effect, TxState};
use super::TransactionState;

/// Ends a transaction on every exit path of commit or rollback.
///
/// Dropping the cleaner releases the sticky connection, discards pending
/// effects and records the final state. A cleaner dropped before
/// [`TxCleaner::finish`] was called (an error inside the commit exchange,
/// a cancelled future or a panic) marks the transaction failed and closes
/// the connection, since its server side state is unknown.
pub(super) struct TxCleaner<'a> {
    state: &'a mut TxState,
    status: &'a Mutex<TransactionState>,
    outcome: Option<TransactionState>,
}

impl<'a> TxCleaner<'a> {
    pub(super) fn new(state: &'a mut TxState, status: &'a Mutex<TransactionState>) -> Self {
        Self {
            state,
            status,
            outcome: None,
        }
    }

    pub(super) fn connection(&mut self) -> Option<&mut PooledConnection> {
        self.state.connection.as_mut()
    }

    pub(super) fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.state.effects)
    }

    pub(super) fn finish(&mut self, outcome: TransactionState) {
        self.outcome = Some(outcome);
    }
}

impl Drop for TxCleaner<'_> {
    fn drop(&mut self) {
        let outcome = self.outcome.unwrap_or(TransactionState::Failed);
        match (self.state.connection.take(), self.outcome) {
            (Some(conn), None) => conn.discard(),
            (Some(conn), Some(_)) => drop(conn),
            (None, _) => {}
        }
        self.state.effects.clear();
        *self.status.lock().unwrap_or_else(|e| e.into_inner()) = outcome;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    #[test]
    fn test_unfinished_cleaner_marks_failed() {
        let status = Mutex::new(TransactionState::Active);
        let mut state = TxState::default();
        state.effects.push(async {}.boxed());
        {
            let _cleaner = TxCleaner::new(&mut state, &status);
        }
        assert_eq!(*status.lock().unwrap(), TransactionState::Failed);
        assert!(state.effects.is_empty());
    }

    #[test]
    fn test_finish_records_outcome() {
        let status = Mutex::new(TransactionState::Active);
        let mut state = TxState::default();
        {
            let mut cleaner = TxCleaner::new(&mut state, &status);
            assert!(cleaner.connection().is_none());
            cleaner.finish(TransactionState::RolledBack);
        }
        assert_eq!(*status.lock().unwrap(), TransactionState::RolledBack);
    }
}
