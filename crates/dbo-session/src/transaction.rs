//! Nested transactions.
//!
//! A [`Transaction`] is a scope handle. Handles nest: only the outermost one
//! ends the database transaction, which is started lazily by the first
//! statement that needs it. When a nested handle rolls back, the whole
//! transaction is marked rollback-only and the outermost commit fails.

use crate::{Session, SessionImpl, TransactionState};
use dbo_core::error::{TransactionError, TransactionErrorKind};
use dbo_core::{Error, Result, SqlConnection};
use std::fmt;

fn not_active() -> Error {
    Error::Transaction(TransactionError {
        kind: TransactionErrorKind::NotActive,
        message: "no transaction is active".to_string(),
    })
}

fn state_busy() -> Error {
    Error::usage("transaction state is busy")
}

/// A transaction scope. Dropping an active handle rolls it back.
#[must_use = "a transaction rolls back when dropped without commit"]
pub struct Transaction {
    session: Session,
    active: bool,
}

impl Transaction {
    pub(crate) fn new(session: &Session) -> Result<Self> {
        let mut slot = session
            .inner
            .transaction
            .try_borrow_mut()
            .map_err(|_| state_busy())?;
        match slot.as_mut() {
            Some(state) => {
                state.depth += 1;
                tracing::trace!(depth = state.depth, "Nested transaction");
            }
            None => {
                *slot = Some(TransactionState {
                    depth: 1,
                    rollback_only: false,
                    open: false,
                    pooled: None,
                    objects: Vec::new(),
                });
                tracing::debug!("Transaction started");
            }
        }
        drop(slot);
        Ok(Self {
            session: session.clone(),
            active: true,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Commit. For the outermost handle this flushes the session and commits
    /// the database transaction; a nested handle only leaves its scope.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn commit(mut self) -> Result<()> {
        self.active = false;
        let inner = &self.session.inner;
        let rollback_only = {
            let mut slot = inner.transaction.try_borrow_mut().map_err(|_| state_busy())?;
            let state = slot.as_mut().ok_or_else(not_active)?;
            if state.depth > 1 {
                state.depth -= 1;
                return Ok(());
            }
            state.rollback_only
        };

        if rollback_only {
            finish(inner, false)?;
            return Err(Error::Transaction(TransactionError {
                kind: TransactionErrorKind::RollbackOnly,
                message: "a nested transaction rolled back; the transaction was rolled back"
                    .to_string(),
            }));
        }

        if let Err(err) = inner.flush() {
            tracing::warn!(error = %err, "Flush failed on commit, rolling back");
            if let Err(rollback) = finish(inner, false) {
                tracing::warn!(error = %rollback, "Rollback after failed flush failed");
            }
            return Err(err);
        }
        finish(inner, true)
    }

    /// Roll back. A nested handle marks the transaction rollback-only.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn rollback(mut self) -> Result<()> {
        self.active = false;
        rollback(&self.session.inner)
    }
}

fn rollback(inner: &SessionImpl) -> Result<()> {
    {
        let mut slot = inner.transaction.try_borrow_mut().map_err(|_| state_busy())?;
        let state = slot.as_mut().ok_or_else(not_active)?;
        if state.depth > 1 {
            state.depth -= 1;
            state.rollback_only = true;
            tracing::warn!(depth = state.depth, "Nested transaction rolled back");
            return Ok(());
        }
    }
    finish(inner, false)
}

/// End the outermost transaction and notify every object it touched.
fn finish(inner: &SessionImpl, commit: bool) -> Result<()> {
    let Some(mut state) = inner.end_transaction() else {
        return Err(not_active());
    };

    let mut result = Ok(());
    if state.open {
        let end = |conn: &mut dyn SqlConnection| {
            if commit {
                conn.commit_transaction()
            } else {
                conn.rollback_transaction()
            }
        };
        result = match state.pooled.as_mut() {
            Some(conn) => end(&mut **conn),
            None => inner.with_direct_connection(end),
        };
    }

    let success = commit && result.is_ok();
    if commit && !success {
        let undo = |conn: &mut dyn SqlConnection| conn.rollback_transaction();
        let undone = match state.pooled.as_mut() {
            Some(conn) => undo(&mut **conn),
            None => inner.with_direct_connection(undo),
        };
        if let Err(err) = undone {
            tracing::warn!(error = %err, "Rollback after failed commit failed");
        }
    }
    drop(state.pooled.take());

    for obj in state.objects.drain(..) {
        obj.transaction_done(success);
    }
    if success {
        tracing::debug!("Transaction committed");
    } else {
        tracing::debug!("Transaction rolled back");
    }
    result
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Err(err) = rollback(&self.session.inner) {
            tracing::warn!(error = %err, "Rollback of dropped transaction failed");
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}
