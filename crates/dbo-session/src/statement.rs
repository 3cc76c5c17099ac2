//! Statements borrowed from a connection's cache for the length of one use.

use crate::SessionImpl;
use dbo_core::SqlStatement;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::rc::Weak;

/// A prepared statement that goes back to its connection's statement cache
/// when dropped.
///
/// The statement is keyed by its SQL text. When the session has switched
/// connections since the statement was taken (a pooled connection was
/// returned, or a new connection was set), the statement is discarded
/// instead.
pub(crate) struct ScopedStatement {
    session: Weak<SessionImpl>,
    generation: u64,
    statement: Option<Box<dyn SqlStatement>>,
}

impl ScopedStatement {
    pub(crate) fn new(
        session: Weak<SessionImpl>,
        generation: u64,
        statement: Box<dyn SqlStatement>,
    ) -> Self {
        Self {
            session,
            generation,
            statement: Some(statement),
        }
    }
}

impl Deref for ScopedStatement {
    type Target = dyn SqlStatement;

    fn deref(&self) -> &Self::Target {
        match &self.statement {
            Some(statement) => statement.as_ref(),
            None => unreachable!("statement used after release"),
        }
    }
}

impl DerefMut for ScopedStatement {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.statement {
            Some(statement) => statement.as_mut(),
            None => unreachable!("statement used after release"),
        }
    }
}

impl Drop for ScopedStatement {
    fn drop(&mut self) {
        let Some(statement) = self.statement.take() else {
            return;
        };
        if let Some(session) = self.session.upgrade() {
            session.release_statement(self.generation, statement);
        }
    }
}

impl fmt::Debug for ScopedStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedStatement")
            .field("sql", &self.statement.as_ref().map(|s| s.sql()))
            .field("generation", &self.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::*;

    #[test]
    fn statements_return_to_cache() {
        let session = session();
        let tx = session.begin().unwrap();
        let sql = "select count(1) from \"author\"";
        {
            let mut statement = session.inner.statement(sql).unwrap();
            statement.execute().unwrap();
            assert!(statement.next_row().unwrap());
        }
        let cached = session
            .inner
            .with_connection(|conn| Ok(conn.statement_cache().len()))
            .unwrap();
        assert!(cached >= 1);

        let mut again = session.inner.statement(sql).unwrap();
        again.execute().unwrap();
        assert!(again.next_row().unwrap());
        drop(again);
        tx.commit().unwrap();
    }
}
