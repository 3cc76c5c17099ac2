//! Writing queued changes.
//!
//! Dirty objects are kept in insertion order. Objects that still need an
//! insert go first so that rows other rows refer to exist before they are
//! referenced; saving an object also saves the objects it `belongs_to`.

use crate::{FlushMode, SessionImpl, no_transaction};
use dbo_core::Result;

/// Clears the session's flushing flag when the flush ends, however it ends.
struct FlushGuard<'a> {
    session: &'a SessionImpl,
}

impl<'a> FlushGuard<'a> {
    fn enter(session: &'a SessionImpl) -> Self {
        session.flushing.set(true);
        Self { session }
    }
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.session.flushing.set(false);
    }
}

impl SessionImpl {
    /// Save or delete every queued object.
    ///
    /// Re-entrant calls (a query run while saving) return immediately.
    #[tracing::instrument(level = "debug", skip(self))]
    pub(crate) fn flush(&self) -> Result<()> {
        if self.flushing.get() || self.dirty.borrow().is_empty() {
            return Ok(());
        }
        if self.transaction.borrow().is_none() {
            return Err(no_transaction());
        }

        let _guard = FlushGuard::enter(self);
        let mut written = 0usize;
        loop {
            let next = {
                let dirty = self.dirty.borrow();
                dirty
                    .iter()
                    .find(|obj| obj.needs_insert())
                    .or_else(|| dirty.front())
                    .cloned()
            };
            let Some(obj) = next else {
                break;
            };
            obj.flush()?;
            self.remove_dirty(&obj);
            written += 1;
        }
        tracing::debug!(objects = written, "Flushed session");
        Ok(())
    }

    /// Flush when the session is in [`FlushMode::Auto`].
    pub(crate) fn auto_flush(&self) -> Result<()> {
        if self.flush_mode.get() == FlushMode::Auto {
            self.flush()?;
        }
        Ok(())
    }
}
