//! Prepared statements.

// Allow casts in FFI code where we need to match C types exactly
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

use crate::connection::{SqliteHandle, bind_error, step_error};
use crate::ffi;
use crate::types;
use dbo_core::error::{Error, QueryError, QueryErrorKind, Result};
use dbo_core::{SqlStatement, Value};
use std::ffi::c_int;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepState {
    /// Not executed since the last reset.
    Idle,
    /// `execute()` stepped onto a row that `next_row()` has not handed out yet.
    FirstRow,
    /// A row is current.
    Row,
    /// No more rows.
    Done,
}

/// A prepared SQLite statement.
///
/// `execute()` performs the first step, so statements without a result
/// set complete there and report their insert id and change count.
pub struct SqliteStatement {
    handle: Arc<SqliteHandle>,
    stmt: *mut ffi::sqlite3_stmt,
    sql: String,
    state: StepState,
    inserted_id: i64,
    affected: usize,
}

// SAFETY: the statement is only used through &mut self, and the database
// handle it belongs to is opened in serialized (FULLMUTEX) mode.
unsafe impl Send for SqliteStatement {}

impl SqliteStatement {
    pub(crate) fn new(handle: Arc<SqliteHandle>, stmt: *mut ffi::sqlite3_stmt, sql: &str) -> Self {
        Self {
            handle,
            stmt,
            sql: sql.to_string(),
            state: StepState::Idle,
            inserted_id: -1,
            affected: 0,
        }
    }

    fn step(&mut self) -> Result<c_int> {
        // SAFETY: stmt is a valid prepared statement owned by self
        let rc = unsafe { ffi::sqlite3_step(self.stmt) };
        match rc {
            ffi::SQLITE_ROW | ffi::SQLITE_DONE => Ok(rc),
            _ => Err(step_error(self.handle.db(), &self.sql)),
        }
    }
}

impl SqlStatement for SqliteStatement {
    fn reset(&mut self) -> Result<()> {
        // SAFETY: stmt is valid; the return code of reset repeats the last
        // step error, which has already been reported.
        unsafe {
            ffi::sqlite3_reset(self.stmt);
            ffi::sqlite3_clear_bindings(self.stmt);
        }
        self.state = StepState::Idle;
        Ok(())
    }

    fn bind(&mut self, column: usize, value: &Value) -> Result<()> {
        if self.state != StepState::Idle {
            self.reset()?;
        }
        // SAFETY: stmt is valid, index is 1-based
        let rc = unsafe { types::bind_value(self.stmt, (column + 1) as c_int, value) };
        if rc == ffi::SQLITE_OK {
            Ok(())
        } else {
            Err(bind_error(self.handle.db(), &self.sql, column))
        }
    }

    fn execute(&mut self) -> Result<()> {
        if self.state != StepState::Idle {
            // SAFETY: stmt is valid; keeps bindings in place
            unsafe {
                ffi::sqlite3_reset(self.stmt);
            }
        }
        tracing::trace!(sql = %self.sql, "sqlite execute");
        let rc = self.step()?;
        if rc == ffi::SQLITE_ROW {
            self.state = StepState::FirstRow;
        } else {
            self.state = StepState::Done;
            // SAFETY: db is valid
            unsafe {
                self.affected = ffi::sqlite3_changes(self.handle.db()) as usize;
                self.inserted_id = ffi::sqlite3_last_insert_rowid(self.handle.db());
            }
        }
        Ok(())
    }

    fn next_row(&mut self) -> Result<bool> {
        match self.state {
            StepState::Idle => Err(Error::Query(QueryError {
                kind: QueryErrorKind::Misuse,
                sql: Some(self.sql.clone()),
                code: None,
                message: "next_row() called before execute()".to_string(),
                source: None,
            })),
            StepState::FirstRow => {
                self.state = StepState::Row;
                Ok(true)
            }
            StepState::Row => {
                if self.step()? == ffi::SQLITE_ROW {
                    Ok(true)
                } else {
                    self.state = StepState::Done;
                    Ok(false)
                }
            }
            StepState::Done => Ok(false),
        }
    }

    fn column_count(&self) -> usize {
        // SAFETY: stmt is valid
        unsafe { ffi::sqlite3_column_count(self.stmt) as usize }
    }

    fn get_result(&self, column: usize) -> Result<Value> {
        if self.state != StepState::Row {
            return Err(Error::Query(QueryError {
                kind: QueryErrorKind::Misuse,
                sql: Some(self.sql.clone()),
                code: None,
                message: "no current row".to_string(),
                source: None,
            }));
        }
        if column >= self.column_count() {
            return Err(Error::Query(QueryError {
                kind: QueryErrorKind::Misuse,
                sql: Some(self.sql.clone()),
                code: None,
                message: format!("column {} out of range", column),
                source: None,
            }));
        }
        // SAFETY: stmt is on a row and column is in range
        Ok(unsafe { types::read_column(self.stmt, column as c_int) })
    }

    fn inserted_id(&self) -> i64 {
        self.inserted_id
    }

    fn affected_row_count(&self) -> usize {
        self.affected
    }

    fn sql(&self) -> &str {
        &self.sql
    }
}

impl Drop for SqliteStatement {
    fn drop(&mut self) {
        // SAFETY: stmt is valid and finalized exactly once
        unsafe {
            ffi::sqlite3_finalize(self.stmt);
        }
    }
}
