//! SQLite connection implementation.
//!
//! This module wraps the SQLite C API and implements the `SqlConnection`
//! trait from dbo-core.

// Allow casts in FFI code where we need to match C types exactly
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::result_large_err)] // Error type is defined in dbo-core
#![allow(clippy::borrow_as_ptr)] // FFI requires raw pointers
#![allow(clippy::if_not_else)] // Clearer for error handling

use crate::dialect::SqliteDialect;
use crate::ffi;
use crate::statement::SqliteStatement;
use dbo_core::error::{
    ConnectionError, ConnectionErrorKind, Error, QueryError, QueryErrorKind, Result,
};
use dbo_core::{Dialect, SqlConnection, SqlStatement, StatementCache};
use serde::{Deserialize, Serialize};
use std::ffi::{CStr, CString, c_int};
use std::ptr;
use std::sync::Arc;

/// Configuration for opening SQLite connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteConfig {
    /// Path to the database file, or ":memory:" for an in-memory database.
    pub path: String,
    /// Open flags (read-only, read-write, create, etc.)
    pub flags: OpenFlags,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u32,
    /// Enforce foreign key constraints (`pragma foreign_keys = on`).
    pub foreign_keys: bool,
}

/// Flags controlling how the database is opened.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct OpenFlags {
    /// Open for reading only.
    pub read_only: bool,
    /// Open for reading and writing.
    pub read_write: bool,
    /// Create the database if it doesn't exist.
    pub create: bool,
    /// Enable URI filename interpretation.
    pub uri: bool,
    /// Enable shared cache mode.
    pub shared_cache: bool,
}

impl OpenFlags {
    /// Create flags for read-only access.
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Default::default()
        }
    }

    /// Create flags for read-write access (database must exist).
    pub fn read_write() -> Self {
        Self {
            read_write: true,
            ..Default::default()
        }
    }

    /// Create flags for read-write access with creation if needed.
    pub fn create_read_write() -> Self {
        Self {
            read_write: true,
            create: true,
            ..Default::default()
        }
    }

    fn to_sqlite_flags(self) -> c_int {
        // Serialized mode: statements and the connection may move between threads.
        let mut flags = ffi::SQLITE_OPEN_FULLMUTEX;

        if self.read_only {
            flags |= ffi::SQLITE_OPEN_READONLY;
        }
        if self.read_write {
            flags |= ffi::SQLITE_OPEN_READWRITE;
        }
        if self.create {
            flags |= ffi::SQLITE_OPEN_CREATE;
        }
        if self.uri {
            flags |= ffi::SQLITE_OPEN_URI;
        }
        if self.shared_cache {
            flags |= ffi::SQLITE_OPEN_SHAREDCACHE;
        }

        // Default to read-write if no mode specified
        if flags & (ffi::SQLITE_OPEN_READONLY | ffi::SQLITE_OPEN_READWRITE) == 0 {
            flags |= ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE;
        }

        flags
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: ":memory:".to_string(),
            flags: OpenFlags::create_read_write(),
            busy_timeout_ms: 5000,
            foreign_keys: true,
        }
    }
}

impl SqliteConfig {
    /// Create a new config for a file-based database.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Create a new config for an in-memory database.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Set open flags.
    #[must_use]
    pub fn flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set busy timeout.
    #[must_use]
    pub fn busy_timeout(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }

    /// Enable or disable foreign key enforcement.
    #[must_use]
    pub fn foreign_keys(mut self, enabled: bool) -> Self {
        self.foreign_keys = enabled;
        self
    }
}

/// An open database handle, shared by the connection and its statements.
pub(crate) struct SqliteHandle {
    db: *mut ffi::sqlite3,
}

// SAFETY: the handle is opened with SQLITE_OPEN_FULLMUTEX, so SQLite
// serializes all access to it internally.
unsafe impl Send for SqliteHandle {}
// SAFETY: see above
unsafe impl Sync for SqliteHandle {}

impl SqliteHandle {
    pub(crate) fn db(&self) -> *mut ffi::sqlite3 {
        self.db
    }
}

impl Drop for SqliteHandle {
    fn drop(&mut self) {
        if !self.db.is_null() {
            // SAFETY: db is valid; close_v2 defers the close until every
            // statement prepared on it has been finalized.
            unsafe {
                ffi::sqlite3_close_v2(self.db);
            }
        }
    }
}

/// A connection to a SQLite database.
pub struct SqliteConnection {
    handle: Arc<SqliteHandle>,
    config: SqliteConfig,
    statements: StatementCache,
    dialect: Arc<SqliteDialect>,
}

impl SqliteConnection {
    /// Open a new SQLite connection with the given configuration.
    pub fn open(config: &SqliteConfig) -> Result<Self> {
        let c_path = CString::new(config.path.as_str()).map_err(|_| {
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect,
                message: "Invalid path: contains null byte".to_string(),
                source: None,
            })
        })?;

        let mut db: *mut ffi::sqlite3 = ptr::null_mut();
        let flags = config.flags.to_sqlite_flags();

        // SAFETY: We pass valid pointers and check the return value
        let rc = unsafe { ffi::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags, ptr::null()) };

        if rc != ffi::SQLITE_OK {
            let msg = if !db.is_null() {
                // SAFETY: db is valid, errmsg returns a valid C string
                unsafe {
                    let msg = CStr::from_ptr(ffi::sqlite3_errmsg(db))
                        .to_string_lossy()
                        .into_owned();
                    ffi::sqlite3_close(db);
                    msg
                }
            } else {
                ffi::error_string(rc)
            };

            return Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect,
                message: format!("Failed to open database: {}", msg),
                source: None,
            }));
        }

        if config.busy_timeout_ms > 0 {
            // SAFETY: db is valid
            unsafe {
                ffi::sqlite3_busy_timeout(db, config.busy_timeout_ms as c_int);
            }
        }

        let conn = Self {
            handle: Arc::new(SqliteHandle { db }),
            config: config.clone(),
            statements: StatementCache::new(),
            dialect: Arc::new(SqliteDialect),
        };

        if config.foreign_keys {
            conn.execute_raw("pragma foreign_keys = ON")?;
        }

        tracing::debug!(path = %config.path, "sqlite connection opened");
        Ok(conn)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self> {
        Self::open(&SqliteConfig::memory())
    }

    /// Open a file-based database.
    pub fn open_file(path: impl Into<String>) -> Result<Self> {
        Self::open(&SqliteConfig::file(path))
    }

    /// Get the database path.
    pub fn path(&self) -> &str {
        &self.config.path
    }

    /// Execute SQL directly without preparing (for DDL, pragmas, etc.)
    pub fn execute_raw(&self, sql: &str) -> Result<()> {
        let c_sql = CString::new(sql).map_err(|_| null_byte_error(sql))?;

        let mut errmsg: *mut std::ffi::c_char = ptr::null_mut();

        tracing::trace!(sql = %sql, "sqlite exec");
        // SAFETY: All pointers are valid
        let rc = unsafe {
            ffi::sqlite3_exec(
                self.handle.db(),
                c_sql.as_ptr(),
                None,
                ptr::null_mut(),
                &mut errmsg,
            )
        };

        if rc != ffi::SQLITE_OK {
            let msg = if !errmsg.is_null() {
                // SAFETY: errmsg is a valid C string allocated by SQLite
                let msg = unsafe { CStr::from_ptr(errmsg).to_string_lossy().into_owned() };
                // SAFETY: errmsg was allocated by sqlite3_malloc
                unsafe { ffi::sqlite3_free(errmsg.cast()) };
                msg
            } else {
                ffi::error_string(rc)
            };

            return Err(Error::Query(QueryError {
                kind: error_code_to_kind(rc),
                sql: Some(sql.to_string()),
                code: Some(rc),
                message: msg,
                source: None,
            }));
        }

        Ok(())
    }

    /// Get the last insert rowid.
    pub fn last_insert_rowid(&self) -> i64 {
        // SAFETY: db is valid
        unsafe { ffi::sqlite3_last_insert_rowid(self.handle.db()) }
    }

    /// Get the number of rows changed by the last statement.
    pub fn changes(&self) -> i32 {
        // SAFETY: db is valid
        unsafe { ffi::sqlite3_changes(self.handle.db()) }
    }

    /// Prepare a statement without going through the cache.
    pub fn prepare(&self, sql: &str) -> Result<SqliteStatement> {
        let stmt = prepare_stmt(self.handle.db(), sql)?;
        Ok(SqliteStatement::new(Arc::clone(&self.handle), stmt, sql))
    }
}

impl SqlConnection for SqliteConnection {
    fn prepare_statement(&mut self, sql: &str) -> Result<Box<dyn SqlStatement>> {
        tracing::trace!(sql = %sql, "sqlite prepare");
        Ok(Box::new(self.prepare(sql)?))
    }

    fn execute_sql(&mut self, sql: &str) -> Result<()> {
        self.execute_raw(sql)
    }

    fn start_transaction(&mut self) -> Result<()> {
        self.execute_raw("begin transaction")
    }

    fn commit_transaction(&mut self) -> Result<()> {
        self.execute_raw("commit transaction")
    }

    fn rollback_transaction(&mut self) -> Result<()> {
        self.execute_raw("rollback transaction")
    }

    fn statement_cache(&mut self) -> &mut StatementCache {
        &mut self.statements
    }

    /// Opens the same path again; for ":memory:" this is a fresh, empty database.
    fn clone_connection(&self) -> Result<Box<dyn SqlConnection>> {
        Ok(Box::new(Self::open(&self.config)?))
    }

    fn dialect(&self) -> Arc<dyn Dialect> {
        self.dialect.clone()
    }
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("path", &self.config.path)
            .field("cached_statements", &self.statements.len())
            .finish_non_exhaustive()
    }
}

// Helper functions

fn null_byte_error(sql: &str) -> Error {
    Error::Query(QueryError {
        kind: QueryErrorKind::Syntax,
        sql: Some(sql.to_string()),
        code: None,
        message: "SQL contains null byte".to_string(),
        source: None,
    })
}

fn prepare_stmt(db: *mut ffi::sqlite3, sql: &str) -> Result<*mut ffi::sqlite3_stmt> {
    let c_sql = CString::new(sql).map_err(|_| null_byte_error(sql))?;

    let mut stmt: *mut ffi::sqlite3_stmt = ptr::null_mut();

    // SAFETY: All pointers are valid
    let rc = unsafe {
        ffi::sqlite3_prepare_v2(
            db,
            c_sql.as_ptr(),
            c_sql.as_bytes().len() as c_int,
            &mut stmt,
            ptr::null_mut(),
        )
    };

    if rc != ffi::SQLITE_OK {
        return Err(db_error(db, sql, None));
    }

    Ok(stmt)
}

fn db_error(db: *mut ffi::sqlite3, sql: &str, context: Option<String>) -> Error {
    // SAFETY: db is valid
    let (msg, code) = unsafe {
        let ptr = ffi::sqlite3_errmsg(db);
        (
            CStr::from_ptr(ptr).to_string_lossy().into_owned(),
            ffi::sqlite3_errcode(db),
        )
    };

    Error::Query(QueryError {
        kind: error_code_to_kind(code),
        sql: Some(sql.to_string()),
        code: Some(code),
        message: match context {
            Some(context) => format!("{}: {}", context, msg),
            None => msg,
        },
        source: None,
    })
}

pub(crate) fn bind_error(db: *mut ffi::sqlite3, sql: &str, param_index: usize) -> Error {
    match db_error(db, sql, Some(format!("Failed to bind parameter {}", param_index))) {
        Error::Query(mut q) => {
            q.kind = QueryErrorKind::Bind;
            Error::Query(q)
        }
        other => other,
    }
}

pub(crate) fn step_error(db: *mut ffi::sqlite3, sql: &str) -> Error {
    db_error(db, sql, None)
}

fn error_code_to_kind(code: c_int) -> QueryErrorKind {
    match code & 0xff {
        ffi::SQLITE_CONSTRAINT => QueryErrorKind::Constraint,
        ffi::SQLITE_BUSY | ffi::SQLITE_LOCKED => QueryErrorKind::Busy,
        ffi::SQLITE_PERM | ffi::SQLITE_AUTH => QueryErrorKind::Permission,
        ffi::SQLITE_NOTFOUND => QueryErrorKind::NotFound,
        ffi::SQLITE_TOOBIG => QueryErrorKind::DataTruncation,
        ffi::SQLITE_MISUSE | ffi::SQLITE_RANGE => QueryErrorKind::Misuse,
        _ => QueryErrorKind::Database,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbo_core::Value;

    #[test]
    fn test_open_memory_and_exec() {
        let conn = SqliteConnection::open_memory().unwrap();
        conn.execute_raw("create table t (id integer primary key, name text)")
            .unwrap();
        conn.execute_raw("insert into t (name) values ('a')").unwrap();
        assert_eq!(conn.last_insert_rowid(), 1);
        assert_eq!(conn.changes(), 1);
    }

    #[test]
    fn test_statement_protocol() {
        let mut conn = SqliteConnection::open_memory().unwrap();
        conn.execute_sql("create table t (id integer primary key autoincrement, name text, ts text)")
            .unwrap();

        let mut insert = conn
            .prepare_statement("insert into t (name, ts) values (?, ?)")
            .unwrap();
        insert.bind(0, &Value::Text("alpha".into())).unwrap();
        insert.bind(1, &Value::Null).unwrap();
        insert.execute().unwrap();
        assert_eq!(insert.inserted_id(), 1);
        assert_eq!(insert.affected_row_count(), 1);

        insert.reset().unwrap();
        insert.bind(0, &Value::Text("beta".into())).unwrap();
        insert.bind(1, &Value::Null).unwrap();
        insert.execute().unwrap();
        assert_eq!(insert.inserted_id(), 2);

        let mut select = conn
            .prepare_statement("select id, name, ts from t order by id")
            .unwrap();
        select.execute().unwrap();
        assert!(select.next_row().unwrap());
        assert_eq!(select.get_result(0).unwrap(), Value::BigInt(1));
        assert_eq!(select.get_result(1).unwrap(), Value::Text("alpha".into()));
        assert_eq!(select.get_result(2).unwrap(), Value::Null);
        assert!(select.next_row().unwrap());
        assert_eq!(select.get_result(1).unwrap(), Value::Text("beta".into()));
        assert!(!select.next_row().unwrap());
        assert!(!select.next_row().unwrap());
    }

    #[test]
    fn test_prepare_error_carries_sql() {
        let mut conn = SqliteConnection::open_memory().unwrap();
        let err = conn.prepare_statement("select * from missing").err().unwrap();
        assert_eq!(err.sql(), Some("select * from missing"));
    }

    #[test]
    fn test_foreign_keys_enforced() {
        let conn = SqliteConnection::open_memory().unwrap();
        conn.execute_raw("create table p (id integer primary key)").unwrap();
        conn.execute_raw("create table c (id integer primary key, p_id integer references p (id))")
            .unwrap();
        let err = conn
            .execute_raw("insert into c (p_id) values (42)")
            .unwrap_err();
        match err {
            Error::Query(q) => assert_eq!(q.kind, QueryErrorKind::Constraint),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_clone_opens_same_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clone.db").to_string_lossy().into_owned();
        let conn = SqliteConnection::open(&SqliteConfig::file(path.clone()).busy_timeout(500)).unwrap();
        conn.execute_raw("create table t (id integer primary key)").unwrap();
        conn.execute_raw("insert into t (id) values (7)").unwrap();

        let mut other = conn.clone_connection().unwrap();
        let mut select = other.prepare_statement("select id from t").unwrap();
        select.execute().unwrap();
        assert!(select.next_row().unwrap());
        assert_eq!(select.get_result(0).unwrap(), Value::BigInt(7));
        assert_eq!(conn.path(), path);
    }

    #[test]
    fn test_statement_cache_round_trip() {
        let mut conn = SqliteConnection::open_memory().unwrap();
        let stmt = conn.prepare_statement("select 1").unwrap();
        conn.save_statement("one".to_string(), stmt);
        assert!(conn.get_statement("one").is_some());
        assert!(conn.get_statement("one").is_none());
    }
}
