//! Backend abstraction: connections, prepared statements and SQL dialects.
//!
//! A session drives a backend exclusively through these traits. Each
//! backend implements them once; the session never issues SQL except
//! through a [`SqlStatement`] obtained from a [`SqlConnection`].

use crate::error::Result;
use crate::types::{DateTimeKind, SqlType};
use crate::value::Value;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// How a backend expresses `limit`/`offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitQuery {
    /// `limit ? offset ?`
    Limit,
    /// `rows ? to ?`
    RowsFromTo,
    /// A `rownum` filter around the query.
    Rownum,
    /// `offset ? rows fetch first ? rows only`
    OffsetFetch,
    /// Limits are not supported; they are silently ignored.
    NotSupported,
}

/// SQL dialect facts a backend reports about itself.
pub trait Dialect: Send + Sync {
    /// Short backend name, used in log output.
    fn name(&self) -> &'static str;

    /// Column type for an auto-incrementing surrogate key.
    fn autoincrement_type(&self) -> &'static str {
        "integer"
    }

    /// Extra text following `primary key` for an auto-incrementing key.
    fn autoincrement_sql(&self) -> &'static str {
        ""
    }

    /// Text appended to an insert statement so it reports the new id.
    fn autoincrement_insert_suffix(&self, _id_column: &str) -> String {
        String::new()
    }

    /// Column type for a date, time or timestamp.
    fn date_time_type(&self, kind: DateTimeKind) -> &'static str {
        match kind {
            DateTimeKind::Date => "date",
            DateTimeKind::Time => "time",
            DateTimeKind::DateTime => "timestamp",
        }
    }

    fn blob_type(&self) -> &'static str {
        "blob"
    }

    fn boolean_type(&self) -> &'static str {
        "boolean"
    }

    /// Column type for text; `size > 0` asks for a bounded column.
    fn text_type(&self, size: i32) -> String {
        if size > 0 {
            format!("varchar({})", size)
        } else {
            "text".to_string()
        }
    }

    fn long_long_type(&self) -> &'static str {
        "bigint"
    }

    fn limit_query_method(&self) -> LimitQuery {
        LimitQuery::Limit
    }

    /// Whether foreign keys may be added after table creation.
    fn support_alter_table(&self) -> bool {
        false
    }

    fn support_deferrable_fk_constraint(&self) -> bool {
        false
    }

    /// Whether a subquery in `from` needs an alias.
    fn require_subquery_alias(&self) -> bool {
        false
    }

    /// Longest identifier (e.g. constraint name) the backend accepts.
    fn max_identifier_length(&self) -> usize {
        63
    }

    /// Full column type name for a mapped field.
    fn type_name(&self, sql_type: SqlType, size: i32) -> String {
        match sql_type {
            SqlType::Boolean => self.boolean_type().to_string(),
            SqlType::SmallInt => "smallint".to_string(),
            SqlType::Integer => "integer".to_string(),
            SqlType::BigInt => self.long_long_type().to_string(),
            SqlType::Real => "real".to_string(),
            SqlType::Double => "double precision".to_string(),
            SqlType::Text => self.text_type(size),
            SqlType::Blob => self.blob_type().to_string(),
            SqlType::Date | SqlType::Time | SqlType::DateTime => {
                let kind = sql_type.date_time_kind().unwrap_or(DateTimeKind::DateTime);
                self.date_time_type(kind).to_string()
            }
        }
    }
}

/// A prepared statement.
///
/// Columns and parameters are 0-based. After [`execute`](Self::execute)
/// the statement is positioned before its first row; each successful
/// [`next_row`](Self::next_row) makes one row available to
/// [`get_result`](Self::get_result).
pub trait SqlStatement: Send {
    /// Reset the statement for re-execution, clearing bindings.
    fn reset(&mut self) -> Result<()>;

    /// Bind a parameter.
    fn bind(&mut self, column: usize, value: &Value) -> Result<()>;

    /// Execute the statement.
    fn execute(&mut self) -> Result<()>;

    /// Advance to the next row; `false` when the result set is exhausted.
    fn next_row(&mut self) -> Result<bool>;

    /// Number of columns in the result set.
    fn column_count(&self) -> usize;

    /// Read a column of the current row; SQL NULL is [`Value::Null`].
    fn get_result(&self, column: usize) -> Result<Value>;

    /// Id generated by the last insert.
    fn inserted_id(&self) -> i64;

    /// Rows changed by the last insert, update or delete.
    fn affected_row_count(&self) -> usize;

    /// The statement text.
    fn sql(&self) -> &str;
}

/// Prepared statements kept per connection, keyed by a caller chosen id.
#[derive(Default)]
pub struct StatementCache {
    statements: HashMap<String, Box<dyn SqlStatement>>,
}

impl StatementCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a cached statement out of the cache.
    ///
    /// The caller owns it until it hands it back with [`put`](Self::put).
    pub fn take(&mut self, id: &str) -> Option<Box<dyn SqlStatement>> {
        self.statements.remove(id)
    }

    /// Return a statement to the cache. An existing entry wins.
    pub fn put(&mut self, id: String, statement: Box<dyn SqlStatement>) {
        self.statements.entry(id).or_insert(statement);
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn clear(&mut self) {
        self.statements.clear();
    }
}

/// A connection to a database.
pub trait SqlConnection: Send {
    /// Prepare a new statement.
    fn prepare_statement(&mut self, sql: &str) -> Result<Box<dyn SqlStatement>>;

    /// Execute a statement that returns no rows.
    fn execute_sql(&mut self, sql: &str) -> Result<()>;

    fn start_transaction(&mut self) -> Result<()>;

    fn commit_transaction(&mut self) -> Result<()>;

    fn rollback_transaction(&mut self) -> Result<()>;

    /// The connection's prepared statement cache.
    fn statement_cache(&mut self) -> &mut StatementCache;

    /// Take a cached statement, if one was saved under `id`.
    fn get_statement(&mut self, id: &str) -> Option<Box<dyn SqlStatement>> {
        self.statement_cache().take(id)
    }

    /// Save a statement for reuse under `id`.
    fn save_statement(&mut self, id: String, statement: Box<dyn SqlStatement>) {
        self.statement_cache().put(id, statement);
    }

    /// Drop all cached statements.
    fn clear_statement_cache(&mut self) {
        self.statement_cache().clear();
    }

    /// Open another connection to the same database.
    fn clone_connection(&self) -> Result<Box<dyn SqlConnection>>;

    /// The dialect spoken by this connection.
    fn dialect(&self) -> Arc<dyn Dialect>;
}

/// A source of connections shared by several sessions.
pub trait SqlConnectionPool: Send + Sync {
    /// Check out a connection, blocking until one is available.
    fn get_connection(&self) -> Result<Box<dyn SqlConnection>>;

    /// Hand a connection back.
    fn return_connection(&self, connection: Box<dyn SqlConnection>);

    /// The dialect spoken by the pooled connections.
    fn dialect(&self) -> Arc<dyn Dialect>;
}

/// A connection checked out of a pool, returned when dropped.
pub struct PooledConnection {
    pool: Arc<dyn SqlConnectionPool>,
    connection: Option<Box<dyn SqlConnection>>,
}

impl PooledConnection {
    /// Check out a connection from `pool`.
    pub fn checkout(pool: Arc<dyn SqlConnectionPool>) -> Result<Self> {
        let connection = pool.get_connection()?;
        tracing::debug!("connection checked out of pool");
        Ok(Self {
            pool,
            connection: Some(connection),
        })
    }
}

impl Deref for PooledConnection {
    type Target = dyn SqlConnection;

    fn deref(&self) -> &Self::Target {
        // Only `None` while dropping.
        match &self.connection {
            Some(conn) => conn.as_ref(),
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.connection {
            Some(conn) => conn.as_mut(),
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.connection.take() {
            tracing::debug!("connection returned to pool");
            self.pool.return_connection(conn);
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("dialect", &self.pool.dialect().name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Standard;

    impl Dialect for Standard {
        fn name(&self) -> &'static str {
            "standard"
        }
    }

    #[test]
    fn default_type_names() {
        let d = Standard;
        assert_eq!(d.type_name(SqlType::Text, 0), "text");
        assert_eq!(d.type_name(SqlType::Text, 30), "varchar(30)");
        assert_eq!(d.type_name(SqlType::BigInt, 0), "bigint");
        assert_eq!(d.type_name(SqlType::DateTime, 0), "timestamp");
        assert_eq!(d.limit_query_method(), LimitQuery::Limit);
    }
}
