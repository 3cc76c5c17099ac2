//! Error types for dbo operations.

use std::fmt;

/// The primary error type for all dbo operations.
#[derive(Debug)]
pub enum Error {
    /// Connection-related errors (open, disconnect)
    Connection(ConnectionError),
    /// Statement preparation or execution errors
    Query(QueryError),
    /// Value conversion errors
    Type(TypeError),
    /// Transaction errors
    Transaction(TransactionError),
    /// Pool errors
    Pool(PoolError),
    /// Table creation or drop errors
    Schema(SchemaError),
    /// `load()` found no row for the requested id
    ObjectNotFound(ObjectNotFoundError),
    /// Optimistic concurrency check failed on update or delete
    StaleObject(StaleObjectError),
    /// A query expected to return at most one row returned several
    NoUniqueResult {
        /// The statement that produced the rows
        sql: String,
    },
    /// The API was used in a way it does not support
    Usage(String),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to open the database
    Connect,
    /// Connection lost during operation
    Disconnected,
    /// No connection or pool configured for the session
    NotConfigured,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    /// Backend-specific error code, if the backend reports one.
    pub code: Option<i32>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, foreign key, not null)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Permission denied
    Permission,
    /// Data too large for column
    DataTruncation,
    /// Database busy or locked
    Busy,
    /// Parameter binding failed
    Bind,
    /// Statement used out of order (e.g. next_row before execute)
    Misuse,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
    pub rust_type: Option<&'static str>,
}

#[derive(Debug)]
pub struct TransactionError {
    pub kind: TransactionErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionErrorKind {
    /// Already committed
    AlreadyCommitted,
    /// Already rolled back
    AlreadyRolledBack,
    /// A nested transaction rolled back, so the outermost one cannot commit
    RollbackOnly,
    /// No transaction is active
    NotActive,
}

#[derive(Debug)]
pub struct PoolError {
    pub kind: PoolErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolErrorKind {
    /// Connection checkout timed out
    Timeout,
    /// Pool is closed
    Closed,
    /// Configuration error
    Config,
}

#[derive(Debug)]
pub struct SchemaError {
    pub kind: SchemaErrorKind,
    /// The statement that failed, if any.
    pub sql: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaErrorKind {
    /// Table creation failed
    Create,
    /// Table drop failed
    Drop,
    /// Invalid mapping definition
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectNotFoundError {
    pub table: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleObjectError {
    pub table: String,
    pub id: String,
    pub version: i32,
}

impl Error {
    /// Build a usage error.
    pub fn usage(message: impl Into<String>) -> Self {
        Error::Usage(message.into())
    }

    /// Get the SQL that caused this error, if available.
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            Error::Schema(s) => s.sql.as_deref(),
            Error::NoUniqueResult { sql } => Some(sql),
            _ => None,
        }
    }

    /// Is this a stale object (version mismatch) error?
    pub fn is_stale(&self) -> bool {
        matches!(self, Error::StaleObject(_))
    }

    /// Is this an object-not-found error?
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::ObjectNotFound(_))
    }

    /// Is this a retryable error (busy database, pool timeout, stale object)?
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Query(q) => q.kind == QueryErrorKind::Busy,
            Error::Pool(p) => p.kind == PoolErrorKind::Timeout,
            Error::StaleObject(_) => true,
            _ => false,
        }
    }
}

impl QueryError {
    /// Is this a constraint violation (foreign key, unique, not null)?
    pub fn is_constraint_violation(&self) -> bool {
        self.kind == QueryErrorKind::Constraint
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => match &e.sql {
                Some(sql) => write!(f, "Query error: {} (in \"{}\")", e.message, sql),
                None => write!(f, "Query error: {}", e.message),
            },
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Transaction(e) => write!(f, "Transaction error: {}", e.message),
            Error::Pool(e) => write!(f, "Pool error: {}", e.message),
            Error::Schema(e) => match &e.sql {
                Some(sql) => write!(f, "Schema error: {} (in \"{}\")", e.message, sql),
                None => write!(f, "Schema error: {}", e.message),
            },
            Error::ObjectNotFound(e) => write!(f, "{}", e),
            Error::StaleObject(e) => write!(f, "{}", e),
            Error::NoUniqueResult { sql } => {
                write!(f, "Query returned more than one result: {}", sql)
            }
            Error::Usage(msg) => write!(f, "Usage error: {}", msg),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Pool(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Schema(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (code {})", self.message, code),
            None => write!(f, "{}", self.message),
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ObjectNotFoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Object not found in table \"{}\": id = {}", self.table, self.id)
    }
}

impl fmt::Display for StaleObjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Stale object in table \"{}\": id = {}, version = {}",
            self.table, self.id, self.version
        )
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<PoolError> for Error {
    fn from(err: PoolError) -> Self {
        Error::Pool(err)
    }
}

impl From<SchemaError> for Error {
    fn from(err: SchemaError) -> Self {
        Error::Schema(err)
    }
}

/// Result type alias for dbo operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sql_is_reported_for_query_and_schema_errors() {
        let err = Error::Query(QueryError {
            kind: QueryErrorKind::Syntax,
            sql: Some("selec 1".to_string()),
            code: Some(1),
            message: "near \"selec\": syntax error".to_string(),
            source: None,
        });
        assert_eq!(err.sql(), Some("selec 1"));
        assert!(err.to_string().contains("selec 1"));

        let err = Error::Schema(SchemaError {
            kind: SchemaErrorKind::Create,
            sql: Some("create table \"a\" ()".to_string()),
            message: "table exists".to_string(),
            source: None,
        });
        assert_eq!(err.sql(), Some("create table \"a\" ()"));
        assert_eq!(Error::usage("x").sql(), None);
    }

    #[test]
    fn stale_and_not_found_display() {
        let stale = Error::StaleObject(StaleObjectError {
            table: "post".to_string(),
            id: "7".to_string(),
            version: 3,
        });
        assert!(stale.is_stale());
        assert!(stale.is_retryable());
        assert_eq!(
            stale.to_string(),
            "Stale object in table \"post\": id = 7, version = 3"
        );

        let missing = Error::ObjectNotFound(ObjectNotFoundError {
            table: "post".to_string(),
            id: "8".to_string(),
        });
        assert!(missing.is_not_found());
        assert!(!missing.is_retryable());
    }
}
