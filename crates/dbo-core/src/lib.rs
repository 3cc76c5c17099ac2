//! Core types and traits for the dbo object-relational mapper.
//!
//! This crate provides the pieces every other dbo crate builds on:
//!
//! - `Value`, `SqlType` and the `SqlValue` mapping of Rust types to columns
//! - `Error` and its detail structs
//! - `SqlConnection`, `SqlStatement` and `Dialect`, implemented once per backend
//! - `SqlConnectionPool` and the scoped `PooledConnection`
//! - `FieldInfo`/`SetInfo` metadata and foreign key constraint flags

pub mod connection;
pub mod error;
pub mod field;
pub mod identifiers;
pub mod types;
pub mod value;

pub use connection::{
    Dialect, LimitQuery, PooledConnection, SqlConnection, SqlConnectionPool, SqlStatement,
    StatementCache,
};
pub use error::{Error, ObjectNotFoundError, Result, StaleObjectError};
pub use field::{FieldFlags, FieldInfo, ForeignKeyConstraint, RelationType, SetInfo};
pub use identifiers::{bare_table_name, constraint_name, quote_ident, quote_table, shorten_identifier};
pub use types::{DateTimeKind, FromValue, SqlType, SqlValue, TypeInfo};
pub use value::Value;
