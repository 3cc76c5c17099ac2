//! SQLite backend for dbo.
//!
// FFI bindings require unsafe code - this is expected for database drivers
#![allow(unsafe_code)]
//!
//! Implements the `SqlConnection`, `SqlStatement` and `Dialect` traits from
//! dbo-core on top of libsqlite3 (bundled through `libsqlite3-sys`).
//!
//! # Example
//!
//! ```rust,ignore
//! use dbo_sqlite::SqliteConnection;
//!
//! let conn = SqliteConnection::open_memory()?;
//! session.set_connection(Box::new(conn));
//! ```
//!
//! # Type Mapping
//!
//! | Rust Type | SQLite Type |
//! |-----------|-------------|
//! | `bool` | INTEGER (0/1) |
//! | `i16`, `i32`, `i64` | INTEGER |
//! | `f32`, `f64` | REAL |
//! | `String` | TEXT |
//! | `Vec<u8>` | BLOB |
//! | `Option<T>` | NULL or T |
//! | `NaiveDate`, `NaiveDateTime` | TEXT (ISO-8601) |
//! | `NaiveTime` | INTEGER (microseconds) |

pub mod connection;
pub mod dialect;
pub mod ffi;
pub mod statement;
pub mod types;

pub use connection::{OpenFlags, SqliteConfig, SqliteConnection};
pub use dialect::SqliteDialect;
pub use statement::SqliteStatement;

/// The SQLite library version.
pub fn sqlite_version() -> String {
    ffi::version()
}
