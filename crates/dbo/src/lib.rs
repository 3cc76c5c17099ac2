//! dbo - object-relational mapping with an identity map, write-behind
//! flushing and typed queries.
//!
//! Mapped classes describe their columns and relations once, in
//! [`Dbo::persist`]. A [`Session`] keeps one instance per database row,
//! tracks modifications and writes them back when flushed:
//!
//! - Identity map: loading the same id twice yields the same [`Ptr`]
//! - Relations: `belongs_to`, one-to-many and many-to-many [`Collection`]s,
//!   and one-to-one [`WeakPtr`]s
//! - Optimistic locking through a version column
//! - Nested [`Transaction`]s and shared connection pools
//! - Raw SQL [`Query`]s mapped onto objects, scalars and tuples
//!
//! # Quick Start
//!
//! ```ignore
//! use dbo::prelude::*;
//!
//! #[derive(Debug, Default)]
//! struct User {
//!     name: String,
//!     karma: i32,
//!     posts: Collection<Ptr<Post>>,
//! }
//!
//! impl Dbo for User {
//!     type Id = i64;
//!
//!     fn persist<A: Action>(&mut self, a: &mut A) {
//!         field(a, &mut self.name, "name");
//!         field(a, &mut self.karma, "karma");
//!         has_many(a, &mut self.posts, RelationType::ManyToOne, "user");
//!     }
//! }
//!
//! fn main() -> dbo::Result<()> {
//!     let session = Session::new();
//!     session.set_connection(Box::new(SqliteConnection::open_memory()?));
//!     session.map_class::<User>("user")?;
//!     session.map_class::<Post>("post")?;
//!     session.create_tables()?;
//!
//!     let tx = session.begin()?;
//!     let joe = session.add_new(User { name: "Joe".into(), ..User::default() })?;
//!     joe.modify()?.karma = 13;
//!
//!     let popular: Collection<Ptr<User>> = session
//!         .find_where::<User>("karma > ?")
//!         .bind(10)
//!         .result_list()?;
//!     tx.commit()
//! }
//! ```

pub use dbo_core::error::{
    ConnectionError, ConnectionErrorKind, PoolError, PoolErrorKind, QueryError, QueryErrorKind,
    SchemaError, SchemaErrorKind, TransactionError, TransactionErrorKind, TypeError,
};
pub use dbo_core::{
    Dialect, Error, FieldFlags, FieldInfo, ForeignKeyConstraint, FromValue, LimitQuery,
    ObjectNotFoundError, PooledConnection, RelationType, Result, SqlConnection,
    SqlConnectionPool, SqlStatement, SqlType, SqlValue, StaleObjectError, TypeInfo, Value,
};

pub use dbo_session::{
    Action, Call, Collection, CollectionIter, Dbo, DboId, DirectBinding, DynamicBinding, Field,
    FlushMode, ItemFlags, ObjectState, Ptr, Query, QueryModel, QueryResult, Session,
    SessionConfig, SortOrder, Transaction, WeakPtr, belongs_to, belongs_to_with, field,
    field_sized, has_many, has_many_with, has_one, id, id_sized, json_serialize,
    json_serialize_collection, json_serialize_value, json_serialize_vec,
};

pub use dbo_pool::{FixedConnectionPool, PoolConfig, PoolStats};
pub use dbo_sqlite::{OpenFlags, SqliteConfig, SqliteConnection, SqliteDialect};

pub use chrono;
pub use serde_json;

/// Everything a mapped class and its callers usually need.
pub mod prelude {
    pub use crate::{
        Action, Collection, Dbo, Error, Field, FixedConnectionPool, FlushMode,
        ForeignKeyConstraint, ObjectState, PoolConfig, Ptr, Query, QueryModel, RelationType,
        Result, Session, SessionConfig, SortOrder, SqliteConnection, Transaction, Value, WeakPtr,
        belongs_to, belongs_to_with, field, field_sized, has_many, has_many_with, has_one, id,
        id_sized,
    };
}
