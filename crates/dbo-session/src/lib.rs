//! Session, identity map and unit of work for the dbo object-relational mapper.
//!
//! `dbo-session` is the layer between mapped classes and a `SqlConnection`.
//! It keeps one in-memory instance per database row, tracks changes to those
//! instances, and writes them back in dependency order when the session is
//! flushed.
//!
//! # Role In The Architecture
//!
//! - **Mapping**: a class implements [`Dbo`] and describes its columns and
//!   relations through the [`Action`] visitor in [`persist`].
//! - **Identity map**: loading the same id twice yields the same [`Ptr`].
//! - **Write-behind**: modified objects are queued and saved on flush, which
//!   happens before queries (in [`FlushMode::Auto`]) and on commit.
//! - **Transactions**: [`Transaction`] handles nest; the outermost one owns
//!   the database transaction and, with a pool, the connection.
//!
//! # Example
//!
//! ```ignore
//! let session = Session::new();
//! session.set_connection(Box::new(SqliteConnection::open_memory()?));
//! session.map_class::<User>("user")?;
//! session.create_tables()?;
//!
//! let tx = session.begin()?;
//! let user = session.add(Ptr::new(User { name: "Joe".into(), ..User::default() }))?;
//! user.modify()?.karma = 13;
//! tx.commit()?;
//! ```
//!
//! A `Session` and everything it hands out are single-threaded. Use one
//! session per thread and share a [`SqlConnectionPool`] between them.

pub mod collection;
pub mod db_action;
pub mod ddl;
pub mod flush;
pub mod identity_map;
pub mod json;
pub mod mapping;
pub mod persist;
pub mod ptr;
pub mod query;
pub mod query_model;
pub mod query_result;
pub mod sql_parse;
pub mod statement;
pub mod transaction;

pub use collection::{Collection, CollectionIter};
pub use json::{json_serialize, json_serialize_collection, json_serialize_value, json_serialize_vec};
pub use persist::{
    Action, Dbo, DboId, Field, belongs_to, belongs_to_with, field, field_sized, has_many,
    has_many_with, has_one, id, id_sized,
};
pub use ptr::{ObjectState, Ptr, WeakPtr};
pub use query::{Call, DirectBinding, DynamicBinding, Query};
pub use query_model::{ItemFlags, QueryModel, SortOrder};
pub use query_result::QueryResult;
pub use transaction::Transaction;

use dbo_core::error::{ConnectionError, ConnectionErrorKind};
use dbo_core::{
    Dialect, Error, PooledConnection, Result, SqlConnection, SqlConnectionPool, SqlStatement,
};
use mapping::{Mapping, MappingBase};
use ptr::MetaDboBase;
use serde::{Deserialize, Serialize};
use statement::ScopedStatement;
use std::any::{Any, TypeId};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;

// ============================================================================
// Configuration
// ============================================================================

/// When the session writes queued changes to the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushMode {
    /// Flush before every query and collection access, and on commit.
    #[default]
    Auto,
    /// Flush only on [`Session::flush`] and on commit. Collection changes are
    /// buffered and visible through the manual-mode insertion/removal lists.
    Manual,
}

/// Session construction options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    pub flush_mode: FlushMode,
}

impl SessionConfig {
    #[must_use]
    pub fn flush_mode(mut self, mode: FlushMode) -> Self {
        self.flush_mode = mode;
        self
    }
}

// ============================================================================
// Session
// ============================================================================

/// A unit of work over one connection or connection pool.
///
/// `Session` is a cheap handle; clones refer to the same session.
#[derive(Clone)]
pub struct Session {
    pub(crate) inner: Rc<SessionImpl>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("flush_mode", &self.inner.flush_mode.get())
            .field("dirty", &self.inner.dirty.borrow().len())
            .field("in_transaction", &self.is_in_transaction())
            .finish()
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Session {
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    pub fn with_config(config: SessionConfig) -> Self {
        let inner = Rc::new_cyclic(|this| SessionImpl {
            flush_mode: Cell::new(config.flush_mode),
            connection: RefCell::new(None),
            pool: RefCell::new(None),
            dialect: RefCell::new(None),
            mappings: RefCell::new(MappingRegistry::default()),
            dirty: RefCell::new(VecDeque::new()),
            transaction: RefCell::new(None),
            flushing: Cell::new(false),
            generation: Cell::new(0),
            this: this.clone(),
        });
        Self { inner }
    }

    pub(crate) fn from_impl(inner: Rc<SessionImpl>) -> Self {
        Self { inner }
    }

    /// Use a single dedicated connection.
    pub fn set_connection(&self, connection: Box<dyn SqlConnection>) {
        *self.inner.dialect.borrow_mut() = Some(connection.dialect());
        *self.inner.connection.borrow_mut() = Some(connection);
        self.inner.pool.borrow_mut().take();
        self.inner.bump_generation();
    }

    /// Check out a connection from `pool` for every outermost transaction.
    pub fn set_connection_pool(&self, pool: Arc<dyn SqlConnectionPool>) {
        *self.inner.dialect.borrow_mut() = Some(pool.dialect());
        *self.inner.pool.borrow_mut() = Some(pool);
        self.inner.connection.borrow_mut().take();
        self.inner.bump_generation();
    }

    /// Map `C` to `table`. Mapping the same class again under the same
    /// name is a no-op.
    pub fn map_class<C: Dbo>(&self, table: &str) -> Result<()> {
        self.inner.map_class::<C>(table)
    }

    pub fn table_name<C: Dbo>(&self) -> Result<String> {
        Ok(self.inner.mapping::<C>()?.table_name().to_string())
    }

    /// Add a transient object; it is inserted on the next flush.
    pub fn add<C: Dbo>(&self, ptr: Ptr<C>) -> Result<Ptr<C>> {
        self.inner.add(&ptr)?;
        Ok(ptr)
    }

    /// Wrap `obj` in a new [`Ptr`] and add it.
    pub fn add_new<C: Dbo>(&self, obj: C) -> Result<Ptr<C>> {
        self.add(Ptr::new(obj))
    }

    /// Load an object, from the identity map when it is already resident.
    pub fn load<C: Dbo>(&self, id: C::Id) -> Result<Ptr<C>> {
        mapping::load(&self.inner, id, false)
    }

    /// Load an object, overwriting any resident unflushed state.
    pub fn load_force_reread<C: Dbo>(&self, id: C::Id) -> Result<Ptr<C>> {
        mapping::load(&self.inner, id, true)
    }

    /// A pointer to the object with `id` that is loaded on first access.
    pub fn load_lazy<C: Dbo>(&self, id: C::Id) -> Result<Ptr<C>> {
        mapping::load_lazy(&self.inner, id)
    }

    /// Query all objects of `C`.
    pub fn find<C: Dbo>(&self) -> Query<Ptr<C>> {
        Query::find(self.clone(), "")
    }

    /// Query the objects of `C` matching `condition`.
    pub fn find_where<C: Dbo>(&self, condition: &str) -> Query<Ptr<C>> {
        Query::find(self.clone(), condition)
    }

    /// Like [`find_where`](Self::find_where), binding parameters straight
    /// into the prepared statement.
    pub fn find_direct<C: Dbo>(&self, condition: &str) -> Query<Ptr<C>, DirectBinding> {
        Query::find(self.clone(), condition)
    }

    /// A query from raw SQL; `sql` is everything from `select` onwards.
    pub fn query<R: QueryResult>(&self, sql: &str) -> Query<R> {
        Query::sql(self.clone(), sql)
    }

    pub fn query_direct<R: QueryResult>(&self, sql: &str) -> Query<R, DirectBinding> {
        Query::sql(self.clone(), sql)
    }

    /// Prepare an arbitrary statement for execution.
    pub fn execute(&self, sql: &str) -> Call {
        Call::new(self.clone(), sql)
    }

    /// Write all queued changes. Requires an active transaction when
    /// anything is queued.
    pub fn flush(&self) -> Result<()> {
        self.inner.flush()
    }

    pub fn flush_mode(&self) -> FlushMode {
        self.inner.flush_mode.get()
    }

    /// Change the flush mode, flushing queued changes first.
    pub fn set_flush_mode(&self, mode: FlushMode) -> Result<()> {
        if !self.inner.dirty.borrow().is_empty() {
            self.inner.flush()?;
        }
        self.inner.flush_mode.set(mode);
        Ok(())
    }

    /// Start a (possibly nested) transaction.
    pub fn begin(&self) -> Result<Transaction> {
        Transaction::new(self)
    }

    pub fn is_in_transaction(&self) -> bool {
        self.inner
            .transaction
            .try_borrow()
            .map(|tx| tx.is_some())
            .unwrap_or(true)
    }

    /// Discard the in-memory state of every resident object (of `table`
    /// only, when given). Objects reload on next access.
    pub fn reread_all(&self, table: Option<&str>) -> Result<()> {
        self.inner.reread_all(table)
    }

    /// Drop all queued changes. New objects become transient again and
    /// modified or deleted objects revert to their database state.
    pub fn discard_unflushed(&self) -> Result<()> {
        self.inner.discard_unflushed()
    }

    /// Number of objects waiting to be flushed.
    pub fn dirty_count(&self) -> usize {
        self.inner.dirty.borrow().len()
    }

    /// The dialect of the configured connection or pool.
    pub fn dialect(&self) -> Result<Arc<dyn Dialect>> {
        self.inner.dialect()
    }
}

// ============================================================================
// Session internals
// ============================================================================

#[derive(Clone)]
pub(crate) struct MappingEntry {
    pub(crate) base: Rc<dyn MappingBase>,
    any: Rc<dyn Any>,
}

#[derive(Default)]
pub(crate) struct MappingRegistry {
    order: Vec<TypeId>,
    by_type: HashMap<TypeId, MappingEntry>,
    by_table: HashMap<String, TypeId>,
}

/// State of the active transaction, shared by all nested handles.
pub(crate) struct TransactionState {
    pub(crate) depth: usize,
    pub(crate) rollback_only: bool,
    /// Whether the database transaction has been started.
    pub(crate) open: bool,
    pub(crate) pooled: Option<PooledConnection>,
    /// Objects saved or deleted in this transaction.
    pub(crate) objects: Vec<Rc<dyn MetaDboBase>>,
}

pub(crate) struct SessionImpl {
    pub(crate) flush_mode: Cell<FlushMode>,
    connection: RefCell<Option<Box<dyn SqlConnection>>>,
    pool: RefCell<Option<Arc<dyn SqlConnectionPool>>>,
    dialect: RefCell<Option<Arc<dyn Dialect>>>,
    mappings: RefCell<MappingRegistry>,
    pub(crate) dirty: RefCell<VecDeque<Rc<dyn MetaDboBase>>>,
    pub(crate) transaction: RefCell<Option<TransactionState>>,
    pub(crate) flushing: Cell<bool>,
    /// Identifies the connection statements were prepared on.
    generation: Cell<u64>,
    this: Weak<SessionImpl>,
}

impl SessionImpl {
    pub(crate) fn weak(&self) -> Weak<SessionImpl> {
        self.this.clone()
    }

    fn bump_generation(&self) {
        self.generation.set(self.generation.get() + 1);
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.get()
    }

    pub(crate) fn dialect(&self) -> Result<Arc<dyn Dialect>> {
        self.dialect.borrow().clone().ok_or_else(not_configured)
    }

    // ---- mappings ----------------------------------------------------------

    fn map_class<C: Dbo>(&self, table: &str) -> Result<()> {
        let type_id = TypeId::of::<C>();
        let mut registry = self.mappings.borrow_mut();
        if let Some(entry) = registry.by_type.get(&type_id) {
            if entry.base.table_name() == table {
                return Ok(());
            }
            return Err(Error::usage(format!(
                "class {} is already mapped to table '{}'",
                std::any::type_name::<C>(),
                entry.base.table_name()
            )));
        }
        if registry.by_table.contains_key(table) {
            return Err(Error::usage(format!(
                "table '{table}' is already mapped to another class"
            )));
        }

        let mapping = Rc::new(Mapping::<C>::new(table)?);
        let entry = MappingEntry {
            base: mapping.clone(),
            any: mapping,
        };
        registry.order.push(type_id);
        registry.by_type.insert(type_id, entry);
        registry.by_table.insert(table.to_string(), type_id);
        tracing::debug!(table = %table, class = std::any::type_name::<C>(), "Mapped class");
        Ok(())
    }

    pub(crate) fn mapping<C: Dbo>(&self) -> Result<Rc<Mapping<C>>> {
        let entry = self
            .mappings
            .borrow()
            .by_type
            .get(&TypeId::of::<C>())
            .cloned()
            .ok_or_else(|| {
                Error::usage(format!(
                    "class {} was not mapped",
                    std::any::type_name::<C>()
                ))
            })?;
        entry
            .any
            .downcast::<Mapping<C>>()
            .map_err(|_| Error::usage("mapping registry is inconsistent"))
    }

    pub(crate) fn mapping_by_table(&self, table: &str) -> Result<Rc<dyn MappingBase>> {
        let registry = self.mappings.borrow();
        registry
            .by_table
            .get(table)
            .and_then(|type_id| registry.by_type.get(type_id))
            .map(|entry| entry.base.clone())
            .ok_or_else(|| Error::usage(format!("table '{table}' was not mapped")))
    }

    /// All mappings in registration order.
    pub(crate) fn mappings(&self) -> Vec<Rc<dyn MappingBase>> {
        let registry = self.mappings.borrow();
        registry
            .order
            .iter()
            .filter_map(|type_id| registry.by_type.get(type_id))
            .map(|entry| entry.base.clone())
            .collect()
    }

    // ---- objects -----------------------------------------------------------

    pub(crate) fn add<C: Dbo>(&self, ptr: &Ptr<C>) -> Result<()> {
        let meta = ptr
            .meta()
            .ok_or_else(|| Error::usage("cannot add a null pointer"))?;
        if let Some(current) = meta.session_impl_opt() {
            if std::ptr::eq(Rc::as_ptr(&current), self) {
                return Ok(());
            }
            return Err(Error::usage("object already belongs to another session"));
        }
        if meta.has_flag(ptr::flags::DELETED) {
            return Err(Error::usage("cannot add a deleted object"));
        }
        let mapping = self.mapping::<C>()?;

        meta.attach(self.weak());
        meta.set_flag(ptr::flags::NEEDS_SAVE);
        self.needs_flush(meta.clone());
        db_action::session_add::<C>(self, &mapping, meta)?;
        tracing::debug!(table = %mapping.table_name(), "Added object to session");
        Ok(())
    }

    /// Queue `obj` for the next flush.
    pub(crate) fn needs_flush(&self, obj: Rc<dyn MetaDboBase>) {
        let mut dirty = self.dirty.borrow_mut();
        if !dirty.iter().any(|o| same_object(o, &obj)) {
            dirty.push_back(obj);
        }
    }

    pub(crate) fn remove_dirty(&self, obj: &Rc<dyn MetaDboBase>) {
        self.dirty.borrow_mut().retain(|o| !same_object(o, obj));
    }

    /// Record that `obj` was saved or deleted in the current transaction.
    pub(crate) fn transaction_add(&self, obj: Rc<dyn MetaDboBase>) -> Result<()> {
        let mut tx = self
            .transaction
            .try_borrow_mut()
            .map_err(|_| Error::usage("transaction state is busy"))?;
        let tx = tx.as_mut().ok_or_else(no_transaction)?;
        tx.objects.push(obj);
        Ok(())
    }

    fn reread_all(&self, table: Option<&str>) -> Result<()> {
        let _span = tracing::debug_span!("reread_all", table = ?table).entered();
        for mapping in self.mappings() {
            if table.is_none_or(|t| t == mapping.table_name()) {
                mapping.reread_all();
            }
        }
        Ok(())
    }

    fn discard_unflushed(&self) -> Result<()> {
        let dirty: Vec<_> = self.dirty.borrow_mut().drain(..).collect();
        tracing::debug!(count = dirty.len(), "Discarding unflushed changes");
        for obj in dirty {
            obj.discard_changes();
        }
        Ok(())
    }

    // ---- connection and statements ----------------------------------------

    /// Run `f` on the transaction's connection, starting the database
    /// transaction (and checking out a pooled connection) on first use.
    pub(crate) fn with_connection<R>(
        &self,
        f: impl FnOnce(&mut dyn SqlConnection) -> Result<R>,
    ) -> Result<R> {
        let mut slot = self
            .transaction
            .try_borrow_mut()
            .map_err(|_| Error::usage("transaction state is busy"))?;
        let tx = slot.as_mut().ok_or_else(no_transaction)?;

        let pool = self.pool.borrow().clone();
        if let Some(pool) = pool {
            if tx.pooled.is_none() {
                tx.pooled = Some(PooledConnection::checkout(pool)?);
                self.bump_generation();
                tracing::debug!("Checked out pooled connection");
            }
            let Some(conn) = tx.pooled.as_mut() else {
                return Err(not_configured());
            };
            if !tx.open {
                conn.start_transaction()?;
                tx.open = true;
                tracing::debug!("Database transaction started");
            }
            return f(&mut **conn);
        }

        let mut direct = self
            .connection
            .try_borrow_mut()
            .map_err(|_| Error::usage("connection is busy"))?;
        let conn = direct.as_mut().ok_or_else(not_configured)?;
        if !tx.open {
            conn.start_transaction()?;
            tx.open = true;
            tracing::debug!("Database transaction started");
        }
        f(conn.as_mut())
    }

    /// A prepared statement for `sql`, reset and ready for binding.
    pub(crate) fn statement(&self, sql: &str) -> Result<ScopedStatement> {
        let statement = self.with_connection(|conn| match conn.get_statement(sql) {
            Some(statement) => Ok(statement),
            None => {
                tracing::trace!(sql = %sql, "Preparing statement");
                conn.prepare_statement(sql)
            }
        })?;
        let mut scoped = ScopedStatement::new(self.weak(), self.generation(), statement);
        scoped.reset()?;
        Ok(scoped)
    }

    /// Put a statement back into its connection's cache.
    pub(crate) fn release_statement(&self, generation: u64, statement: Box<dyn SqlStatement>) {
        if generation != self.generation() {
            return;
        }
        let key = statement.sql().to_string();
        if let Ok(mut tx) = self.transaction.try_borrow_mut() {
            if let Some(conn) = tx.as_mut().and_then(|tx| tx.pooled.as_mut()) {
                conn.save_statement(key, statement);
                return;
            }
        }
        if let Ok(mut conn) = self.connection.try_borrow_mut() {
            if let Some(conn) = conn.as_mut() {
                conn.save_statement(key, statement);
            }
        }
    }

    /// Run a statement that returns no rows.
    pub(crate) fn execute_sql(&self, sql: &str) -> Result<()> {
        tracing::trace!(sql = %sql, "Executing");
        self.with_connection(|conn| conn.execute_sql(sql))
    }

    /// Take the transaction state when the outermost handle ends it.
    pub(crate) fn end_transaction(&self) -> Option<TransactionState> {
        let state = self.transaction.borrow_mut().take();
        if state.as_ref().is_some_and(|s| s.pooled.is_some()) {
            tracing::debug!("Returning pooled connection");
        }
        state
    }

    /// The direct connection, for ending a database transaction.
    pub(crate) fn with_direct_connection<R>(
        &self,
        f: impl FnOnce(&mut dyn SqlConnection) -> Result<R>,
    ) -> Result<R> {
        let mut direct = self
            .connection
            .try_borrow_mut()
            .map_err(|_| Error::usage("connection is busy"))?;
        let conn = direct.as_mut().ok_or_else(not_configured)?;
        f(conn.as_mut())
    }
}

impl Drop for SessionImpl {
    fn drop(&mut self) {
        let live: usize = self
            .mappings
            .get_mut()
            .by_type
            .values()
            .map(|entry| entry.base.live_count())
            .sum();
        if live > 0 {
            tracing::warn!(
                objects = live,
                "Session dropped while mapped objects are still referenced"
            );
        }
    }
}

pub(crate) fn same_object(a: &Rc<dyn MetaDboBase>, b: &Rc<dyn MetaDboBase>) -> bool {
    std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
}

pub(crate) fn no_transaction() -> Error {
    Error::usage("operation requires an active transaction")
}

fn not_configured() -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::NotConfigured,
        message: "no connection or connection pool configured".to_string(),
        source: None,
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Mapped classes and a session over an in-memory database, shared by
    //! the unit tests of this crate.

    use super::*;
    use dbo_core::RelationType;
    use dbo_sqlite::SqliteConnection;

    #[derive(Debug, Default)]
    pub struct Author {
        pub name: String,
        pub age: i32,
        pub books: Collection<Ptr<Book>>,
    }

    impl Dbo for Author {
        type Id = i64;

        fn persist<A: Action>(&mut self, a: &mut A) {
            field(a, &mut self.name, "name");
            field(a, &mut self.age, "age");
            has_many(a, &mut self.books, RelationType::ManyToOne, "author");
        }
    }

    #[derive(Debug, Default)]
    pub struct Book {
        pub title: String,
        pub author: Ptr<Author>,
        pub tags: Collection<Ptr<Tag>>,
    }

    impl Dbo for Book {
        type Id = i64;

        fn persist<A: Action>(&mut self, a: &mut A) {
            field(a, &mut self.title, "title");
            belongs_to(a, &mut self.author, "author");
            has_many(a, &mut self.tags, RelationType::ManyToMany, "book_tag");
        }
    }

    #[derive(Debug, Default)]
    pub struct Tag {
        pub label: String,
        pub books: Collection<Ptr<Book>>,
    }

    impl Dbo for Tag {
        type Id = i64;

        fn persist<A: Action>(&mut self, a: &mut A) {
            field(a, &mut self.label, "label");
            has_many(a, &mut self.books, RelationType::ManyToMany, "book_tag");
        }
    }

    pub fn session() -> Session {
        let session = Session::new();
        session.set_connection(Box::new(
            SqliteConnection::open_memory().expect("open in-memory database"),
        ));
        session.map_class::<Author>("author").expect("map author");
        session.map_class::<Book>("book").expect("map book");
        session.map_class::<Tag>("tag").expect("map tag");
        session.create_tables().expect("create tables");
        session
    }
}
