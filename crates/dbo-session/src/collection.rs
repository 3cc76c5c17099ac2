//! Collections: query results and the many side of relations.
//!
//! A [`Collection`] is one of three things:
//!
//! - **unbound**: a `has_many` member of an object that is not in a session;
//! - **query-backed**: the result of `Query::result_list`, which can be
//!   iterated exactly once;
//! - **relation-backed**: a `has_many` member of a session object, re-queried
//!   on every iteration and supporting `insert`/`erase`.
//!
//! Many-to-many changes are recorded as *activity* on the collection and
//! written to the join table when the owning object is flushed. In
//! [`FlushMode::Manual`](crate::FlushMode::Manual) the unflushed changes are
//! also kept in insertion/removal buffers so iteration reflects them.

use crate::mapping::{self, MappingBase, RelationSql};
use crate::persist::Dbo;
use crate::ptr::{MetaDboBase, Ptr};
use crate::query::{DynamicBinding, Query};
use crate::query_result::QueryResult;
use crate::statement::ScopedStatement;
use crate::{FlushMode, Session, SessionImpl, db_action};
use dbo_core::{Error, RelationType, Result, SqlValue, Value};
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

/// Pending many-to-many changes of one relation.
#[derive(Debug)]
pub(crate) struct Activity<T> {
    pub inserted: Vec<T>,
    pub erased: Vec<T>,
    /// Written to the join table in the current transaction.
    pub transaction_inserted: Vec<T>,
    pub transaction_erased: Vec<T>,
}

impl<T> Default for Activity<T> {
    fn default() -> Self {
        Self {
            inserted: Vec::new(),
            erased: Vec::new(),
            transaction_inserted: Vec::new(),
            transaction_erased: Vec::new(),
        }
    }
}

fn remove_item<T: PartialEq>(items: &mut Vec<T>, item: &T) -> bool {
    match items.iter().position(|i| i == item) {
        Some(pos) => {
            items.remove(pos);
            true
        }
        None => false,
    }
}

pub(crate) struct QueryData {
    session: Weak<SessionImpl>,
    statement: Option<ScopedStatement>,
    count: Option<ScopedStatement>,
    size: Option<usize>,
    iterated: bool,
    sql: String,
}

pub(crate) struct RelationData<T> {
    session: Weak<SessionImpl>,
    owner: Weak<dyn MetaDboBase>,
    owner_table: String,
    /// Position of the relation among the owner's relations.
    index: usize,
    activity: Activity<T>,
    manual_insertions: Vec<T>,
    manual_removals: Vec<T>,
}

pub(crate) enum CollectionData<T> {
    Unbound,
    Query(QueryData),
    Relation(RelationData<T>),
}

/// A collection of query results or related objects.
///
/// Clones share state.
pub struct Collection<T: QueryResult> {
    data: Rc<RefCell<CollectionData<T>>>,
}

impl<T: QueryResult> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
        }
    }
}

impl<T: QueryResult> Default for Collection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: QueryResult> fmt::Debug for Collection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.data.try_borrow().as_deref() {
            Ok(CollectionData::Unbound) => "unbound",
            Ok(CollectionData::Query(_)) => "query",
            Ok(CollectionData::Relation(_)) => "relation",
            Err(_) => "busy",
        };
        f.debug_struct("Collection").field("kind", &kind).finish()
    }
}

fn session_gone() -> Error {
    Error::usage("collection's session no longer exists")
}

fn unbound() -> Error {
    Error::usage("collection is not bound to a session")
}

fn busy() -> Error {
    Error::usage("collection is in use")
}

fn relation_sql(session: &SessionImpl, owner_table: &str, index: usize) -> Result<RelationSql> {
    let info = session.mapping_by_table(owner_table)?.info(session)?;
    mapping::resolved(session, &info)?
        .relations
        .get(index)
        .cloned()
        .ok_or_else(|| Error::usage("relation index out of range"))
}

impl<T: QueryResult> Collection<T> {
    /// An unbound collection.
    pub fn new() -> Self {
        Self {
            data: Rc::new(RefCell::new(CollectionData::Unbound)),
        }
    }

    pub(crate) fn from_query(
        session: &SessionImpl,
        statement: ScopedStatement,
        count: Option<ScopedStatement>,
        sql: String,
    ) -> Self {
        Self {
            data: Rc::new(RefCell::new(CollectionData::Query(QueryData {
                session: session.weak(),
                statement: Some(statement),
                count,
                size: None,
                iterated: false,
                sql,
            }))),
        }
    }

    /// Attach this (member) collection to the relation `index` of `owner`.
    pub(crate) fn bind_relation(
        &self,
        session: Weak<SessionImpl>,
        owner: Weak<dyn MetaDboBase>,
        owner_table: &str,
        index: usize,
    ) -> Result<()> {
        let mut data = self.data.try_borrow_mut().map_err(|_| busy())?;
        *data = CollectionData::Relation(RelationData {
            session,
            owner,
            owner_table: owner_table.to_string(),
            index,
            activity: Activity::default(),
            manual_insertions: Vec::new(),
            manual_removals: Vec::new(),
        });
        Ok(())
    }

    pub fn is_bound(&self) -> bool {
        !matches!(
            self.data.try_borrow().as_deref(),
            Ok(CollectionData::Unbound)
        )
    }

    pub fn session(&self) -> Option<Session> {
        let data = self.data.try_borrow().ok()?;
        let weak = match &*data {
            CollectionData::Unbound => return None,
            CollectionData::Query(q) => &q.session,
            CollectionData::Relation(r) => &r.session,
        };
        weak.upgrade().map(Session::from_impl)
    }

    /// The SQL of the underlying select.
    pub fn sql(&self) -> Option<String> {
        let data = self.data.try_borrow().ok()?;
        match &*data {
            CollectionData::Unbound => None,
            CollectionData::Query(q) => Some(q.sql.clone()),
            CollectionData::Relation(r) => {
                let session = r.session.upgrade()?;
                relation_sql(&session, &r.owner_table, r.index)
                    .ok()
                    .map(|rel| rel.select)
            }
        }
    }

    /// Iterate the collection. A query-backed collection can be iterated
    /// only once.
    pub fn iter(&self) -> Result<CollectionIter<T>> {
        enum Source {
            Query(Rc<SessionImpl>),
            Relation(Rc<SessionImpl>, Weak<dyn MetaDboBase>, String, usize),
        }

        let source = {
            let mut data = self.data.try_borrow_mut().map_err(|_| busy())?;
            match &mut *data {
                CollectionData::Unbound => return Err(unbound()),
                CollectionData::Query(q) => {
                    if q.iterated {
                        return Err(Error::usage(
                            "a query collection can be iterated only once",
                        ));
                    }
                    q.iterated = true;
                    Source::Query(q.session.upgrade().ok_or_else(session_gone)?)
                }
                CollectionData::Relation(r) => Source::Relation(
                    r.session.upgrade().ok_or_else(session_gone)?,
                    r.owner.clone(),
                    r.owner_table.clone(),
                    r.index,
                ),
            }
        };

        match source {
            Source::Query(session) => {
                session.auto_flush()?;
                let mut statement = {
                    let mut data = self.data.try_borrow_mut().map_err(|_| busy())?;
                    match &mut *data {
                        CollectionData::Query(q) => q.statement.take(),
                        _ => None,
                    }
                }
                .ok_or_else(|| Error::usage("query collection has no statement"))?;
                tracing::trace!(sql = %statement.sql(), "Executing query");
                statement.execute()?;
                Ok(CollectionIter {
                    session: Session::from_impl(session),
                    statement: Some(statement),
                    data: self.data.clone(),
                    removals: Vec::new(),
                    insertions: Vec::new().into_iter(),
                    rows: 0,
                    record_size: true,
                    failed: false,
                })
            }
            Source::Relation(session, owner, owner_table, index) => {
                session.auto_flush()?;
                let owner = owner
                    .upgrade()
                    .ok_or_else(|| Error::usage("collection owner no longer exists"))?;
                let (insertions, removals) = {
                    let data = self.data.try_borrow().map_err(|_| busy())?;
                    match &*data {
                        CollectionData::Relation(r) => {
                            (r.manual_insertions.clone(), r.manual_removals.clone())
                        }
                        _ => (Vec::new(), Vec::new()),
                    }
                };

                let statement = if owner.is_persisted() {
                    let rel = relation_sql(&session, &owner_table, index)?;
                    let mut statement = session.statement(&rel.select)?;
                    statement.bind(0, &owner.id_value())?;
                    tracing::trace!(sql = %rel.select, "Executing relation query");
                    statement.execute()?;
                    Some(statement)
                } else {
                    None
                };

                Ok(CollectionIter {
                    session: Session::from_impl(session),
                    statement,
                    data: self.data.clone(),
                    removals,
                    insertions: insertions.into_iter(),
                    rows: 0,
                    record_size: false,
                    failed: false,
                })
            }
        }
    }

    /// Number of elements.
    pub fn size(&self) -> Result<usize> {
        enum Source {
            Query(Rc<SessionImpl>),
            Relation(Rc<SessionImpl>, Weak<dyn MetaDboBase>, String, usize),
        }

        let source = {
            let data = self.data.try_borrow().map_err(|_| busy())?;
            match &*data {
                CollectionData::Unbound => return Err(unbound()),
                CollectionData::Query(q) => {
                    if let Some(size) = q.size {
                        return Ok(size);
                    }
                    Source::Query(q.session.upgrade().ok_or_else(session_gone)?)
                }
                CollectionData::Relation(r) => Source::Relation(
                    r.session.upgrade().ok_or_else(session_gone)?,
                    r.owner.clone(),
                    r.owner_table.clone(),
                    r.index,
                ),
            }
        };

        match source {
            Source::Query(session) => {
                session.auto_flush()?;
                let mut data = self.data.try_borrow_mut().map_err(|_| busy())?;
                let CollectionData::Query(q) = &mut *data else {
                    return Err(unbound());
                };
                let mut count = q
                    .count
                    .take()
                    .ok_or_else(|| Error::usage("query collection has no count statement"))?;
                tracing::trace!(sql = %count.sql(), "Executing count");
                count.execute()?;
                let size = if count.next_row()? {
                    count_value(&count.get_result(0)?)
                } else {
                    0
                };
                q.size = Some(size);
                Ok(size)
            }
            Source::Relation(session, owner, owner_table, index) => {
                session.auto_flush()?;
                let owner = owner
                    .upgrade()
                    .ok_or_else(|| Error::usage("collection owner no longer exists"))?;
                let stored = if owner.is_persisted() {
                    let rel = relation_sql(&session, &owner_table, index)?;
                    let sql = format!("select count(1) from {} where {}", rel.from, rel.condition);
                    count_rows(&session, &sql, &[owner.id_value()])?
                } else {
                    0
                };
                let data = self.data.try_borrow().map_err(|_| busy())?;
                let (added, removed) = match &*data {
                    CollectionData::Relation(r) => {
                        (r.manual_insertions.len(), r.manual_removals.len())
                    }
                    _ => (0, 0),
                };
                Ok((stored + added).saturating_sub(removed))
            }
        }
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.size()? == 0)
    }

    /// The first element, if any.
    pub fn front(&self) -> Result<Option<T>> {
        self.iter()?.next().transpose()
    }

    /// Elements inserted in manual flush mode and not yet flushed.
    pub fn manual_mode_insertions(&self) -> Vec<T> {
        match self.data.try_borrow().as_deref() {
            Ok(CollectionData::Relation(r)) => r.manual_insertions.clone(),
            _ => Vec::new(),
        }
    }

    /// Elements erased in manual flush mode and not yet flushed.
    pub fn manual_mode_removals(&self) -> Vec<T> {
        match self.data.try_borrow().as_deref() {
            Ok(CollectionData::Relation(r)) => r.manual_removals.clone(),
            _ => Vec::new(),
        }
    }
}

fn count_value(value: &Value) -> usize {
    value
        .as_i64()
        .and_then(|n| usize::try_from(n).ok())
        .unwrap_or(0)
}

fn count_rows(session: &SessionImpl, sql: &str, params: &[Value]) -> Result<usize> {
    let mut statement = session.statement(sql)?;
    for (i, param) in params.iter().enumerate() {
        statement.bind(i, param)?;
    }
    tracing::trace!(sql = %sql, "Executing count");
    statement.execute()?;
    if statement.next_row()? {
        Ok(count_value(&statement.get_result(0)?))
    } else {
        Ok(0)
    }
}

struct RelationParts {
    session: Rc<SessionImpl>,
    owner: Rc<dyn MetaDboBase>,
    owner_table: String,
    rel: RelationSql,
}

impl<C: Dbo> Collection<Ptr<C>> {
    fn relation_parts(&self) -> Result<RelationParts> {
        let (session, owner, owner_table, index) = {
            let data = self.data.try_borrow().map_err(|_| busy())?;
            match &*data {
                CollectionData::Relation(r) => (
                    r.session.upgrade().ok_or_else(session_gone)?,
                    r.owner
                        .upgrade()
                        .ok_or_else(|| Error::usage("collection owner no longer exists"))?,
                    r.owner_table.clone(),
                    r.index,
                ),
                CollectionData::Query(_) => {
                    return Err(Error::usage(
                        "operation is only supported on relation collections",
                    ));
                }
                CollectionData::Unbound => return Err(unbound()),
            }
        };
        let rel = relation_sql(&session, &owner_table, index)?;
        Ok(RelationParts {
            session,
            owner,
            owner_table,
            rel,
        })
    }

    fn with_relation<R>(&self, f: impl FnOnce(&mut RelationData<Ptr<C>>) -> R) -> Result<R> {
        let mut data = self.data.try_borrow_mut().map_err(|_| busy())?;
        match &mut *data {
            CollectionData::Relation(r) => Ok(f(r)),
            _ => Err(unbound()),
        }
    }

    /// Add `item` to the relation. A transient item is added to the session.
    pub fn insert(&self, item: Ptr<C>) -> Result<()> {
        if item.is_null() {
            return Err(Error::usage("cannot insert a null pointer"));
        }
        let parts = self.relation_parts()?;
        parts.session.add(&item)?;
        parts.owner.set_dirty();

        match parts.rel.set.relation {
            RelationType::ManyToMany => self.with_relation(|r| {
                let a = &mut r.activity;
                let was_just_erased = remove_item(&mut a.erased, &item);
                remove_item(&mut a.transaction_erased, &item);
                if !was_just_erased
                    && !a.transaction_inserted.contains(&item)
                    && !a.inserted.contains(&item)
                {
                    a.inserted.push(item.clone());
                }
            })?,
            RelationType::ManyToOne => {
                db_action::set_reciprocal(
                    &item,
                    &parts.rel.set.join_name,
                    &parts.owner_table,
                    &parts.owner,
                    true,
                )?;
            }
        }

        if parts.session.flush_mode.get() == FlushMode::Manual {
            self.with_relation(|r| {
                if !remove_item(&mut r.manual_removals, &item) {
                    r.manual_insertions.push(item.clone());
                }
            })?;
        }
        Ok(())
    }

    /// Remove `item` from the relation. For a many-to-one relation this
    /// clears the item's `belongs_to`; the item itself is not deleted.
    pub fn erase(&self, item: &Ptr<C>) -> Result<()> {
        if item.is_null() {
            return Err(Error::usage("cannot erase a null pointer"));
        }
        let parts = self.relation_parts()?;
        parts.owner.set_dirty();

        match parts.rel.set.relation {
            RelationType::ManyToMany => self.with_relation(|r| {
                let a = &mut r.activity;
                let was_just_inserted = remove_item(&mut a.inserted, item);
                remove_item(&mut a.transaction_inserted, item);
                if !was_just_inserted
                    && !a.transaction_erased.contains(item)
                    && !a.erased.contains(item)
                {
                    a.erased.push(item.clone());
                }
            })?,
            RelationType::ManyToOne => {
                db_action::set_reciprocal(
                    item,
                    &parts.rel.set.join_name,
                    &parts.owner_table,
                    &parts.owner,
                    false,
                )?;
            }
        }

        if parts.session.flush_mode.get() == FlushMode::Manual {
            self.with_relation(|r| {
                if !remove_item(&mut r.manual_insertions, item) {
                    r.manual_removals.push(item.clone());
                }
            })?;
        }
        Ok(())
    }

    /// Erase every current element.
    pub fn clear(&self) -> Result<()> {
        self.relation_parts()?;
        let items = self.iter()?.collect::<Result<Vec<_>>>()?;
        for item in &items {
            self.erase(item)?;
        }
        Ok(())
    }

    /// 1 if `item` is in the relation, else 0.
    pub fn count(&self, item: &Ptr<C>) -> Result<usize> {
        let parts = self.relation_parts()?;
        parts.session.auto_flush()?;

        let mut result = 0;
        if parts.owner.is_persisted() && item.meta().is_some_and(|m| m.is_persisted()) {
            let other = parts.session.mapping::<C>()?.info(&parts.session)?;
            let sql = format!(
                "select count(1) from {} where {} and {}",
                parts.rel.from,
                parts.rel.condition,
                other.id_condition(&other.table)
            );
            result = count_rows(
                &parts.session,
                &sql,
                &[parts.owner.id_value(), item.id().to_value()],
            )?;
        }

        self.with_relation(|r| {
            if r.manual_insertions.contains(item) {
                result += 1;
            }
            if r.manual_removals.contains(item) {
                result = result.saturating_sub(1);
            }
            result
        })
    }

    /// A query over the related objects, for further filtering.
    pub fn find(&self) -> Result<Query<Ptr<C>, DynamicBinding>> {
        let parts = self.relation_parts()?;
        parts.session.auto_flush()?;
        let session = Session::from_impl(parts.session.clone());
        Ok(Query::relation(
            session,
            &parts.rel.from,
            &parts.rel.condition,
            parts.owner.id_value(),
        ))
    }
}

/// The type-erased hooks the flush and transaction logic call on
/// relation collections.
pub(crate) trait RelationHandle {
    /// Write pending join table changes after the owner was saved.
    fn flush_relation(&self, session: &SessionImpl, owner_id: &Value) -> Result<()>;
    fn transaction_done(&self, success: bool);
}

impl<C: Dbo> RelationHandle for Collection<Ptr<C>> {
    fn flush_relation(&self, session: &SessionImpl, owner_id: &Value) -> Result<()> {
        let pending = {
            let mut data = self.data.try_borrow_mut().map_err(|_| busy())?;
            let CollectionData::Relation(r) = &mut *data else {
                return Ok(());
            };
            r.manual_insertions.clear();
            r.manual_removals.clear();
            (
                r.owner_table.clone(),
                r.index,
                r.activity.inserted.clone(),
                r.activity.erased.clone(),
            )
        };
        let (owner_table, index, inserted, erased) = pending;
        if inserted.is_empty() && erased.is_empty() {
            return Ok(());
        }
        let rel = relation_sql(session, &owner_table, index)?;
        let (Some(join_insert), Some(join_delete)) = (&rel.join_insert, &rel.join_delete) else {
            return Ok(());
        };

        for item in &inserted {
            item.flush_object()?;
            let mut statement = session.statement(join_insert)?;
            statement.bind(0, owner_id)?;
            statement.bind(1, &item.id().to_value())?;
            tracing::trace!(sql = %join_insert, "Executing");
            statement.execute()?;
        }
        for item in &erased {
            let mut statement = session.statement(join_delete)?;
            statement.bind(0, owner_id)?;
            statement.bind(1, &item.id().to_value())?;
            tracing::trace!(sql = %join_delete, "Executing");
            statement.execute()?;
        }

        self.with_relation(|r| {
            let a = &mut r.activity;
            a.inserted.retain(|i| !inserted.contains(i));
            a.erased.retain(|i| !erased.contains(i));
            a.transaction_inserted.extend(inserted);
            a.transaction_erased.extend(erased);
        })
    }

    fn transaction_done(&self, success: bool) {
        let Ok(mut data) = self.data.try_borrow_mut() else {
            return;
        };
        let CollectionData::Relation(r) = &mut *data else {
            return;
        };
        let a = &mut r.activity;
        if success {
            a.transaction_inserted.clear();
            a.transaction_erased.clear();
        } else {
            for item in a.transaction_inserted.drain(..) {
                if !a.inserted.contains(&item) {
                    a.inserted.push(item);
                }
            }
            for item in a.transaction_erased.drain(..) {
                if !a.erased.contains(&item) {
                    a.erased.push(item);
                }
            }
        }
    }
}

/// Iterator over a [`Collection`].
pub struct CollectionIter<T: QueryResult> {
    session: Session,
    statement: Option<ScopedStatement>,
    data: Rc<RefCell<CollectionData<T>>>,
    removals: Vec<T>,
    insertions: std::vec::IntoIter<T>,
    rows: usize,
    /// Record the row count as the size of a query collection.
    record_size: bool,
    failed: bool,
}

impl<T: QueryResult> CollectionIter<T> {
    fn finish_rows(&mut self) {
        self.statement = None;
        if !self.record_size {
            return;
        }
        if let Ok(mut data) = self.data.try_borrow_mut() {
            if let CollectionData::Query(q) = &mut *data {
                q.size = Some(self.rows);
            }
        }
    }
}

impl<T: QueryResult> Iterator for CollectionIter<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Result<T>> {
        if self.failed {
            return None;
        }
        while let Some(statement) = self.statement.as_mut() {
            match statement.next_row() {
                Ok(true) => {
                    let mut column = 0;
                    match T::load(&self.session, &**statement, &mut column) {
                        Ok(value) => {
                            if self.removals.contains(&value) {
                                continue;
                            }
                            self.rows += 1;
                            return Some(Ok(value));
                        }
                        Err(err) => {
                            self.failed = true;
                            self.statement = None;
                            return Some(Err(err));
                        }
                    }
                }
                Ok(false) => self.finish_rows(),
                Err(err) => {
                    self.failed = true;
                    self.statement = None;
                    return Some(Err(err));
                }
            }
        }
        self.insertions.next().map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;

    fn author(session: &Session, name: &str) -> Ptr<Author> {
        session
            .add_new(Author {
                name: name.into(),
                ..Author::default()
            })
            .unwrap()
    }

    fn book(session: &Session, title: &str) -> Ptr<Book> {
        session
            .add_new(Book {
                title: title.into(),
                ..Book::default()
            })
            .unwrap()
    }

    #[test]
    fn unbound_collection_errors() {
        let c: Collection<Ptr<Book>> = Collection::new();
        assert!(!c.is_bound());
        assert!(matches!(c.iter(), Err(Error::Usage(_))));
        assert!(matches!(c.size(), Err(Error::Usage(_))));
        assert!(c.manual_mode_insertions().is_empty());
    }

    #[test]
    fn many_to_one_insert_sets_belongs_to() {
        let session = session();
        let tx = session.begin().unwrap();
        let a = author(&session, "Ann");
        let b = book(&session, "First");
        let books = a.get().unwrap().books.clone();
        books.insert(b.clone()).unwrap();
        assert_eq!(b.get().unwrap().author, a);
        assert_eq!(books.size().unwrap(), 1);
        assert_eq!(books.count(&b).unwrap(), 1);

        books.erase(&b).unwrap();
        assert!(b.get().unwrap().author.is_null());
        assert_eq!(books.size().unwrap(), 0);
        tx.commit().unwrap();
    }

    #[test]
    fn query_collection_iterates_once() {
        let session = session();
        let tx = session.begin().unwrap();
        author(&session, "A");
        author(&session, "B");
        let all = session.find::<Author>().result_list().unwrap();
        assert_eq!(all.iter().unwrap().count(), 2);
        assert_eq!(all.size().unwrap(), 2);
        assert!(matches!(all.iter(), Err(Error::Usage(_))));
        tx.commit().unwrap();
    }

    #[test]
    fn query_collection_size_before_iteration() {
        let session = session();
        let tx = session.begin().unwrap();
        author(&session, "A");
        let all = session.find::<Author>().result_list().unwrap();
        assert_eq!(all.size().unwrap(), 1);
        assert_eq!(all.iter().unwrap().count(), 1);
        tx.commit().unwrap();
    }

    #[test]
    fn manual_mode_buffers_until_flush() {
        let session = session();
        session.set_flush_mode(FlushMode::Manual).unwrap();
        let tx = session.begin().unwrap();
        let a = author(&session, "Ann");
        let b = book(&session, "Draft");
        let books = a.get().unwrap().books.clone();
        books.insert(b.clone()).unwrap();
        assert_eq!(books.manual_mode_insertions(), vec![b.clone()]);
        assert_eq!(books.size().unwrap(), 1);
        let listed: Vec<_> = books.iter().unwrap().map(Result::unwrap).collect();
        assert_eq!(listed, vec![b.clone()]);

        session.flush().unwrap();
        assert!(books.manual_mode_insertions().is_empty());
        assert_eq!(books.size().unwrap(), 1);
        tx.commit().unwrap();
    }

    #[test]
    fn many_to_many_activity_round_trip() {
        let session = session();
        let tx = session.begin().unwrap();
        let b = book(&session, "B");
        let t = session
            .add_new(Tag {
                label: "t".into(),
                ..Tag::default()
            })
            .unwrap();
        let tags = b.get().unwrap().tags.clone();
        tags.insert(t.clone()).unwrap();
        tags.erase(&t).unwrap();
        assert_eq!(tags.size().unwrap(), 0);

        tags.insert(t.clone()).unwrap();
        assert_eq!(tags.size().unwrap(), 1);
        assert_eq!(t.get().unwrap().books.size().unwrap(), 1);
        tx.commit().unwrap();
    }

    #[test]
    fn clear_erases_members() {
        let session = session();
        let tx = session.begin().unwrap();
        let a = author(&session, "Ann");
        let books = a.get().unwrap().books.clone();
        for title in ["x", "y"] {
            books.insert(book(&session, title)).unwrap();
        }
        assert_eq!(books.size().unwrap(), 2);
        books.clear().unwrap();
        assert_eq!(books.size().unwrap(), 0);
        tx.commit().unwrap();
    }

    #[test]
    fn find_filters_related() {
        let session = session();
        let tx = session.begin().unwrap();
        let a = author(&session, "Ann");
        let books = a.get().unwrap().books.clone();
        books.insert(book(&session, "alpha")).unwrap();
        books.insert(book(&session, "beta")).unwrap();
        let found = books
            .find()
            .unwrap()
            .where_("title = ?")
            .bind("beta")
            .result_list()
            .unwrap();
        let titles: Vec<String> = found
            .iter()
            .unwrap()
            .map(|b| b.unwrap().get().unwrap().title.clone())
            .collect();
        assert_eq!(titles, vec!["beta".to_string()]);
        tx.commit().unwrap();
    }
}
