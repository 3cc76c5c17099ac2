//! Actions that load, save and delete mapped objects.
//!
//! Each action walks a class's [`persist`](crate::Dbo::persist) description.
//! Saving runs in three passes: flush the objects this one refers to
//! (`belongs_to` targets), write this object's row, then write pending
//! many-to-many changes of its collections.

use crate::collection::{Collection, RelationHandle};
use crate::mapping::{
    self, Mapping, MappingBase, MappingInfo, SQL_DELETE, SQL_DELETE_VERSIONED, SQL_INSERT,
    SQL_UPDATE,
};
use crate::persist::{Action, Dbo, DboId};
use crate::ptr::{MetaDbo, MetaDboBase, Ptr, WeakPtr, flags};
use crate::SessionImpl;
use dbo_core::{
    Error, ForeignKeyConstraint, FromValue, RelationType, Result, SqlStatement, SqlValue,
    StaleObjectError, Value, bare_table_name, quote_ident, quote_table,
};
use std::rc::{Rc, Weak};

// ============================================================================
// Loading
// ============================================================================

/// Reads an object's columns sequentially from the current row.
struct LoadAction<'a> {
    session: &'a Rc<SessionImpl>,
    statement: &'a dyn SqlStatement,
    column: usize,
    id: Value,
    error: Option<Error>,
}

impl LoadAction<'_> {
    fn next_value(&mut self) -> Option<Value> {
        if self.error.is_some() {
            return None;
        }
        let column = self.column;
        self.column += 1;
        match self.statement.get_result(column) {
            Ok(value) => Some(value),
            Err(err) => {
                self.error = Some(err);
                None
            }
        }
    }

    fn record<T>(&mut self, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                self.error.get_or_insert(err);
                None
            }
        }
    }
}

impl Action for LoadAction<'_> {
    fn act_field<T: SqlValue>(&mut self, value: &mut T, _name: &str, _size: i32) {
        if let Some(raw) = self.next_value() {
            if let Some(v) = self.record(T::from_value(&raw)) {
                *value = v;
            }
        }
    }

    fn act_id<T: DboId>(&mut self, value: &mut T, _name: &str, _size: i32) {
        let id = self.id.clone();
        if let Some(v) = self.record(T::from_value(&id)) {
            *value = v;
        }
    }

    fn act_ptr<C: Dbo>(&mut self, value: &mut Ptr<C>, _name: &str, _fk: ForeignKeyConstraint) {
        let Some(raw) = self.next_value() else {
            return;
        };
        if raw.is_null() {
            *value = Ptr::null();
            return;
        }
        let loaded = C::Id::from_value(&raw).and_then(|id| mapping::load_lazy::<C>(self.session, id));
        if let Some(ptr) = self.record(loaded) {
            *value = ptr;
        }
    }

    fn act_weak_ptr<C: Dbo>(&mut self, _value: &mut WeakPtr<C>, _join_name: &str) {}

    fn act_collection<C: Dbo>(
        &mut self,
        _value: &mut Collection<Ptr<C>>,
        _relation: RelationType,
        _join_name: &str,
        _join_id: &str,
        _fk: ForeignKeyConstraint,
    ) {
    }
}

/// Read the data columns of one object starting at `column`; returns the
/// column after the last one read.
pub(crate) fn load_object<C: Dbo>(
    session: &Rc<SessionImpl>,
    statement: &dyn SqlStatement,
    column: usize,
    id: C::Id,
    obj: &mut C,
) -> Result<usize> {
    let mut action = LoadAction {
        session,
        statement,
        column,
        id: id.to_value(),
        error: None,
    };
    obj.persist(&mut action);
    match action.error {
        Some(err) => Err(err),
        None => Ok(action.column),
    }
}

/// Binds the relation collections and weak pointers of an object to its
/// session, numbering relations in declaration order.
struct BindRelations<'a> {
    session: Weak<SessionImpl>,
    owner: Weak<dyn MetaDboBase>,
    table: &'a str,
    index: usize,
    error: Option<Error>,
}

impl BindRelations<'_> {
    fn bind<C: Dbo>(&mut self, collection: &Collection<Ptr<C>>) {
        let result = collection.bind_relation(
            self.session.clone(),
            self.owner.clone(),
            self.table,
            self.index,
        );
        self.index += 1;
        if let Err(err) = result {
            self.error.get_or_insert(err);
        }
    }
}

impl Action for BindRelations<'_> {
    fn act_field<T: SqlValue>(&mut self, _value: &mut T, _name: &str, _size: i32) {}

    fn act_id<T: DboId>(&mut self, _value: &mut T, _name: &str, _size: i32) {}

    fn act_ptr<C: Dbo>(&mut self, _value: &mut Ptr<C>, _name: &str, _fk: ForeignKeyConstraint) {}

    fn act_weak_ptr<C: Dbo>(&mut self, value: &mut WeakPtr<C>, _join_name: &str) {
        self.bind(&value.relation);
    }

    fn act_collection<C: Dbo>(
        &mut self,
        value: &mut Collection<Ptr<C>>,
        _relation: RelationType,
        _join_name: &str,
        _join_id: &str,
        _fk: ForeignKeyConstraint,
    ) {
        self.bind(value);
    }
}

pub(crate) fn bind_relations<C: Dbo>(
    session: &SessionImpl,
    info: &MappingInfo,
    owner: &Rc<MetaDbo<C>>,
    obj: &mut C,
) -> Result<()> {
    let owner: Rc<dyn MetaDboBase> = owner.clone();
    let mut action = BindRelations {
        session: session.weak(),
        owner: Rc::downgrade(&owner),
        table: &info.table,
        index: 0,
        error: None,
    };
    obj.persist(&mut action);
    action.error.map_or(Ok(()), Err)
}

// ============================================================================
// Adding to a session
// ============================================================================

/// Adds transient `belongs_to` targets along with their owner.
struct CascadeAdd<'a> {
    session: &'a SessionImpl,
    error: Option<Error>,
}

impl Action for CascadeAdd<'_> {
    fn act_field<T: SqlValue>(&mut self, _value: &mut T, _name: &str, _size: i32) {}

    fn act_id<T: DboId>(&mut self, _value: &mut T, _name: &str, _size: i32) {}

    fn act_ptr<C: Dbo>(&mut self, value: &mut Ptr<C>, _name: &str, _fk: ForeignKeyConstraint) {
        if self.error.is_some() || value.is_null() || value.session().is_some() {
            return;
        }
        if let Err(err) = self.session.add(value) {
            self.error = Some(err);
        }
    }

    fn act_weak_ptr<C: Dbo>(&mut self, _value: &mut WeakPtr<C>, _join_name: &str) {}

    fn act_collection<C: Dbo>(
        &mut self,
        _value: &mut Collection<Ptr<C>>,
        _relation: RelationType,
        _join_name: &str,
        _join_id: &str,
        _fk: ForeignKeyConstraint,
    ) {
    }
}

/// Finish adding `meta` to the session: cascade to referenced transient
/// objects and bind the object's relations.
pub(crate) fn session_add<C: Dbo>(
    session: &SessionImpl,
    mapping: &Mapping<C>,
    meta: &Rc<MetaDbo<C>>,
) -> Result<()> {
    let info = mapping.info(session)?;
    let mut slot = meta
        .obj
        .try_borrow_mut()
        .map_err(|_| Error::usage("cannot add an object that is borrowed"))?;
    let Some(obj) = slot.as_mut() else {
        return Ok(());
    };
    let mut cascade = CascadeAdd {
        session,
        error: None,
    };
    obj.persist(&mut cascade);
    if let Some(err) = cascade.error {
        return Err(err);
    }
    bind_relations(session, &info, meta, obj)
}

// ============================================================================
// Saving
// ============================================================================

/// First save pass: the objects this one refers to.
struct Dependencies<'a> {
    session: &'a SessionImpl,
    targets: Vec<Rc<dyn MetaDboBase>>,
    error: Option<Error>,
}

impl Action for Dependencies<'_> {
    fn act_field<T: SqlValue>(&mut self, _value: &mut T, _name: &str, _size: i32) {}

    fn act_id<T: DboId>(&mut self, _value: &mut T, _name: &str, _size: i32) {}

    fn act_ptr<C: Dbo>(&mut self, value: &mut Ptr<C>, _name: &str, _fk: ForeignKeyConstraint) {
        let Some(meta) = value.meta() else {
            return;
        };
        if value.session().is_none() {
            if let Err(err) = self.session.add(value) {
                self.error.get_or_insert(err);
                return;
            }
        }
        self.targets.push(meta.clone());
    }

    fn act_weak_ptr<C: Dbo>(&mut self, _value: &mut WeakPtr<C>, _join_name: &str) {}

    fn act_collection<C: Dbo>(
        &mut self,
        _value: &mut Collection<Ptr<C>>,
        _relation: RelationType,
        _join_name: &str,
        _join_id: &str,
        _fk: ForeignKeyConstraint,
    ) {
    }
}

/// Second save pass: binds the row's columns in statement order and
/// collects the relation collections for the third pass.
struct BindFields<'a> {
    statement: &'a mut dyn SqlStatement,
    column: usize,
    natural_id: Option<Value>,
    relations: Vec<Box<dyn RelationHandle>>,
    error: Option<Error>,
}

impl BindFields<'_> {
    fn bind(&mut self, value: &Value) {
        if self.error.is_some() {
            return;
        }
        if let Err(err) = self.statement.bind(self.column, value) {
            self.error = Some(err);
        }
        self.column += 1;
    }
}

impl Action for BindFields<'_> {
    fn act_field<T: SqlValue>(&mut self, value: &mut T, _name: &str, _size: i32) {
        self.bind(&value.to_value());
    }

    fn act_id<T: DboId>(&mut self, value: &mut T, _name: &str, _size: i32) {
        let id = value.to_value();
        self.bind(&id);
        self.natural_id = Some(id);
    }

    fn act_ptr<C: Dbo>(&mut self, value: &mut Ptr<C>, _name: &str, _fk: ForeignKeyConstraint) {
        let id = value.id();
        if value.is_null() || !id.is_valid() {
            self.bind(&Value::Null);
        } else {
            self.bind(&id.to_value());
        }
    }

    fn act_weak_ptr<C: Dbo>(&mut self, _value: &mut WeakPtr<C>, _join_name: &str) {}

    fn act_collection<C: Dbo>(
        &mut self,
        value: &mut Collection<Ptr<C>>,
        _relation: RelationType,
        _join_name: &str,
        _join_id: &str,
        _fk: ForeignKeyConstraint,
    ) {
        self.relations.push(Box::new(value.clone()));
    }
}

fn stale<C: Dbo>(info: &MappingInfo, meta: &MetaDbo<C>) -> Error {
    Error::StaleObject(StaleObjectError {
        table: info.table.clone(),
        id: meta.id().to_string(),
        version: meta.version(),
    })
}

fn borrowed() -> Error {
    Error::usage("cannot flush an object that is borrowed")
}

/// Record `meta` in the transaction's object list, once.
fn add_to_transaction<C: Dbo>(session: &SessionImpl, meta: &MetaDbo<C>) -> Result<()> {
    if meta.has_flag(flags::IN_TX) {
        return Ok(());
    }
    if let Some(rc) = meta.rc() {
        session.transaction_add(rc)?;
        meta.set_flag(flags::IN_TX);
    }
    Ok(())
}

/// Write pending changes of one object.
pub(crate) fn flush_object<C: Dbo>(meta: &MetaDbo<C>) -> Result<()> {
    if meta.has_flag(flags::NEEDS_DELETE) {
        meta.clear_flag(flags::NEEDS_DELETE);
        if let Err(err) = delete_object(meta) {
            meta.set_flag(flags::NEEDS_DELETE);
            return Err(err);
        }
    } else if meta.has_flag(flags::NEEDS_SAVE) && !meta.has_flag(flags::SAVING) {
        meta.clear_flag(flags::NEEDS_SAVE);
        meta.set_flag(flags::SAVING);
        let result = save_object(meta);
        meta.clear_flag(flags::SAVING);
        if let Err(err) = result {
            meta.set_flag(flags::NEEDS_SAVE);
            return Err(err);
        }
    }
    Ok(())
}

fn save_object<C: Dbo>(meta: &MetaDbo<C>) -> Result<()> {
    let session = meta.session_impl()?;
    let mapping = session.mapping::<C>()?;
    let info = mapping.info(&session)?;
    let resolved = mapping::resolved(&session, &info)?;
    meta.ensure_loaded()?;

    // dependencies
    let targets = {
        let mut slot = meta.obj.try_borrow_mut().map_err(|_| borrowed())?;
        let Some(obj) = slot.as_mut() else {
            return Ok(());
        };
        let mut deps = Dependencies {
            session: &session,
            targets: Vec::new(),
            error: None,
        };
        obj.persist(&mut deps);
        if let Some(err) = deps.error {
            return Err(err);
        }
        deps.targets
    };
    for target in targets {
        if !target.is_saving() {
            target.flush()?;
        }
    }

    // self
    let is_insert = meta.has_flag(flags::DELETED_IN_TX)
        || !meta.has_flag(flags::PERSISTED | flags::SAVED_IN_TX);
    let sql = &resolved.statements[if is_insert { SQL_INSERT } else { SQL_UPDATE }];
    let mut statement = session.statement(sql)?;

    let mut column = 0;
    if info.version.is_some() {
        statement.bind(0, &Value::Int(meta.version() + 1))?;
        column = 1;
    }

    let (natural_id, relations, column) = {
        let mut slot = meta.obj.try_borrow_mut().map_err(|_| borrowed())?;
        let Some(obj) = slot.as_mut() else {
            return Ok(());
        };
        let mut bind = BindFields {
            statement: &mut *statement,
            column,
            natural_id: None,
            relations: Vec::new(),
            error: None,
        };
        obj.persist(&mut bind);
        if let Some(err) = bind.error {
            return Err(err);
        }
        (bind.natural_id, bind.relations, bind.column)
    };

    if !is_insert {
        statement.bind(column, &meta.id_value())?;
        if info.version.is_some() {
            let saved = i32::from(meta.has_flag(flags::SAVED_IN_TX));
            statement.bind(column + 1, &Value::Int(meta.version() + saved))?;
        }
    }

    tracing::trace!(sql = %sql, "Executing");
    statement.execute()?;

    if is_insert {
        let id = if info.id.surrogate {
            let key = statement.inserted_id();
            C::Id::from_generated(key)
                .ok_or_else(|| Error::usage(format!("generated id {key} does not fit the id type")))?
        } else {
            let natural = natural_id.ok_or_else(|| Error::usage("natural id was not bound"))?;
            C::Id::from_value(&natural)?
        };
        meta.set_id(id);
        meta.register(&session);
        tracing::debug!(table = %info.table, id = %meta.id(), "Inserted object");
    } else {
        if info.version.is_some() && statement.affected_row_count() != 1 {
            return Err(stale(&info, meta));
        }
        if let Some(natural) = natural_id {
            let id = C::Id::from_value(&natural)?;
            if id != meta.id() {
                meta.unregister(&session);
                meta.set_id(id);
                meta.register(&session);
            }
        }
        tracing::debug!(table = %info.table, id = %meta.id(), "Updated object");
    }
    drop(statement);

    meta.clear_flag(flags::DELETED_IN_TX);
    meta.set_flag(flags::SAVED_IN_TX);
    add_to_transaction(&session, meta)?;

    // sets
    let owner_id = meta.id_value();
    for relation in relations {
        relation.flush_relation(&session, &owner_id)?;
    }
    Ok(())
}

fn delete_object<C: Dbo>(meta: &MetaDbo<C>) -> Result<()> {
    let session = meta.session_impl()?;
    let mapping = session.mapping::<C>()?;
    let info = mapping.info(&session)?;
    let resolved = mapping::resolved(&session, &info)?;
    let id = meta.id_value();

    for relation in &resolved.relations {
        if relation.set.relation != RelationType::ManyToMany {
            continue;
        }
        let sql = format!(
            "delete from {} where {} = ?",
            quote_table(&relation.set.join_name),
            quote_ident(&relation.set.join_self_id)
        );
        let mut statement = session.statement(&sql)?;
        statement.bind(0, &id)?;
        tracing::trace!(sql = %sql, "Executing");
        statement.execute()?;
    }

    let versioned = info.version.is_some() && meta.is_loaded();
    let sql = &resolved.statements[if versioned {
        SQL_DELETE_VERSIONED
    } else {
        SQL_DELETE
    }];
    let mut statement = session.statement(sql)?;
    statement.bind(0, &id)?;
    if versioned {
        let saved = i32::from(meta.has_flag(flags::SAVED_IN_TX));
        statement.bind(1, &Value::Int(meta.version() + saved))?;
    }
    tracing::trace!(sql = %sql, "Executing");
    statement.execute()?;
    if versioned && statement.affected_row_count() != 1 {
        return Err(stale(&info, meta));
    }
    drop(statement);

    meta.set_flag(flags::DELETED_IN_TX);
    meta.unregister(&session);
    add_to_transaction(&session, meta)?;
    tracing::debug!(table = %info.table, id = %meta.id(), "Deleted object");
    Ok(())
}

// ============================================================================
// Transaction end
// ============================================================================

struct TransactionDone {
    success: bool,
}

impl Action for TransactionDone {
    fn act_field<T: SqlValue>(&mut self, _value: &mut T, _name: &str, _size: i32) {}

    fn act_id<T: DboId>(&mut self, _value: &mut T, _name: &str, _size: i32) {}

    fn act_ptr<C: Dbo>(&mut self, _value: &mut Ptr<C>, _name: &str, _fk: ForeignKeyConstraint) {}

    fn act_weak_ptr<C: Dbo>(&mut self, _value: &mut WeakPtr<C>, _join_name: &str) {}

    fn act_collection<C: Dbo>(
        &mut self,
        value: &mut Collection<Ptr<C>>,
        _relation: RelationType,
        _join_name: &str,
        _join_id: &str,
        _fk: ForeignKeyConstraint,
    ) {
        value.transaction_done(self.success);
    }
}

pub(crate) fn relations_transaction_done<C: Dbo>(obj: &mut C, success: bool) {
    obj.persist(&mut TransactionDone { success });
}

// ============================================================================
// Generic field access
// ============================================================================

/// Collects the data column values of an object; a `belongs_to` is its
/// target's id.
struct ToValues<'a> {
    out: &'a mut Vec<Value>,
}

impl Action for ToValues<'_> {
    fn act_field<T: SqlValue>(&mut self, value: &mut T, _name: &str, _size: i32) {
        self.out.push(value.to_value());
    }

    fn act_id<T: DboId>(&mut self, _value: &mut T, _name: &str, _size: i32) {}

    fn act_ptr<C: Dbo>(&mut self, value: &mut Ptr<C>, _name: &str, _fk: ForeignKeyConstraint) {
        if value.is_null() {
            self.out.push(Value::Null);
        } else {
            self.out.push(value.id().to_value());
        }
    }

    fn act_weak_ptr<C: Dbo>(&mut self, _value: &mut WeakPtr<C>, _join_name: &str) {}

    fn act_collection<C: Dbo>(
        &mut self,
        _value: &mut Collection<Ptr<C>>,
        _relation: RelationType,
        _join_name: &str,
        _join_id: &str,
        _fk: ForeignKeyConstraint,
    ) {
    }
}

pub(crate) fn object_values<C: Dbo>(obj: &mut C, out: &mut Vec<Value>) {
    obj.persist(&mut ToValues { out });
}

/// Sets the data column with the given index.
struct SetField<'a> {
    target: usize,
    current: usize,
    value: &'a Value,
    done: bool,
    error: Option<Error>,
}

impl Action for SetField<'_> {
    fn act_field<T: SqlValue>(&mut self, value: &mut T, name: &str, _size: i32) {
        if self.current == self.target {
            match T::from_value(self.value) {
                Ok(v) => *value = v,
                Err(err) => {
                    tracing::debug!(field = name, "Value does not convert to field type");
                    self.error = Some(err);
                }
            }
            self.done = true;
        }
        self.current += 1;
    }

    fn act_id<T: DboId>(&mut self, _value: &mut T, _name: &str, _size: i32) {}

    fn act_ptr<C: Dbo>(&mut self, _value: &mut Ptr<C>, name: &str, _fk: ForeignKeyConstraint) {
        if self.current == self.target {
            self.error = Some(Error::usage(format!(
                "foreign key '{name}' cannot be set through a value"
            )));
            self.done = true;
        }
        self.current += 1;
    }

    fn act_weak_ptr<C: Dbo>(&mut self, _value: &mut WeakPtr<C>, _join_name: &str) {}

    fn act_collection<C: Dbo>(
        &mut self,
        _value: &mut Collection<Ptr<C>>,
        _relation: RelationType,
        _join_name: &str,
        _join_id: &str,
        _fk: ForeignKeyConstraint,
    ) {
    }
}

pub(crate) fn set_object_value<C: Dbo>(obj: &mut C, index: usize, value: &Value) -> Result<()> {
    let mut action = SetField {
        target: index,
        current: 0,
        value,
        done: false,
        error: None,
    };
    obj.persist(&mut action);
    if let Some(err) = action.error {
        return Err(err);
    }
    if !action.done {
        return Err(Error::usage(format!("column index {index} out of range")));
    }
    Ok(())
}

// ============================================================================
// Reciprocal pointer
// ============================================================================

/// Points the `belongs_to` named `join_name` of a many-to-one child at its
/// new owner, or clears it.
struct SetReciprocal<'a> {
    join_name: &'a str,
    owner_table: &'a str,
    owner: &'a Rc<dyn MetaDboBase>,
    attach: bool,
    found: bool,
}

impl Action for SetReciprocal<'_> {
    fn act_field<T: SqlValue>(&mut self, _value: &mut T, _name: &str, _size: i32) {}

    fn act_id<T: DboId>(&mut self, _value: &mut T, _name: &str, _size: i32) {}

    fn act_ptr<C: Dbo>(&mut self, value: &mut Ptr<C>, name: &str, _fk: ForeignKeyConstraint) {
        if self.found {
            return;
        }
        let name = if name.is_empty() {
            bare_table_name(self.owner_table)
        } else {
            name
        };
        if name != self.join_name {
            return;
        }
        let Ok(owner) = self.owner.clone().into_any().downcast::<MetaDbo<C>>() else {
            return;
        };
        self.found = true;
        *value = if self.attach {
            Ptr::from_meta(owner)
        } else {
            Ptr::null()
        };
    }

    fn act_weak_ptr<C: Dbo>(&mut self, _value: &mut WeakPtr<C>, _join_name: &str) {}

    fn act_collection<C: Dbo>(
        &mut self,
        _value: &mut Collection<Ptr<C>>,
        _relation: RelationType,
        _join_name: &str,
        _join_id: &str,
        _fk: ForeignKeyConstraint,
    ) {
    }
}

pub(crate) fn set_reciprocal<C: Dbo>(
    item: &Ptr<C>,
    join_name: &str,
    owner_table: &str,
    owner: &Rc<dyn MetaDboBase>,
    attach: bool,
) -> Result<()> {
    let mut obj = item.modify()?;
    let mut action = SetReciprocal {
        join_name,
        owner_table,
        owner,
        attach,
        found: false,
    };
    obj.persist(&mut action);
    if !action.found {
        return Err(Error::usage(format!(
            "no belongs_to named '{join_name}' refers to '{owner_table}'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use crate::{ObjectState, Session};
    use dbo_core::Error;

    fn one_author(session: &Session) -> Ptr<Author> {
        session
            .add_new(Author {
                name: "Ann".into(),
                age: 7,
                ..Author::default()
            })
            .unwrap()
    }

    #[test]
    fn belongs_to_target_is_added_and_saved_first() {
        let session = session();
        let tx = session.begin().unwrap();
        let author = Ptr::new(Author {
            name: "Cascade".into(),
            ..Author::default()
        });
        let book = session
            .add_new(Book {
                title: "T".into(),
                author: author.clone(),
                ..Book::default()
            })
            .unwrap();
        assert_eq!(author.state(), ObjectState::New);
        book.flush().unwrap();
        assert!(author.id() > 0);
        assert!(book.id() > 0);
        tx.commit().unwrap();
    }

    #[test]
    fn concurrent_update_is_stale() {
        let session = session();
        let tx = session.begin().unwrap();
        let a = one_author(&session);
        tx.commit().unwrap();

        let tx = session.begin().unwrap();
        session
            .execute("update \"author\" set \"version\" = \"version\" + 1")
            .run()
            .unwrap();
        a.modify().unwrap().age = 8;
        let err = session.flush().unwrap_err();
        assert!(err.is_stale());
        drop(tx);
    }

    #[test]
    fn set_object_value_rejects_foreign_keys() {
        let mut book = Book::default();
        set_object_value(&mut book, 0, &Value::from("x")).unwrap();
        assert_eq!(book.title, "x");
        assert!(matches!(
            set_object_value(&mut book, 1, &Value::Null),
            Err(Error::Usage(_))
        ));
        assert!(matches!(
            set_object_value(&mut book, 2, &Value::Null),
            Err(Error::Usage(_))
        ));
    }

    #[test]
    fn object_values_follow_column_order() {
        let mut book = Book {
            title: "x".into(),
            ..Book::default()
        };
        let mut out = Vec::new();
        object_values(&mut book, &mut out);
        assert_eq!(out, vec![Value::from("x"), Value::Null]);
    }

    #[test]
    fn deleting_removes_join_rows() {
        let session = session();
        let tx = session.begin().unwrap();
        let book = session.add_new(Book::default()).unwrap();
        let tag = session.add_new(Tag::default()).unwrap();
        book.get().unwrap().tags.insert(tag.clone()).unwrap();
        session.flush().unwrap();
        book.remove().unwrap();
        session.flush().unwrap();
        let rows: i64 = session
            .query::<i64>("select count(1) from \"book_tag\"")
            .result_value()
            .unwrap();
        assert_eq!(rows, 0);
        tx.commit().unwrap();
    }
}
