//! Class-to-table mappings.
//!
//! A [`Mapping`] is registered per class by `Session::map_class`. Its
//! [`MappingInfo`] (columns and relations) is collected on first use by
//! running [`InitSchema`] over a default instance, so every class can be
//! mapped before any of them is inspected. The prepared SQL of a mapping
//! needs the other side of each relation and is built in a second, lazy
//! step ([`resolved`]).

use crate::identity_map::IdentityMap;
use crate::persist::{Action, Dbo, DboId};
use crate::ptr::{MetaDbo, Ptr, WeakPtr, flags};
use crate::collection::Collection;
use crate::{SessionImpl, db_action};
use dbo_core::error::{SchemaError, SchemaErrorKind};
use dbo_core::{
    Error, FieldFlags, FieldInfo, ForeignKeyConstraint, FromValue, ObjectNotFoundError,
    RelationType, Result, SetInfo, SqlStatement, SqlType, SqlValue, bare_table_name, quote_ident,
    quote_table,
};
use std::cell::{OnceCell, RefCell};
use std::rc::Rc;

pub(crate) const SQL_INSERT: usize = 0;
pub(crate) const SQL_UPDATE: usize = 1;
pub(crate) const SQL_DELETE: usize = 2;
pub(crate) const SQL_DELETE_VERSIONED: usize = 3;
pub(crate) const SQL_SELECT_BY_ID: usize = 4;
pub(crate) const FIRST_SQL_SELECT_SET: usize = 5;

/// The identity column of a mapped table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IdColumn {
    pub name: String,
    pub sql_type: SqlType,
    pub size: i32,
    /// Auto-generated by the database rather than set by the application.
    pub surrogate: bool,
}

impl IdColumn {
    fn field(&self) -> FieldInfo {
        let flag = if self.surrogate {
            FieldFlags::SURROGATE_ID
        } else {
            FieldFlags::NATURAL_ID
        };
        FieldInfo::new(self.name.clone(), self.sql_type, self.size).with_flags(flag)
    }
}

/// Columns and relations of a mapped class.
#[derive(Debug)]
pub(crate) struct MappingInfo {
    pub table: String,
    pub id: IdColumn,
    pub version: Option<String>,
    /// Every stored column in declaration order, including a natural id
    /// and foreign keys.
    pub fields: Vec<FieldInfo>,
    pub sets: Vec<SetInfo>,
    resolved: OnceCell<Resolved>,
}

/// SQL for one relation of a mapping.
#[derive(Debug, Clone)]
pub(crate) struct RelationSql {
    pub set: SetInfo,
    /// Table expression of the related rows.
    pub from: String,
    /// Condition selecting the rows related to one owner; binds the owner id.
    pub condition: String,
    pub select: String,
    pub join_insert: Option<String>,
    pub join_delete: Option<String>,
}

#[derive(Debug)]
pub(crate) struct Resolved {
    pub statements: Vec<String>,
    pub relations: Vec<RelationSql>,
}

impl MappingInfo {
    /// Stored columns other than a natural id, in the order rows are read.
    pub fn data_fields(&self) -> impl Iterator<Item = &FieldInfo> {
        self.fields.iter().filter(|f| !f.is_natural_id())
    }

    /// Columns a query reads for one object: id, version, data fields.
    pub fn column_count(&self) -> usize {
        1 + usize::from(self.version.is_some()) + self.data_fields().count()
    }

    pub fn select_fields(&self, qualifier: &str) -> Vec<FieldInfo> {
        let mut fields = vec![self.id.field().with_qualifier(qualifier)];
        if let Some(version) = &self.version {
            fields.push(
                FieldInfo::new(version.clone(), SqlType::Integer, 0)
                    .with_flags(FieldFlags::VERSION)
                    .with_qualifier(qualifier),
            );
        }
        fields.extend(self.data_fields().map(|f| f.clone().with_qualifier(qualifier)));
        fields
    }

    /// `"table"."id" = ?`
    pub fn id_condition(&self, qualifier: &str) -> String {
        format!("{}.{} = ?", quote_table(qualifier), quote_ident(&self.id.name))
    }
}

/// The per-class half of the mapping registry.
pub(crate) trait MappingBase {
    fn table_name(&self) -> &str;
    fn id_column(&self) -> &IdColumn;
    fn info(&self, session: &SessionImpl) -> Result<Rc<MappingInfo>>;
    fn reread_all(&self);
    fn live_count(&self) -> usize;
}

pub(crate) struct Mapping<C: Dbo> {
    table: String,
    id: IdColumn,
    info: RefCell<Option<Rc<MappingInfo>>>,
    registry: IdentityMap<C>,
}

impl<C: Dbo> Mapping<C> {
    pub(crate) fn new(table: &str) -> Result<Self> {
        let mut probe = IdProbe::default();
        C::default().persist(&mut probe);

        let id = match (C::SURROGATE_ID_FIELD, probe.id) {
            (Some(_), Some(natural)) => {
                return Err(Error::usage(format!(
                    "table '{table}' declares natural id '{}' but also a surrogate id",
                    natural.name
                )));
            }
            (None, None) => {
                return Err(Error::usage(format!(
                    "table '{table}' has neither a surrogate nor a natural id"
                )));
            }
            (Some(name), None) => {
                if C::Id::from_generated(1).is_none() {
                    return Err(Error::usage(format!(
                        "table '{table}' uses a surrogate id with a non-integer id type"
                    )));
                }
                IdColumn {
                    name: name.to_string(),
                    sql_type: SqlType::BigInt,
                    size: 0,
                    surrogate: true,
                }
            }
            (None, Some(natural)) => natural,
        };

        Ok(Self {
            table: table.to_string(),
            id,
            info: RefCell::new(None),
            registry: IdentityMap::new(),
        })
    }

    pub(crate) fn registry(&self) -> &IdentityMap<C> {
        &self.registry
    }

    fn build_info(&self, session: &SessionImpl) -> Result<MappingInfo> {
        let mut action = InitSchema {
            session,
            table: &self.table,
            self_id: &self.id,
            fields: Vec::new(),
            sets: Vec::new(),
            error: None,
        };
        C::default().persist(&mut action);
        if let Some(err) = action.error {
            return Err(err);
        }
        Ok(MappingInfo {
            table: self.table.clone(),
            id: self.id.clone(),
            version: C::VERSION_FIELD.map(str::to_string),
            fields: action.fields,
            sets: action.sets,
            resolved: OnceCell::new(),
        })
    }
}

impl<C: Dbo> MappingBase for Mapping<C> {
    fn table_name(&self) -> &str {
        &self.table
    }

    fn id_column(&self) -> &IdColumn {
        &self.id
    }

    fn info(&self, session: &SessionImpl) -> Result<Rc<MappingInfo>> {
        if let Some(info) = self.info.borrow().as_ref() {
            return Ok(info.clone());
        }
        let info = Rc::new(self.build_info(session)?);
        *self.info.borrow_mut() = Some(info.clone());
        Ok(info)
    }

    fn reread_all(&self) {
        for meta in self.registry.live() {
            meta.discard_changes_if_persisted();
        }
    }

    fn live_count(&self) -> usize {
        self.registry.live_count()
    }
}

impl<C: Dbo> MetaDbo<C> {
    fn discard_changes_if_persisted(&self) {
        use crate::ptr::MetaDboBase;
        if self.has_flag(flags::PERSISTED | flags::SAVED_IN_TX) {
            self.discard_changes();
        }
    }
}

// ============================================================================
// Schema collection
// ============================================================================

/// Finds the natural id of a class without looking at anything else.
#[derive(Default)]
struct IdProbe {
    id: Option<IdColumn>,
}

impl Action for IdProbe {
    fn act_field<T: SqlValue>(&mut self, _value: &mut T, _name: &str, _size: i32) {}

    fn act_id<T: DboId>(&mut self, _value: &mut T, name: &str, size: i32) {
        if self.id.is_none() {
            self.id = Some(IdColumn {
                name: name.to_string(),
                sql_type: T::SQL_TYPE,
                size,
                surrogate: false,
            });
        }
    }

    fn act_ptr<D: Dbo>(&mut self, _value: &mut Ptr<D>, _name: &str, _fk: ForeignKeyConstraint) {}

    fn act_weak_ptr<D: Dbo>(&mut self, _value: &mut WeakPtr<D>, _join_name: &str) {}

    fn act_collection<D: Dbo>(
        &mut self,
        _value: &mut Collection<Ptr<D>>,
        _relation: RelationType,
        _join_name: &str,
        _join_id: &str,
        _fk: ForeignKeyConstraint,
    ) {
    }
}

/// Collects the columns and relations of a class.
struct InitSchema<'a> {
    session: &'a SessionImpl,
    table: &'a str,
    self_id: &'a IdColumn,
    fields: Vec<FieldInfo>,
    sets: Vec<SetInfo>,
    error: Option<Error>,
}

impl InitSchema<'_> {
    fn other<D: Dbo>(&mut self) -> Option<(String, IdColumn)> {
        match self.session.mapping::<D>() {
            Ok(mapping) => Some((mapping.table_name().to_string(), mapping.id_column().clone())),
            Err(err) => {
                self.error.get_or_insert(err);
                None
            }
        }
    }
}

/// Column name in a join table: `<join_id>_<id>`, `<table>_<id>` by default,
/// or `join_id` itself when it starts with `>`.
fn join_column(join_id: &str, table: &str, id: &IdColumn) -> String {
    if let Some(literal) = join_id.strip_prefix('>') {
        literal.to_string()
    } else if join_id.is_empty() {
        format!("{}_{}", bare_table_name(table), id.name)
    } else {
        format!("{}_{}", join_id, id.name)
    }
}

impl Action for InitSchema<'_> {
    fn act_field<T: SqlValue>(&mut self, _value: &mut T, name: &str, size: i32) {
        let mut info = FieldInfo::new(name, T::SQL_TYPE, size);
        info.nullable = T::NULLABLE;
        self.fields.push(info);
    }

    fn act_id<T: DboId>(&mut self, _value: &mut T, name: &str, size: i32) {
        let info = FieldInfo::new(name, T::SQL_TYPE, size).with_flags(FieldFlags::NATURAL_ID);
        self.fields.push(info);
    }

    fn act_ptr<D: Dbo>(&mut self, _value: &mut Ptr<D>, name: &str, fk: ForeignKeyConstraint) {
        let Some((other_table, other_id)) = self.other::<D>() else {
            return;
        };
        let name = if name.is_empty() {
            bare_table_name(&other_table).to_string()
        } else {
            name.to_string()
        };
        let column = match name.strip_prefix('>') {
            Some(literal) => literal.to_string(),
            None => format!("{}_{}", name, other_id.name),
        };
        let mut info =
            FieldInfo::new(column, other_id.sql_type, other_id.size).with_flags(FieldFlags::FOREIGN_KEY);
        info.nullable = !fk.contains(ForeignKeyConstraint::NOT_NULL);
        info.foreign_key_table = other_table;
        info.foreign_key_name = name;
        info.fk_constraints = fk;
        self.fields.push(info);
    }

    fn act_weak_ptr<D: Dbo>(&mut self, _value: &mut WeakPtr<D>, join_name: &str) {
        let Some((other_table, _)) = self.other::<D>() else {
            return;
        };
        let join_name = if join_name.is_empty() {
            bare_table_name(self.table)
        } else {
            join_name
        };
        let mut set = SetInfo::new(
            other_table,
            RelationType::ManyToOne,
            join_name,
            "",
            ForeignKeyConstraint::NONE,
        );
        set.weak = true;
        self.sets.push(set);
    }

    fn act_collection<D: Dbo>(
        &mut self,
        _value: &mut Collection<Ptr<D>>,
        relation: RelationType,
        join_name: &str,
        join_id: &str,
        fk: ForeignKeyConstraint,
    ) {
        let Some((other_table, _)) = self.other::<D>() else {
            return;
        };
        let set = match relation {
            RelationType::ManyToOne => {
                let join_name = if join_name.is_empty() {
                    bare_table_name(self.table)
                } else {
                    join_name
                };
                SetInfo::new(other_table, relation, join_name, "", fk)
            }
            RelationType::ManyToMany => {
                let join_table = if join_name.is_empty() {
                    let mut names = [bare_table_name(self.table), bare_table_name(&other_table)];
                    names.sort_unstable();
                    names.join("_")
                } else {
                    join_name.to_string()
                };
                let self_column = join_column(join_id, self.table, self.self_id);
                SetInfo::new(other_table, relation, join_table, self_column, fk)
            }
        };
        self.sets.push(set);
    }
}

// ============================================================================
// Statements
// ============================================================================

fn invalid_mapping(message: String) -> Error {
    Error::Schema(SchemaError {
        kind: SchemaErrorKind::Invalid,
        sql: None,
        message,
        source: None,
    })
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

/// The prepared SQL of `info`, built on first use.
pub(crate) fn resolved<'a>(session: &SessionImpl, info: &'a MappingInfo) -> Result<&'a Resolved> {
    if let Some(resolved) = info.resolved.get() {
        return Ok(resolved);
    }
    let built = build_resolved(session, info)?;
    Ok(info.resolved.get_or_init(|| built))
}

fn build_resolved(session: &SessionImpl, info: &MappingInfo) -> Result<Resolved> {
    let dialect = session.dialect()?;
    let table = quote_table(&info.table);
    let id_column = quote_ident(&info.id.name);
    let mut statements = Vec::with_capacity(FIRST_SQL_SELECT_SET + info.sets.len());

    let mut columns: Vec<String> = info.version.iter().map(|v| quote_ident(v)).collect();
    columns.extend(info.fields.iter().map(|f| quote_ident(&f.name)));

    let mut insert = if columns.is_empty() {
        format!("insert into {table} default values")
    } else {
        format!(
            "insert into {table} ({}) values ({})",
            columns.join(", "),
            placeholders(columns.len())
        )
    };
    if info.id.surrogate {
        insert.push_str(&dialect.autoincrement_insert_suffix(&info.id.name));
    }
    statements.push(insert);

    let mut assignments: Vec<String> = columns.iter().map(|c| format!("{c} = ?")).collect();
    if assignments.is_empty() {
        assignments.push(format!("{id_column} = {id_column}"));
    }
    let version_check = info
        .version
        .as_ref()
        .map(|v| format!(" and {} = ?", quote_ident(v)))
        .unwrap_or_default();
    statements.push(format!(
        "update {table} set {} where {id_column} = ?{version_check}",
        assignments.join(", ")
    ));

    let delete = format!("delete from {table} where {id_column} = ?");
    statements.push(delete.clone());
    statements.push(format!("{delete}{version_check}"));

    let mut selected: Vec<String> = info.version.iter().map(|v| quote_ident(v)).collect();
    selected.extend(info.data_fields().map(|f| quote_ident(&f.name)));
    let select_list = if selected.is_empty() {
        "1".to_string()
    } else {
        selected.join(", ")
    };
    statements.push(format!(
        "select {select_list} from {table} where {id_column} = ?"
    ));

    let mut relations = Vec::with_capacity(info.sets.len());
    for set in &info.sets {
        let other = session.mapping_by_table(&set.table_name)?;
        let other_info = other.info(session)?;
        let other_table = quote_table(&other_info.table);
        let select_list = other_info
            .select_fields(&other_info.table)
            .iter()
            .map(FieldInfo::sql)
            .collect::<Vec<_>>()
            .join(", ");

        let relation = match set.relation {
            RelationType::ManyToOne => {
                let fk = other_info
                    .fields
                    .iter()
                    .find(|f| {
                        f.is_foreign_key()
                            && f.foreign_key_name == set.join_name
                            && f.foreign_key_table == info.table
                    })
                    .ok_or_else(|| {
                        invalid_mapping(format!(
                            "relation of '{}' expects a belongs_to named '{}' in '{}'",
                            info.table, set.join_name, other_info.table
                        ))
                    })?;
                let condition = format!("{other_table}.{} = ?", quote_ident(&fk.name));
                let select = format!("select {select_list} from {other_table} where {condition}");
                statements.push(select.clone());
                RelationSql {
                    set: set.clone(),
                    from: other_table,
                    condition,
                    select,
                    join_insert: None,
                    join_delete: None,
                }
            }
            RelationType::ManyToMany => {
                let same_table = other_info.table == info.table;
                let counterpart = other_info
                    .sets
                    .iter()
                    .find(|s| {
                        s.relation == RelationType::ManyToMany
                            && s.join_name == set.join_name
                            && (!same_table || s.join_self_id != set.join_self_id)
                    })
                    .ok_or_else(|| {
                        invalid_mapping(format!(
                            "join table '{}' of '{}' has no matching relation in '{}'",
                            set.join_name, info.table, other_info.table
                        ))
                    })?;
                let mut set = set.clone();
                set.join_other_id.clone_from(&counterpart.join_self_id);
                set.other_fk_constraints = counterpart.fk_constraints;

                let join_table = quote_table(&set.join_name);
                let self_column = quote_ident(&set.join_self_id);
                let other_column = quote_ident(&set.join_other_id);
                let from = format!(
                    "{other_table} join {join_table} on {join_table}.{other_column} = {other_table}.{}",
                    quote_ident(&other_info.id.name)
                );
                let condition = format!("{join_table}.{self_column} = ?");
                let select = format!("select {select_list} from {from} where {condition}");
                let join_insert = format!(
                    "insert into {join_table} ({self_column}, {other_column}) values (?, ?)"
                );
                let join_delete = format!(
                    "delete from {join_table} where {self_column} = ? and {other_column} = ?"
                );
                statements.push(select.clone());
                statements.push(join_insert.clone());
                statements.push(join_delete.clone());
                RelationSql {
                    set,
                    from,
                    condition,
                    select,
                    join_insert: Some(join_insert),
                    join_delete: Some(join_delete),
                }
            }
        };
        relations.push(relation);
    }

    Ok(Resolved {
        statements,
        relations,
    })
}

// ============================================================================
// Loading
// ============================================================================

/// Read version and fields of one object from `statement` into `meta`.
fn load_columns<C: Dbo>(
    session: &Rc<SessionImpl>,
    info: &MappingInfo,
    meta: &MetaDbo<C>,
    statement: &dyn SqlStatement,
    column: &mut usize,
) -> Result<()> {
    if info.version.is_some() {
        let version = i32::from_value(&statement.get_result(*column)?)?;
        *column += 1;
        meta.set_version(version);
    }

    let mut obj = C::default();
    *column = db_action::load_object(session, statement, *column, meta.id(), &mut obj)?;
    if let Some(owner) = meta.rc() {
        db_action::bind_relations(session, info, &owner, &mut obj)?;
    }

    let mut slot = meta
        .obj
        .try_borrow_mut()
        .map_err(|_| Error::usage("cannot load an object that is borrowed"))?;
    *slot = Some(obj);
    Ok(())
}

/// Load the row of a resident object by its id.
pub(crate) fn load_into<C: Dbo>(session: &Rc<SessionImpl>, meta: &MetaDbo<C>) -> Result<()> {
    let mapping = session.mapping::<C>()?;
    let info = mapping.info(session)?;
    let sql = &resolved(session, &info)?.statements[SQL_SELECT_BY_ID];

    let mut statement = session.statement(sql)?;
    statement.bind(0, &meta.id().to_value())?;
    statement.execute()?;
    if !statement.next_row()? {
        return Err(Error::ObjectNotFound(ObjectNotFoundError {
            table: info.table.clone(),
            id: meta.id().to_string(),
        }));
    }
    let mut column = 0;
    load_columns(session, &info, meta, &*statement, &mut column)?;
    tracing::trace!(table = %info.table, id = %meta.id(), "Loaded object");
    Ok(())
}

/// Read one object from the current row, starting at `column`.
///
/// A NULL id (an outer join without a match) yields a null pointer.
pub(crate) fn load_row<C: Dbo>(
    session: &Rc<SessionImpl>,
    statement: &dyn SqlStatement,
    column: &mut usize,
) -> Result<Ptr<C>> {
    let mapping = session.mapping::<C>()?;
    let info = mapping.info(session)?;

    let raw = statement.get_result(*column)?;
    if raw.is_null() {
        *column += info.column_count();
        return Ok(Ptr::null());
    }
    *column += 1;
    let id = C::Id::from_value(&raw)?;

    if let Some(meta) = mapping.registry().get(&id) {
        if meta.is_loaded() {
            *column += info.column_count() - 1;
        } else {
            load_columns(session, &info, &meta, statement, column)?;
        }
        return Ok(Ptr::from_meta(meta));
    }

    let meta = MetaDbo::new_persisted(session.weak(), id.clone());
    load_columns(session, &info, &meta, statement, column)?;
    mapping.registry().insert(id, &meta);
    Ok(Ptr::from_meta(meta))
}

pub(crate) fn load_lazy<C: Dbo>(session: &Rc<SessionImpl>, id: C::Id) -> Result<Ptr<C>> {
    let mapping = session.mapping::<C>()?;
    if let Some(meta) = mapping.registry().get(&id) {
        return Ok(Ptr::from_meta(meta));
    }
    let meta = MetaDbo::new_persisted(session.weak(), id.clone());
    mapping.registry().insert(id, &meta);
    Ok(Ptr::from_meta(meta))
}

pub(crate) fn load<C: Dbo>(session: &Rc<SessionImpl>, id: C::Id, force: bool) -> Result<Ptr<C>> {
    let ptr = load_lazy::<C>(session, id)?;
    let Some(meta) = ptr.meta() else {
        return Ok(ptr);
    };
    if force {
        meta.discard_changes_if_persisted();
    }
    if !meta.is_loaded() {
        if let Err(err) = load_into(session, meta) {
            if err.is_not_found() {
                session.mapping::<C>()?.registry().remove(&meta.id(), meta);
            }
            return Err(err);
        }
    }
    Ok(ptr)
}
