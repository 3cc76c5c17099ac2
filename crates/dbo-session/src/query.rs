//! Queries and statements.
//!
//! A [`Query`] is either a `find` over one mapped class or a raw SQL select
//! whose select list matches the result type. Clauses are appended with the
//! builder methods and parameters are bound in the order their `?`
//! placeholders appear.
//!
//! Two binding strategies exist:
//!
//! - [`DynamicBinding`] (the default) keeps parameters in the query, so the
//!   query can be modified, cloned and run any number of times.
//! - [`DirectBinding`] prepares the statement up front and binds parameters
//!   straight into it. The result list can be taken once per
//!   [`reset`](Query::reset).

use crate::collection::Collection;
use crate::mapping::MappingBase;
use crate::persist::Dbo;
use crate::ptr::Ptr;
use crate::query_result::QueryResult;
use crate::sql_parse::{SelectFieldList, parse_sql};
use crate::statement::ScopedStatement;
use crate::{Session, SessionImpl};
use dbo_core::{Dialect, Error, FieldInfo, LimitQuery, Result, Value, quote_table};
use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;

mod sealed {
    pub trait Sealed {}
}

/// How a query binds its parameters.
pub trait Binding: sealed::Sealed + 'static {}

/// Parameters are stored with the query and bound when it runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct DynamicBinding;

/// Parameters are bound directly into a statement prepared once.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectBinding;

impl sealed::Sealed for DynamicBinding {}
impl sealed::Sealed for DirectBinding {}
impl Binding for DynamicBinding {}
impl Binding for DirectBinding {}

#[derive(Debug, Clone)]
enum Source {
    /// `select <mapped columns> from <from>`.
    Find { from: String },
    /// A raw select.
    Sql(String),
}

enum DirectState {
    Idle,
    Prepared {
        statement: ScopedStatement,
        count: ScopedStatement,
        column: usize,
        sql: String,
    },
    Failed(Error),
    Consumed,
}

/// The SQL a query runs, with the parameters its limit clause adds.
#[derive(Debug)]
struct Built {
    sql: String,
    count_sql: String,
    limit_params: Vec<Value>,
}

/// A database query returning values of `R`.
pub struct Query<R: QueryResult, B: Binding = DynamicBinding> {
    session: Session,
    source: Source,
    /// Set when the query could not be constructed; reported when it runs.
    deferred: Option<String>,
    /// A condition every result must match (a relation's owner).
    base_where: String,
    base_params: Vec<Value>,
    join: String,
    where_: String,
    group_by: String,
    having: String,
    order_by: String,
    limit: i64,
    offset: i64,
    params: Vec<Value>,
    direct: DirectState,
    _marker: PhantomData<fn() -> (R, B)>,
}

impl<R: QueryResult, B: Binding> Query<R, B> {
    fn with_source(session: Session, source: Source) -> Self {
        Self {
            session,
            source,
            deferred: None,
            base_where: String::new(),
            base_params: Vec::new(),
            join: String::new(),
            where_: String::new(),
            group_by: String::new(),
            having: String::new(),
            order_by: String::new(),
            limit: -1,
            offset: -1,
            params: Vec::new(),
            direct: DirectState::Idle,
            _marker: PhantomData,
        }
    }

    /// A query from raw SQL, starting at `select` (or `with`).
    pub(crate) fn sql(session: Session, sql: &str) -> Self {
        Self::with_source(session, Source::Sql(sql.to_string()))
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Describe the columns the query selects.
    pub fn fields(&self) -> Result<Vec<FieldInfo>> {
        if let Some(message) = &self.deferred {
            return Err(Error::usage(message.clone()));
        }
        let mut out = Vec::new();
        match &self.source {
            Source::Find { .. } => R::fields(&self.session, None, &mut out)?,
            Source::Sql(sql) => {
                let lists = parse_sql(sql)?;
                let mut aliases: VecDeque<String> = lists
                    .first()
                    .map(|list| list.iter().map(|f| f.text(sql).to_string()).collect())
                    .unwrap_or_default();
                R::fields(&self.session, Some(&mut aliases), &mut out)?;
                if !aliases.is_empty() {
                    return Err(Error::usage(format!(
                        "query selects {} more column(s) than the result type reads: {sql}",
                        aliases.len()
                    )));
                }
            }
        }
        Ok(out)
    }

    /// The select statement the query runs.
    pub fn select_sql(&self) -> Result<String> {
        let dialect = self.session.inner.dialect()?;
        Ok(self.build(&*dialect)?.sql)
    }

    fn effective_where(&self) -> String {
        match (self.base_where.is_empty(), self.where_.is_empty()) {
            (true, _) => self.where_.clone(),
            (false, true) => self.base_where.clone(),
            (false, false) => format!("{} and ({})", self.base_where, self.where_),
        }
    }

    fn build(&self, dialect: &dyn Dialect) -> Result<Built> {
        let fields = self.fields()?;
        let mut sql = match &self.source {
            Source::Find { from } => {
                let columns: Vec<String> = fields.iter().map(FieldInfo::sql).collect();
                format!("select {} from {from}", columns.join(", "))
            }
            Source::Sql(sql) => substitute_fields(sql, &parse_sql(sql)?, &fields)?,
        };

        sql.push_str(&self.join);
        let where_ = self.effective_where();
        if !where_.is_empty() {
            sql.push_str(" where ");
            sql.push_str(&where_);
        }
        if !self.group_by.is_empty() {
            sql.push_str(" group by ");
            sql.push_str(&expand_group_by(&self.group_by, &fields));
        }
        if !self.having.is_empty() {
            sql.push_str(" having ");
            sql.push_str(&self.having);
        }
        if !self.order_by.is_empty() {
            sql.push_str(" order by ");
            sql.push_str(&self.order_by);
        }

        let limit_params = apply_limit(
            &mut sql,
            dialect.limit_query_method(),
            self.limit,
            self.offset,
            !self.order_by.is_empty(),
        );

        let mut count_sql = format!("select count(1) from ({sql})");
        if dialect.require_subquery_alias() {
            count_sql.push_str(" dbocount");
        }
        Ok(Built {
            sql,
            count_sql,
            limit_params,
        })
    }

    /// Prepare the select and count statements with the base parameters
    /// bound; returns the next parameter position.
    fn prepare(
        &self,
        inner: &SessionImpl,
        built: &Built,
    ) -> Result<(ScopedStatement, ScopedStatement, usize)> {
        let mut statement = inner.statement(&built.sql)?;
        let mut count = inner.statement(&built.count_sql)?;
        for (column, value) in self.base_params.iter().enumerate() {
            statement.bind(column, value)?;
            count.bind(column, value)?;
        }
        Ok((statement, count, self.base_params.len()))
    }
}

impl<C: Dbo, B: Binding> Query<Ptr<C>, B> {
    /// All objects of `C` matching `condition` (empty for all).
    pub(crate) fn find(session: Session, condition: &str) -> Self {
        let (from, deferred) = match session.inner.mapping::<C>() {
            Ok(mapping) => (quote_table(mapping.table_name()), None),
            Err(err) => (String::new(), Some(err.to_string())),
        };
        let mut query = Self::with_source(session, Source::Find { from });
        query.deferred = deferred;
        query.base_where = condition.to_string();
        query
    }
}

impl<C: Dbo> Query<Ptr<C>, DynamicBinding> {
    /// The objects related to one owner: `from` and `condition` of a
    /// relation, with the owner's id bound.
    pub(crate) fn relation(session: Session, from: &str, condition: &str, owner_id: Value) -> Self {
        let mut query = Self::with_source(
            session,
            Source::Find {
                from: from.to_string(),
            },
        );
        query.base_where = condition.to_string();
        query.base_params.push(owner_id);
        query
    }
}

// ============================================================================
// Dynamic binding
// ============================================================================

impl<R: QueryResult> Query<R, DynamicBinding> {
    /// Add a condition, and-ed with earlier ones.
    pub fn where_(mut self, condition: &str) -> Self {
        if !self.where_.is_empty() {
            self.where_.push_str(" and ");
        }
        self.where_.push('(');
        self.where_.push_str(condition);
        self.where_.push(')');
        self
    }

    /// Add a condition, or-ed with all earlier ones.
    pub fn or_where(mut self, condition: &str) -> Self {
        if !self.where_.is_empty() {
            self.where_ = format!("({}) or ", self.where_);
        }
        self.where_.push('(');
        self.where_.push_str(condition);
        self.where_.push(')');
        self
    }

    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    pub fn join(mut self, other: &str) -> Self {
        self.join.push_str(" join ");
        self.join.push_str(other);
        self
    }

    pub fn left_join(mut self, other: &str) -> Self {
        self.join.push_str(" left join ");
        self.join.push_str(other);
        self
    }

    pub fn right_join(mut self, other: &str) -> Self {
        self.join.push_str(" right join ");
        self.join.push_str(other);
        self
    }

    /// Replace the group by clause. A mapped object's alias expands to all
    /// of its columns.
    pub fn group_by(mut self, fields: &str) -> Self {
        self.group_by = fields.to_string();
        self
    }

    pub fn having(mut self, condition: &str) -> Self {
        if !self.having.is_empty() {
            self.having.push_str(" and ");
        }
        self.having.push_str(condition);
        self
    }

    /// Replace the order by clause.
    pub fn order_by(mut self, fields: &str) -> Self {
        self.order_by = fields.to_string();
        self
    }

    /// At most `limit` rows; -1 for no limit.
    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    /// Skip `offset` rows; -1 for none.
    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    pub fn limit_value(&self) -> i64 {
        self.limit
    }

    pub fn offset_value(&self) -> i64 {
        self.offset
    }

    pub fn order_by_value(&self) -> &str {
        &self.order_by
    }

    /// Forget bound parameters.
    pub fn reset(mut self) -> Self {
        self.params.clear();
        self
    }

    /// Run the query. The session is flushed first in auto flush mode.
    pub fn result_list(&self) -> Result<Collection<R>> {
        let inner = &self.session.inner;
        inner.auto_flush()?;
        let dialect = inner.dialect()?;
        let built = self.build(&*dialect)?;
        let (mut statement, mut count, mut column) = self.prepare(inner, &built)?;
        for value in self.params.iter().chain(&built.limit_params) {
            statement.bind(column, value)?;
            count.bind(column, value)?;
            column += 1;
        }
        tracing::debug!(sql = %built.sql, params = column, "Prepared query");
        Ok(Collection::from_query(inner, statement, Some(count), built.sql))
    }

    /// The single result, or `R::default()` when there is none.
    pub fn result_value(&self) -> Result<R> {
        single(self.result_list()?)
    }
}

impl<R: QueryResult> Clone for Query<R, DynamicBinding> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            source: self.source.clone(),
            deferred: self.deferred.clone(),
            base_where: self.base_where.clone(),
            base_params: self.base_params.clone(),
            join: self.join.clone(),
            where_: self.where_.clone(),
            group_by: self.group_by.clone(),
            having: self.having.clone(),
            order_by: self.order_by.clone(),
            limit: self.limit,
            offset: self.offset,
            params: self.params.clone(),
            direct: DirectState::Idle,
            _marker: PhantomData,
        }
    }
}

// ============================================================================
// Direct binding
// ============================================================================

impl<R: QueryResult> Query<R, DirectBinding> {
    fn ensure_prepared(&mut self) {
        if !matches!(self.direct, DirectState::Idle) {
            return;
        }
        self.direct = match self.prepare_direct() {
            Ok(state) => state,
            Err(err) => DirectState::Failed(err),
        };
    }

    fn prepare_direct(&self) -> Result<DirectState> {
        let inner = &self.session.inner;
        inner.auto_flush()?;
        let dialect = inner.dialect()?;
        let built = self.build(&*dialect)?;
        let (statement, count, column) = self.prepare(inner, &built)?;
        tracing::debug!(sql = %built.sql, "Prepared query for direct binding");
        Ok(DirectState::Prepared {
            statement,
            count,
            column,
            sql: built.sql,
        })
    }

    /// Bind the next parameter into the prepared statement.
    ///
    /// A failure to prepare or bind is reported by
    /// [`result_list`](Self::result_list).
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.ensure_prepared();
        let value = value.into();
        if let DirectState::Prepared {
            statement,
            count,
            column,
            ..
        } = &mut self.direct
        {
            let bound = statement
                .bind(*column, &value)
                .and_then(|()| count.bind(*column, &value));
            *column += 1;
            if let Err(err) = bound {
                self.direct = DirectState::Failed(err);
            }
        }
        self
    }

    /// Release the prepared statement so parameters can be bound again.
    pub fn reset(&mut self) {
        self.direct = DirectState::Idle;
    }

    /// Run the query. Can be called once per [`reset`](Self::reset).
    pub fn result_list(&mut self) -> Result<Collection<R>> {
        self.ensure_prepared();
        match std::mem::replace(&mut self.direct, DirectState::Consumed) {
            DirectState::Prepared {
                statement,
                count,
                sql,
                ..
            } => Ok(Collection::from_query(
                &self.session.inner,
                statement,
                Some(count),
                sql,
            )),
            DirectState::Failed(err) => Err(err),
            DirectState::Idle | DirectState::Consumed => Err(Error::usage(
                "result_list() of a directly bound query may be called only once per reset()",
            )),
        }
    }

    pub fn result_value(&mut self) -> Result<R> {
        single(self.result_list()?)
    }
}

impl<R: QueryResult, B: Binding> fmt::Debug for Query<R, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("source", &self.source)
            .field("where", &self.effective_where())
            .field("order_by", &self.order_by)
            .field("limit", &self.limit)
            .field("offset", &self.offset)
            .field("params", &self.params.len())
            .finish_non_exhaustive()
    }
}

fn single<R: QueryResult>(collection: Collection<R>) -> Result<R> {
    let mut rows = collection.iter()?;
    let Some(first) = rows.next().transpose()? else {
        return Ok(R::default());
    };
    if rows.next().transpose()?.is_some() {
        return Err(Error::NoUniqueResult {
            sql: collection.sql().unwrap_or_default(),
        });
    }
    Ok(first)
}

/// Replace each select-list item by the columns it stands for, aliased
/// `col<n>`. A mapped object becomes all of its columns.
fn substitute_fields(sql: &str, lists: &[SelectFieldList], fields: &[FieldInfo]) -> Result<String> {
    let mut out = String::with_capacity(sql.len() * 2);
    let mut last = 0;
    for list in lists {
        let mut index = 0;
        for item in list {
            out.push_str(&sql[last..item.begin]);
            last = item.end;
            let field = fields.get(index).ok_or_else(|| {
                Error::usage(format!(
                    "select list of a compound query does not match the result type: {sql}"
                ))
            })?;

            if field.is_first_dbo_field() {
                let qualifier = &field.qualifier;
                let mut columns = Vec::new();
                while let Some(f) = fields.get(index) {
                    if !columns.is_empty() && (f.is_first_dbo_field() || &f.qualifier != qualifier) {
                        break;
                    }
                    columns.push(format!("{} as col{index}", f.sql()));
                    index += 1;
                }
                out.push_str(&columns.join(", "));
            } else {
                out.push_str(item.text(sql));
                if !field.is_aliased() {
                    out.push_str(&format!(" as col{index}"));
                }
                index += 1;
            }
        }
    }
    out.push_str(&sql[last..]);
    Ok(out)
}

/// Expand group by items naming a mapped object's alias into its columns.
fn expand_group_by(group_by: &str, fields: &[FieldInfo]) -> String {
    group_by
        .split(',')
        .map(str::trim)
        .map(|item| {
            let columns: Vec<String> = fields
                .iter()
                .filter(|f| !f.qualifier.is_empty() && f.qualifier == item)
                .map(FieldInfo::sql)
                .collect();
            if columns.is_empty() {
                item.to_string()
            } else {
                columns.join(", ")
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Append the dialect's limit clause; returns the parameters it binds.
fn apply_limit(
    sql: &mut String,
    method: LimitQuery,
    limit: i64,
    offset: i64,
    ordered: bool,
) -> Vec<Value> {
    let has_limit = limit != -1;
    let has_offset = offset != -1;
    let mut params = Vec::new();
    match method {
        LimitQuery::Limit => {
            if has_limit {
                sql.push_str(" limit ?");
                params.push(Value::BigInt(limit));
            }
            if has_offset {
                if !has_limit {
                    sql.push_str(" limit -1");
                }
                sql.push_str(" offset ?");
                params.push(Value::BigInt(offset));
            }
        }
        LimitQuery::RowsFromTo => {
            if has_limit || has_offset {
                let from = if has_offset { offset + 1 } else { 1 };
                let to = if has_limit { from + limit - 1 } else { 1 << 30 };
                sql.push_str(" rows ? to ?");
                params.push(Value::BigInt(from));
                params.push(Value::BigInt(to));
            }
        }
        LimitQuery::OffsetFetch => {
            if (has_limit || has_offset) && !ordered {
                sql.push_str(" order by (select null)");
            }
            if has_offset {
                sql.push_str(" offset (?) rows");
                params.push(Value::BigInt(offset));
            } else if has_limit || ordered {
                sql.push_str(" offset 0 rows");
            }
            if has_limit {
                sql.push_str(" fetch first (?) rows only");
                params.push(Value::BigInt(limit));
            }
        }
        LimitQuery::Rownum => match (has_limit, has_offset) {
            (true, false) => {
                *sql = format!("select * from ( {sql} ) where rownum <= ?");
                params.push(Value::BigInt(limit));
            }
            (true, true) => {
                *sql = format!(
                    "select * from ( select row_.*, rownum rownum2 from ( {sql} ) row_ \
                     where rownum <= ?) where rownum2 > ?"
                );
                params.push(Value::BigInt(offset + limit));
                params.push(Value::BigInt(offset));
            }
            (false, true) => {
                *sql = format!(
                    "select * from ( select row_.*, rownum rownum2 from ( {sql} ) row_ ) \
                     where rownum2 > ?"
                );
                params.push(Value::BigInt(offset));
            }
            (false, false) => {}
        },
        LimitQuery::NotSupported => {}
    }
    params
}

// ============================================================================
// Call
// ============================================================================

/// A statement that returns no rows.
#[must_use = "a call does nothing until run()"]
pub struct Call {
    session: Session,
    sql: String,
    params: Vec<Value>,
}

impl Call {
    pub(crate) fn new(session: Session, sql: &str) -> Self {
        Self {
            session,
            sql: sql.to_string(),
            params: Vec::new(),
        }
    }

    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    /// Execute the statement, flushing the session first in auto flush mode.
    pub fn run(self) -> Result<()> {
        let inner = &self.session.inner;
        inner.auto_flush()?;
        let mut statement = inner.statement(&self.sql)?;
        for (column, value) in self.params.iter().enumerate() {
            statement.bind(column, value)?;
        }
        tracing::debug!(sql = %self.sql, "Executing call");
        statement.execute()
    }
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("sql", &self.sql)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;

    struct Stub(LimitQuery, bool);

    impl Dialect for Stub {
        fn name(&self) -> &'static str {
            "stub"
        }

        fn limit_query_method(&self) -> LimitQuery {
            self.0
        }

        fn require_subquery_alias(&self) -> bool {
            self.1
        }
    }

    const AUTHOR_COLUMNS: &str =
        "\"author\".\"id\", \"author\".\"version\", \"author\".\"name\", \"author\".\"age\"";

    fn names(session: &Session, sql: &str) -> Vec<String> {
        session
            .query::<String>(sql)
            .result_list()
            .unwrap()
            .iter()
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    fn populate(session: &Session) {
        for (name, age) in [("Ann", 30), ("Bob", 40), ("Cid", 50)] {
            session
                .add_new(Author {
                    name: name.into(),
                    age,
                    ..Author::default()
                })
                .unwrap();
        }
    }

    #[test]
    fn find_sql() {
        let session = session();
        let q = session.find::<Author>();
        assert_eq!(
            q.select_sql().unwrap(),
            format!("select {AUTHOR_COLUMNS} from \"author\"")
        );

        let q = session
            .find_where::<Author>("age > ?")
            .where_("name = ?")
            .or_where("age = ?")
            .order_by("name desc");
        assert_eq!(
            q.select_sql().unwrap(),
            format!(
                "select {AUTHOR_COLUMNS} from \"author\" where age > ? and \
                 (((name = ?)) or (age = ?)) order by name desc"
            )
        );
    }

    #[test]
    fn raw_sql_substitution_and_group_by() {
        let session = session();
        let q = session
            .query::<(Ptr<Author>, i64)>(
                "select a, count(b.id) from author a left join book b on b.author_id = a.id",
            )
            .group_by("a");
        assert_eq!(
            q.select_sql().unwrap(),
            "select \"a\".\"id\" as col0, \"a\".\"version\" as col1, \"a\".\"name\" as col2, \
             \"a\".\"age\" as col3, count(b.id) as col4 from author a left join book b \
             on b.author_id = a.id group by \"a\".\"id\", \"a\".\"version\", \"a\".\"name\", \
             \"a\".\"age\""
        );
    }

    #[test]
    fn aliased_items_are_kept() {
        let session = session();
        let q = session.query::<i64>("select count(1) as n from author");
        assert_eq!(q.select_sql().unwrap(), "select count(1) as n from author");
    }

    #[test]
    fn alias_count_must_match() {
        let session = session();
        let err = session.query::<i64>("select a, b from t").select_sql().unwrap_err();
        assert!(matches!(err, Error::Usage(_)));
        let err = session
            .query::<(i64, i64)>("select a from t")
            .select_sql()
            .unwrap_err();
        assert!(matches!(err, Error::Usage(_)));
    }

    #[test]
    fn limit_clauses_per_dialect() {
        let session = session();
        let q = session.find::<Author>().limit(10).offset(5);
        let base = format!("select {AUTHOR_COLUMNS} from \"author\"");

        let built = q.build(&Stub(LimitQuery::Limit, false)).unwrap();
        assert_eq!(built.sql, format!("{base} limit ? offset ?"));
        assert_eq!(built.limit_params, vec![Value::BigInt(10), Value::BigInt(5)]);
        assert_eq!(built.count_sql, format!("select count(1) from ({base} limit ? offset ?)"));

        let built = q.clone().limit(-1).build(&Stub(LimitQuery::Limit, true)).unwrap();
        assert_eq!(built.sql, format!("{base} limit -1 offset ?"));
        assert!(built.count_sql.ends_with(") dbocount"));

        let built = q.build(&Stub(LimitQuery::RowsFromTo, false)).unwrap();
        assert_eq!(built.sql, format!("{base} rows ? to ?"));
        assert_eq!(built.limit_params, vec![Value::BigInt(6), Value::BigInt(15)]);

        let built = q.build(&Stub(LimitQuery::OffsetFetch, false)).unwrap();
        assert_eq!(
            built.sql,
            format!("{base} order by (select null) offset (?) rows fetch first (?) rows only")
        );
        assert_eq!(built.limit_params, vec![Value::BigInt(5), Value::BigInt(10)]);

        let ordered = session.find::<Author>().order_by("name");
        let built = ordered.build(&Stub(LimitQuery::OffsetFetch, false)).unwrap();
        assert_eq!(built.sql, format!("{base} order by name offset 0 rows"));

        let built = q.build(&Stub(LimitQuery::Rownum, false)).unwrap();
        assert_eq!(
            built.sql,
            format!(
                "select * from ( select row_.*, rownum rownum2 from ( {base} ) row_ \
                 where rownum <= ?) where rownum2 > ?"
            )
        );
        assert_eq!(built.limit_params, vec![Value::BigInt(15), Value::BigInt(5)]);

        let built = q.build(&Stub(LimitQuery::NotSupported, false)).unwrap();
        assert_eq!(built.sql, base);
    }

    #[test]
    fn dynamic_query_runs_repeatedly() {
        let session = session();
        let tx = session.begin().unwrap();
        populate(&session);

        let q = session
            .find::<Author>()
            .where_("age >= ?")
            .bind(40)
            .order_by("age");
        let first = q.result_list().unwrap();
        assert_eq!(first.size().unwrap(), 2);
        let ages: Vec<i32> = first
            .iter()
            .unwrap()
            .map(|a| a.map(|a| a.get().unwrap().age))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(ages, vec![40, 50]);

        let limited = q.clone().limit(1).offset(1).result_list().unwrap();
        assert_eq!(limited.size().unwrap(), 1);
        assert_eq!(limited.front().unwrap().unwrap().get().unwrap().age, 50);

        assert_eq!(q.result_list().unwrap().size().unwrap(), 2);
        tx.commit().unwrap();
    }

    #[test]
    fn result_value_uniqueness() {
        let session = session();
        let tx = session.begin().unwrap();
        let none: String = session
            .query("select name from author")
            .result_value()
            .unwrap();
        assert_eq!(none, "");

        populate(&session);
        let err = session
            .query::<String>("select name from author")
            .result_value()
            .unwrap_err();
        assert!(matches!(err, Error::NoUniqueResult { .. }));

        let bob: String = session
            .query("select name from author")
            .where_("age = ?")
            .bind(40)
            .result_value()
            .unwrap();
        assert_eq!(bob, "Bob");
        tx.commit().unwrap();
    }

    #[test]
    fn direct_binding_is_single_use_per_reset() {
        let session = session();
        let tx = session.begin().unwrap();
        populate(&session);

        let mut q = session.find_direct::<Author>("age < ?").bind(45);
        assert_eq!(q.result_list().unwrap().size().unwrap(), 2);
        assert!(matches!(q.result_list(), Err(Error::Usage(_))));

        q.reset();
        let mut q = q.bind(35);
        let found = q.result_value().unwrap();
        assert_eq!(found.get().unwrap().name, "Ann");
        tx.commit().unwrap();
    }

    #[test]
    fn literal_question_mark_is_not_a_parameter() {
        let session = session();
        let tx = session.begin().unwrap();
        let value: String = session.query("select 'dima '' ? '").result_value().unwrap();
        assert_eq!(value, "dima ' ? ");
        tx.commit().unwrap();
    }

    #[test]
    fn call_runs_with_parameters() {
        let session = session();
        let tx = session.begin().unwrap();
        session
            .execute("insert into \"author\" (\"version\", \"name\", \"age\") values (0, ?, ?)")
            .bind("Raw")
            .bind(9)
            .run()
            .unwrap();
        assert_eq!(names(&session, "select name from author"), vec!["Raw"]);
        tx.commit().unwrap();
    }
}
