//! A paged, editable table view over a query.
//!
//! A [`QueryModel`] presents the results of a [`Query`] as rows and a
//! chosen set of its fields as columns. Rows are read in batches around the
//! row being accessed, so only a window of the result is resident. Each
//! database access runs in its own (possibly nested) transaction.
//!
//! Rows with an integer id remember it, so [`QueryModel::stable_result_row`]
//! keeps returning the same object after rows were inserted or removed
//! elsewhere in the model.

use crate::query::Query;
use crate::query_result::QueryResult;
use crate::Session;
use dbo_core::{Error, FieldInfo, Result, Value};
use std::collections::HashMap;
use std::ops::BitOr;

/// Per-column capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ItemFlags(u8);

impl ItemFlags {
    pub const NONE: Self = Self(0);
    pub const SELECTABLE: Self = Self(0x01);
    pub const EDITABLE: Self = Self(0x02);

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ItemFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

#[derive(Debug, Clone)]
struct QueryColumn {
    field: String,
    field_index: usize,
    header: Option<String>,
    flags: ItemFlags,
}

const DEFAULT_BATCH_SIZE: usize = 40;

pub struct QueryModel<R: QueryResult> {
    query: Option<Query<R>>,
    /// Limit and offset of the query as it was set.
    query_limit: i64,
    query_offset: i64,
    fields: Vec<FieldInfo>,
    columns: Vec<QueryColumn>,
    sort_order_by: String,
    batch_size: usize,
    cached_row_count: Option<usize>,
    cache_start: Option<usize>,
    cache: Vec<R>,
    stable_ids: HashMap<usize, i64>,
    current_row: Option<usize>,
    row_values: Vec<Value>,
}

impl<R: QueryResult> Default for QueryModel<R> {
    fn default() -> Self {
        Self::new()
    }
}

fn no_query() -> Error {
    Error::usage("query model has no query")
}

fn no_column(column: usize) -> Error {
    Error::usage(format!("query model has no column {column}"))
}

impl<R: QueryResult> QueryModel<R> {
    pub fn new() -> Self {
        Self {
            query: None,
            query_limit: -1,
            query_offset: -1,
            fields: Vec::new(),
            columns: Vec::new(),
            sort_order_by: String::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            cached_row_count: None,
            cache_start: None,
            cache: Vec::new(),
            stable_ids: HashMap::new(),
            current_row: None,
            row_values: Vec::new(),
        }
    }

    /// Show the results of `query`. Unless `keep_columns` is set, the columns
    /// and sort order are cleared; kept columns must exist in the new query.
    pub fn set_query(&mut self, query: Query<R>, keep_columns: bool) -> Result<()> {
        let fields = query.fields()?;
        self.query_limit = query.limit_value();
        self.query_offset = query.offset_value();
        self.invalidate_data();

        if keep_columns {
            for column in &mut self.columns {
                column.field_index = field_index(&fields, &column.field)?;
            }
            self.query = Some(if self.sort_order_by.is_empty() {
                query
            } else {
                query.order_by(&self.sort_order_by)
            });
        } else {
            self.columns.clear();
            self.sort_order_by.clear();
            self.query = Some(query);
        }
        self.fields = fields;
        Ok(())
    }

    /// The query as set, including the sort order applied by [`sort`](Self::sort).
    pub fn query(&self) -> Option<Query<R>> {
        self.query.clone()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Rows read per database access.
    pub fn set_batch_size(&mut self, count: usize) {
        self.batch_size = count.max(1);
    }

    /// Add a column showing `field`, editable and headed by the field name.
    pub fn add_column(&mut self, field: &str) -> Result<usize> {
        self.add_column_with_header(field, field, ItemFlags::SELECTABLE | ItemFlags::EDITABLE)
    }

    /// Add a column; `field` is a field name, optionally qualified
    /// (`alias.name`).
    pub fn add_column_with_header(&mut self, field: &str, header: &str, flags: ItemFlags) -> Result<usize> {
        let field_index = field_index(&self.fields, field)?;
        self.columns.push(QueryColumn {
            field: field.to_string(),
            field_index,
            header: Some(header.to_string()),
            flags,
        });
        Ok(self.columns.len() - 1)
    }

    /// A column for every field of the query; editable where the field is.
    pub fn add_all_fields_as_columns(&mut self) -> Result<()> {
        let names: Vec<(String, ItemFlags)> = self
            .fields
            .iter()
            .map(|f| {
                let name = if f.qualifier.is_empty() {
                    f.name.clone()
                } else {
                    format!("{}.{}", f.qualifier, f.name)
                };
                let flags = if f.is_mutable() {
                    ItemFlags::SELECTABLE | ItemFlags::EDITABLE
                } else {
                    ItemFlags::SELECTABLE
                };
                (name, flags)
            })
            .collect();
        for (name, flags) in names {
            self.add_column_with_header(&name, &name, flags)?;
        }
        Ok(())
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Number of rows. The first call reads the first batch, and counts
    /// the rows when they do not all fit.
    pub fn row_count(&mut self) -> Result<usize> {
        if let Some(count) = self.cached_row_count {
            return Ok(count);
        }
        self.cache_row(0)?;
        if let Some(count) = self.cached_row_count {
            return Ok(count);
        }

        let query = self.query.as_ref().ok_or_else(no_query)?;
        let unordered = query
            .clone()
            .order_by("")
            .limit(self.query_limit)
            .offset(self.query_offset);
        let tx = query.session().begin()?;
        let count = unordered.result_list()?.size()?;
        tx.commit()?;
        self.cached_row_count = Some(count);
        Ok(count)
    }

    /// The value of one cell.
    pub fn data(&mut self, row: usize, column: usize) -> Result<Value> {
        let field_index = self.columns.get(column).ok_or_else(|| no_column(column))?.field_index;
        self.set_current_row(row)?;
        self.row_values
            .get(field_index)
            .cloned()
            .ok_or_else(|| no_column(column))
    }

    /// Change one cell. The row's object is modified and flushed with the
    /// session.
    pub fn set_data(&mut self, row: usize, column: usize, value: &Value) -> Result<()> {
        let field_index = self.columns.get(column).ok_or_else(|| no_column(column))?.field_index;
        let session = self.session()?;
        let tx = session.begin()?;
        let index = self.cached_index(row)?;
        let rest = self.cache[index].set_value(&session, field_index, value)?;
        if rest.is_some() {
            return Err(no_column(column));
        }
        tx.commit()?;
        if self.current_row == Some(row) {
            self.current_row = None;
        }
        Ok(())
    }

    pub fn header_data(&self, column: usize) -> Option<&str> {
        self.columns.get(column)?.header.as_deref()
    }

    pub fn set_header_data(&mut self, column: usize, header: &str) -> Result<()> {
        let column = self.columns.get_mut(column).ok_or_else(|| no_column(column))?;
        column.header = Some(header.to_string());
        Ok(())
    }

    /// Order the rows by `column`. The row count is kept.
    pub fn sort(&mut self, column: usize, order: SortOrder) -> Result<()> {
        let direction = match order {
            SortOrder::Ascending => "asc",
            SortOrder::Descending => "desc",
        };
        let order_by = format!("{} {direction}", self.field_info(column).ok_or_else(|| no_column(column))?.sql());
        let query = self.query.take().ok_or_else(no_query)?;

        let row_count = self.cached_row_count;
        self.invalidate_data();
        self.query = Some(query.order_by(&order_by));
        self.sort_order_by = order_by;
        self.cached_row_count = row_count;
        Ok(())
    }

    /// The result shown in `row`.
    pub fn result_row(&mut self, row: usize) -> Result<R> {
        let index = self.cached_index(row)?;
        Ok(self.cache[index].clone())
    }

    /// The result that was shown in `row` when it was read, found again by
    /// its id when it has one.
    pub fn stable_result_row(&mut self, row: usize) -> Result<R> {
        let Some(&id) = self.stable_ids.get(&row) else {
            return self.result_row(row);
        };
        let session = self.session()?;
        let tx = session.begin()?;
        let result = R::find_by_id(&session, id)?;
        tx.commit()?;
        Ok(result)
    }

    /// The row showing `result`, scanning from the top.
    pub fn index_of(&mut self, result: &R) -> Result<Option<usize>> {
        for row in 0..self.row_count()? {
            if self.result_row(row)? == *result {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    /// Append `count` new rows; their objects are added to the session.
    /// Rows can only be inserted at the end.
    pub fn insert_rows(&mut self, row: usize, count: usize) -> Result<()> {
        let row_count = self.row_count()?;
        if row != row_count {
            return Err(Error::usage("query model only supports inserting rows at the end"));
        }
        let session = self.session()?;
        for i in 0..count {
            let mut result = R::create();
            result.add(&session)?;
            if self.cache_start.is_some_and(|start| start + self.cache.len() == row + i) {
                self.cache.push(result);
            }
        }
        self.cached_row_count = Some(row_count + count);
        Ok(())
    }

    /// Remove `count` rows starting at `row`, deleting their objects.
    pub fn remove_rows(&mut self, row: usize, count: usize) -> Result<()> {
        for _ in 0..count {
            let index = self.cached_index(row)?;
            self.cache[index].remove()?;
            self.cache.remove(index);
        }
        if let Some(rows) = self.cached_row_count.as_mut() {
            *rows = rows.saturating_sub(count);
        }
        self.current_row = None;
        Ok(())
    }

    /// Forget everything read; the next access reads again.
    pub fn reload(&mut self) {
        self.invalidate_data();
    }

    pub fn invalidate_data(&mut self) {
        self.cached_row_count = None;
        self.cache_start = None;
        self.current_row = None;
        self.cache.clear();
        self.row_values.clear();
        self.stable_ids.clear();
    }

    /// All fields the query selects.
    pub fn fields(&self) -> &[FieldInfo] {
        &self.fields
    }

    pub fn field_info(&self, column: usize) -> Option<&FieldInfo> {
        self.fields.get(self.columns.get(column)?.field_index)
    }

    /// The field a column shows, as passed to [`add_column`](Self::add_column).
    pub fn field_name(&self, column: usize) -> Option<&str> {
        self.columns.get(column).map(|c| c.field.as_str())
    }

    pub fn column_flags(&self, column: usize) -> Option<ItemFlags> {
        self.columns.get(column).map(|c| c.flags)
    }

    pub fn set_column_flags(&mut self, column: usize, flags: ItemFlags) -> Result<()> {
        let column = self.columns.get_mut(column).ok_or_else(|| no_column(column))?;
        column.flags = flags;
        Ok(())
    }

    fn session(&self) -> Result<Session> {
        self.query
            .as_ref()
            .map(|q| q.session().clone())
            .ok_or_else(no_query)
    }

    fn set_current_row(&mut self, row: usize) -> Result<()> {
        if self.current_row == Some(row) {
            return Ok(());
        }
        let session = self.session()?;
        let tx = session.begin()?;
        let result = self.result_row(row)?;
        self.row_values.clear();
        result.values(&session, &mut self.row_values)?;
        tx.commit()?;
        self.current_row = Some(row);
        Ok(())
    }

    /// Position of `row` in the cache, reading its batch if needed.
    fn cached_index(&mut self, row: usize) -> Result<usize> {
        self.cache_row(row)?;
        let start = self.cache_start.unwrap_or(0);
        if row < start || row >= start + self.cache.len() {
            return Err(Error::usage(format!(
                "query model geometry inconsistent with database: row {row} is not within \
                 the {} rows read from row {start}",
                self.cache.len()
            )));
        }
        Ok(row - start)
    }

    fn cache_row(&mut self, row: usize) -> Result<()> {
        if self
            .cache_start
            .is_some_and(|start| row >= start && row < start + self.cache.len())
        {
            return Ok(());
        }
        let query = self.query.as_ref().ok_or_else(no_query)?;

        let start = row.saturating_sub(self.batch_size / 4);
        let batch = i64::try_from(self.batch_size).unwrap_or(i64::MAX);
        let first = i64::try_from(start).unwrap_or(i64::MAX);
        let mut offset = first;
        if self.query_offset > 0 {
            offset += self.query_offset;
        }
        let mut limit = batch;
        if self.query_limit > 0 {
            limit = batch.min(self.query_limit - first).max(0);
        }

        let window = query.clone().offset(offset).limit(limit);
        let tx = query.session().begin()?;
        let rows = window.result_list()?.iter()?.collect::<Result<Vec<R>>>()?;
        tx.commit()?;
        tracing::trace!(start, rows = rows.len(), "Read query model batch");

        for (i, result) in rows.iter().enumerate() {
            let id = result.id();
            if id != -1 {
                self.stable_ids.insert(start + i, id);
            }
        }
        if i64::try_from(rows.len()).unwrap_or(i64::MAX) < limit && offset == 0 && self.cached_row_count.is_none() {
            self.cached_row_count = Some(rows.len());
        }
        self.cache = rows;
        self.cache_start = Some(start);
        Ok(())
    }
}

/// Index of `field` (a name, or `qualifier.name`) among `fields`.
fn field_index(fields: &[FieldInfo], field: &str) -> Result<usize> {
    fields
        .iter()
        .position(|f| {
            f.name == field
                || (!f.qualifier.is_empty()
                    && field
                        .strip_prefix(f.qualifier.as_str())
                        .and_then(|rest| rest.strip_prefix('.'))
                        == Some(f.name.as_str()))
        })
        .ok_or_else(|| Error::usage(format!("query model could not find field '{field}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use crate::{ObjectState, Ptr};

    fn populated() -> Session {
        let session = session();
        let tx = session.begin().unwrap();
        for (name, age) in [("Ann", 30), ("Bob", 25), ("Cid", 40), ("Dee", 35), ("Eve", 20)] {
            session
                .add_new(Author {
                    name: name.into(),
                    age,
                    ..Author::default()
                })
                .unwrap();
        }
        tx.commit().unwrap();
        session
    }

    fn model(session: &Session) -> QueryModel<Ptr<Author>> {
        let mut model = QueryModel::new();
        model
            .set_query(session.find::<Author>().order_by("\"age\""), false)
            .unwrap();
        model.add_all_fields_as_columns().unwrap();
        model
    }

    #[test]
    fn columns_from_fields() {
        let session = populated();
        let model = model(&session);
        assert_eq!(model.column_count(), 4);
        assert_eq!(model.field_name(2), Some("author.name"));
        assert_eq!(model.header_data(3), Some("author.age"));
        assert_eq!(model.field_info(3).map(|f| f.name.as_str()), Some("age"));
        assert!(model.column_flags(2).unwrap().contains(ItemFlags::EDITABLE));
        assert!(model.field_info(4).is_none());
    }

    #[test]
    fn rows_are_read_in_batches() {
        let session = populated();
        let mut model = model(&session);
        model.set_batch_size(2);
        assert_eq!(model.row_count().unwrap(), 5);
        let ages: Vec<Value> = (0..5).map(|row| model.data(row, 3).unwrap()).collect();
        assert_eq!(
            ages,
            vec![Value::Int(20), Value::Int(25), Value::Int(30), Value::Int(35), Value::Int(40)]
        );
        assert_eq!(model.data(4, 2).unwrap(), Value::Text("Cid".into()));
    }

    #[test]
    fn sort_reorders_rows() {
        let session = populated();
        let mut model = model(&session);
        assert_eq!(model.row_count().unwrap(), 5);
        model.sort(3, SortOrder::Descending).unwrap();
        assert_eq!(model.data(0, 2).unwrap(), Value::Text("Cid".into()));
        assert_eq!(
            model.query().unwrap().order_by_value(),
            "\"author\".\"age\" desc"
        );
    }

    #[test]
    fn edits_reach_the_database() {
        let session = populated();
        let mut model = model(&session);
        model.set_data(0, 2, &Value::Text("Eva".into())).unwrap();
        assert_eq!(model.data(0, 2).unwrap(), Value::Text("Eva".into()));

        let tx = session.begin().unwrap();
        let n: i64 = session
            .query("select count(1) from \"author\" where \"name\" = 'Eva'")
            .result_value()
            .unwrap();
        assert_eq!(n, 1);
        tx.commit().unwrap();

        assert!(model.set_data(0, 0, &Value::BigInt(99)).is_err());
    }

    #[test]
    fn insert_and_remove_rows() {
        let session = populated();
        let mut model = model(&session);
        assert!(model.insert_rows(0, 1).is_err());
        model.insert_rows(5, 1).unwrap();
        assert_eq!(model.row_count().unwrap(), 6);
        let added = model.result_row(5).unwrap();
        assert_eq!(added.state(), ObjectState::New);

        let first = model.result_row(0).unwrap();
        model.remove_rows(0, 1).unwrap();
        assert_eq!(model.row_count().unwrap(), 5);
        assert_eq!(first.state(), ObjectState::Deleted);
        assert_eq!(model.index_of(&first).unwrap(), None);
        assert_eq!(model.index_of(&added).unwrap(), Some(4));
    }

    #[test]
    fn stable_rows_resolve_by_id() {
        let session = populated();
        let mut model = model(&session);
        let youngest = model.result_row(0).unwrap();
        assert_eq!(model.stable_result_row(0).unwrap(), youngest);
        model.reload();
        assert_eq!(model.stable_result_row(0).unwrap(), youngest);
    }

    #[test]
    fn model_without_query() {
        let mut model = QueryModel::<Ptr<Author>>::default();
        assert_eq!(model.batch_size(), 40);
        assert!(matches!(model.row_count(), Err(Error::Usage(_))));
    }
}
