//! Types a query can return.
//!
//! A query result is a single column value, a [`Ptr`] to a mapped object
//! (spanning the object's id, version and data columns), or a tuple of
//! those. [`QueryResult`] describes how such a type reads itself from a row,
//! which columns it selects, and how a [`QueryModel`](crate::QueryModel)
//! presents and edits it.

use crate::mapping::{self, MappingBase};
use crate::persist::{Dbo, DboId};
use crate::ptr::Ptr;
use crate::{Session, db_action};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use dbo_core::{Error, FieldFlags, FieldInfo, Result, SqlStatement, SqlValue, Value};
use std::collections::VecDeque;

/// A type that can be read from a query row.
pub trait QueryResult: Clone + Default + PartialEq + 'static {
    /// Describe the selected columns.
    ///
    /// `aliases` are the select-list items of a raw SQL query, consumed one
    /// per result element. A `find` query passes `None` and selects mapped
    /// objects by their table name.
    fn fields(
        session: &Session,
        aliases: Option<&mut VecDeque<String>>,
        out: &mut Vec<FieldInfo>,
    ) -> Result<()>;

    /// Read a value starting at `column`, advancing it past the columns read.
    fn load(session: &Session, statement: &dyn SqlStatement, column: &mut usize) -> Result<Self>;

    /// The column values, aligned with [`fields`](Self::fields).
    fn values(&self, session: &Session, out: &mut Vec<Value>) -> Result<()>;

    /// Set column `index`. Returns `Some(rest)` when `index` lies beyond this
    /// value's columns, `rest` being the index into the columns that follow.
    fn set_value(&mut self, session: &Session, index: usize, value: &Value)
    -> Result<Option<usize>>;

    /// A new value for a row inserted into a model.
    fn create() -> Self {
        Self::default()
    }

    /// Add the value (its objects) to `session`.
    fn add(&mut self, _session: &Session) -> Result<()> {
        Ok(())
    }

    /// Remove the value (its objects) from the database.
    fn remove(&self) -> Result<()> {
        Ok(())
    }

    /// A stable row id, or -1.
    fn id(&self) -> i64 {
        -1
    }

    /// The value identified by `id`, as returned by [`id`](Self::id).
    fn find_by_id(_session: &Session, _id: i64) -> Result<Self> {
        Ok(Self::default())
    }
}

fn pop_alias(aliases: Option<&mut VecDeque<String>>) -> Result<Option<String>> {
    match aliases {
        None => Ok(None),
        Some(aliases) => aliases
            .pop_front()
            .map(Some)
            .ok_or_else(|| Error::usage("query selects fewer columns than the result type needs")),
    }
}

fn scalar_fields<T: SqlValue>(
    aliases: Option<&mut VecDeque<String>>,
    out: &mut Vec<FieldInfo>,
) -> Result<()> {
    let name = pop_alias(aliases)?.unwrap_or_else(|| "?".to_string());
    let mut info = FieldInfo::expression(name.clone(), T::SQL_TYPE);
    info.nullable = T::NULLABLE;
    if name.to_ascii_lowercase().contains(" as ") {
        info.flags.insert(FieldFlags::ALIASED_NAME);
    }
    out.push(info);
    Ok(())
}

fn scalar_set<T: SqlValue>(target: &mut T, index: usize, value: &Value) -> Result<Option<usize>> {
    if index == 0 {
        *target = T::from_value(value)?;
        Ok(None)
    } else {
        Ok(Some(index - 1))
    }
}

macro_rules! scalar_result {
    ($($ty:ty),* $(,)?) => {
        $(
            impl QueryResult for $ty {
                fn fields(
                    _session: &Session,
                    aliases: Option<&mut VecDeque<String>>,
                    out: &mut Vec<FieldInfo>,
                ) -> Result<()> {
                    scalar_fields::<Self>(aliases, out)
                }

                fn load(
                    _session: &Session,
                    statement: &dyn SqlStatement,
                    column: &mut usize,
                ) -> Result<Self> {
                    let value = statement.get_result(*column)?;
                    *column += 1;
                    <Self as dbo_core::FromValue>::from_value(&value)
                }

                fn values(&self, _session: &Session, out: &mut Vec<Value>) -> Result<()> {
                    out.push(self.to_value());
                    Ok(())
                }

                fn set_value(
                    &mut self,
                    _session: &Session,
                    index: usize,
                    value: &Value,
                ) -> Result<Option<usize>> {
                    scalar_set(self, index, value)
                }
            }

            impl QueryResult for Option<$ty> {
                fn fields(
                    _session: &Session,
                    aliases: Option<&mut VecDeque<String>>,
                    out: &mut Vec<FieldInfo>,
                ) -> Result<()> {
                    scalar_fields::<Self>(aliases, out)
                }

                fn load(
                    _session: &Session,
                    statement: &dyn SqlStatement,
                    column: &mut usize,
                ) -> Result<Self> {
                    let value = statement.get_result(*column)?;
                    *column += 1;
                    <Self as dbo_core::FromValue>::from_value(&value)
                }

                fn values(&self, _session: &Session, out: &mut Vec<Value>) -> Result<()> {
                    out.push(self.to_value());
                    Ok(())
                }

                fn set_value(
                    &mut self,
                    _session: &Session,
                    index: usize,
                    value: &Value,
                ) -> Result<Option<usize>> {
                    scalar_set(self, index, value)
                }
            }
        )*
    };
}

scalar_result!(
    bool,
    i16,
    i32,
    i64,
    f32,
    f64,
    String,
    Vec<u8>,
    NaiveDate,
    NaiveTime,
    NaiveDateTime,
);

impl<C: Dbo> QueryResult for Ptr<C> {
    fn fields(
        session: &Session,
        aliases: Option<&mut VecDeque<String>>,
        out: &mut Vec<FieldInfo>,
    ) -> Result<()> {
        let mapping = session.inner.mapping::<C>()?;
        let info = mapping.info(&session.inner)?;
        let qualifier = pop_alias(aliases)?.unwrap_or_else(|| info.table.clone());
        let start = out.len();
        out.extend(info.select_fields(&qualifier));
        if let Some(first) = out.get_mut(start) {
            first.flags.insert(FieldFlags::FIRST_DBO_FIELD);
        }
        Ok(())
    }

    fn load(session: &Session, statement: &dyn SqlStatement, column: &mut usize) -> Result<Self> {
        mapping::load_row::<C>(&session.inner, statement, column)
    }

    fn values(&self, session: &Session, out: &mut Vec<Value>) -> Result<()> {
        let Some(meta) = self.meta() else {
            let info = session.inner.mapping::<C>()?.info(&session.inner)?;
            out.extend(std::iter::repeat_n(Value::Null, info.column_count()));
            return Ok(());
        };
        out.push(meta.id().to_value());
        if C::VERSION_FIELD.is_some() {
            out.push(Value::Int(meta.version()));
        }
        self.with_obj_mut(|obj| db_action::object_values(obj, out))
    }

    fn set_value(
        &mut self,
        session: &Session,
        index: usize,
        value: &Value,
    ) -> Result<Option<usize>> {
        let info = session.inner.mapping::<C>()?.info(&session.inner)?;
        let count = info.column_count();
        if index >= count {
            return Ok(Some(index - count));
        }
        let fixed = 1 + usize::from(info.version.is_some());
        if index < fixed {
            return Err(Error::usage("the id and version columns are read-only"));
        }
        let mut obj = self.modify()?;
        db_action::set_object_value(&mut *obj, index - fixed, value)?;
        Ok(None)
    }

    fn create() -> Self {
        Ptr::new(C::default())
    }

    fn add(&mut self, session: &Session) -> Result<()> {
        if self.is_null() {
            *self = Self::create();
        }
        session.inner.add(self)
    }

    fn remove(&self) -> Result<()> {
        Ptr::remove(self)
    }

    fn id(&self) -> i64 {
        Ptr::id(self).as_i64().unwrap_or(-1)
    }

    fn find_by_id(session: &Session, id: i64) -> Result<Self> {
        let id = C::Id::from_generated(id)
            .ok_or_else(|| Error::usage("class has no integer id"))?;
        session.load::<C>(id)
    }
}

macro_rules! tuple_result {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name: QueryResult),+> QueryResult for ($($name,)+) {
            fn fields(
                session: &Session,
                mut aliases: Option<&mut VecDeque<String>>,
                out: &mut Vec<FieldInfo>,
            ) -> Result<()> {
                $( $name::fields(session, aliases.as_deref_mut(), out)?; )+
                Ok(())
            }

            fn load(
                session: &Session,
                statement: &dyn SqlStatement,
                column: &mut usize,
            ) -> Result<Self> {
                Ok(($($name::load(session, statement, column)?,)+))
            }

            fn values(&self, session: &Session, out: &mut Vec<Value>) -> Result<()> {
                $( self.$idx.values(session, out)?; )+
                Ok(())
            }

            fn set_value(
                &mut self,
                session: &Session,
                index: usize,
                value: &Value,
            ) -> Result<Option<usize>> {
                let mut index = index;
                $(
                    match self.$idx.set_value(session, index, value)? {
                        None => return Ok(None),
                        Some(rest) => index = rest,
                    }
                )+
                Ok(Some(index))
            }

            fn add(&mut self, session: &Session) -> Result<()> {
                $( self.$idx.add(session)?; )+
                Ok(())
            }

            fn remove(&self) -> Result<()> {
                $( self.$idx.remove()?; )+
                Ok(())
            }
        }
    };
}

tuple_result!(A: 0, B: 1);
tuple_result!(A: 0, B: 1, C: 2);
tuple_result!(A: 0, B: 1, C: 2, D: 3);
tuple_result!(A: 0, B: 1, C: 2, D: 3, E: 4);
