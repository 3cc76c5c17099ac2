//! The persistence description of a mapped class.
//!
//! A class describes its columns and relations once, in [`Dbo::persist`],
//! by calling the functions in this module on an [`Action`]. Every piece of
//! work the session does on an object (collecting the schema, loading a row,
//! binding an insert, serializing to JSON, ...) is an `Action` walking the
//! same description.
//!
//! ```ignore
//! #[derive(Default)]
//! struct Post {
//!     title: String,
//!     author: Ptr<User>,
//!     tags: Collection<Ptr<Tag>>,
//! }
//!
//! impl Dbo for Post {
//!     type Id = i64;
//!
//!     fn persist<A: Action>(&mut self, a: &mut A) {
//!         field(a, &mut self.title, "title");
//!         belongs_to(a, &mut self.author, "author");
//!         has_many(a, &mut self.tags, RelationType::ManyToMany, "post_tags");
//!     }
//! }
//! ```

use crate::collection::Collection;
use crate::ptr::{Ptr, WeakPtr};
use dbo_core::{ForeignKeyConstraint, RelationType, SqlValue};
use std::fmt;
use std::hash::Hash;

/// A class that can be mapped to a table.
pub trait Dbo: Default + 'static {
    /// The identity type: `i64` for the surrogate key, or the type of the
    /// natural id declared with [`id`].
    type Id: DboId;

    /// Name of the auto-generated key column, or `None` when the class
    /// declares a natural id.
    const SURROGATE_ID_FIELD: Option<&'static str> = Some("id");

    /// Name of the optimistic locking column, or `None` to disable versioning.
    const VERSION_FIELD: Option<&'static str> = Some("version");

    /// Describe the persisted state of `self` to `action`.
    fn persist<A: Action>(&mut self, action: &mut A);
}

/// A type usable as an object identity.
pub trait DboId: SqlValue + Eq + Hash + fmt::Debug + fmt::Display {
    /// The id of an object that has not been saved.
    fn invalid() -> Self;

    fn is_valid(&self) -> bool {
        *self != Self::invalid()
    }

    /// Build an id from a generated key; `None` for non-integer ids.
    fn from_generated(key: i64) -> Option<Self>;

    /// This id as an integer, when it is one.
    fn as_i64(&self) -> Option<i64>;
}

impl DboId for i64 {
    fn invalid() -> Self {
        -1
    }

    fn from_generated(key: i64) -> Option<Self> {
        Some(key)
    }

    fn as_i64(&self) -> Option<i64> {
        Some(*self)
    }
}

impl DboId for i32 {
    fn invalid() -> Self {
        -1
    }

    fn from_generated(key: i64) -> Option<Self> {
        i32::try_from(key).ok()
    }

    fn as_i64(&self) -> Option<i64> {
        Some(i64::from(*self))
    }
}

impl DboId for String {
    fn invalid() -> Self {
        String::new()
    }

    fn from_generated(_key: i64) -> Option<Self> {
        None
    }

    fn as_i64(&self) -> Option<i64> {
        None
    }
}

/// A visitor over the persisted members of a [`Dbo`].
pub trait Action {
    /// A plain column.
    fn act_field<T: SqlValue>(&mut self, value: &mut T, name: &str, size: i32);

    /// The natural id of the class.
    fn act_id<T: DboId>(&mut self, value: &mut T, name: &str, size: i32);

    /// A `belongs_to` reference, stored as foreign key column(s).
    fn act_ptr<C: Dbo>(&mut self, value: &mut Ptr<C>, name: &str, fk: ForeignKeyConstraint);

    /// The one side of a one-to-one relation.
    fn act_weak_ptr<C: Dbo>(&mut self, value: &mut WeakPtr<C>, join_name: &str);

    /// A `has_many` relation.
    fn act_collection<C: Dbo>(
        &mut self,
        value: &mut Collection<Ptr<C>>,
        relation: RelationType,
        join_name: &str,
        join_id: &str,
        fk: ForeignKeyConstraint,
    );
}

/// A value that persists as one or more columns.
///
/// Every [`SqlValue`] is a single column. Implement this for composite
/// values that spread over several columns.
pub trait Field {
    fn persist_field<A: Action>(&mut self, action: &mut A, name: &str, size: i32);
}

impl<T: SqlValue> Field for T {
    fn persist_field<A: Action>(&mut self, action: &mut A, name: &str, size: i32) {
        action.act_field(self, name, size);
    }
}

/// Map `value` to the column `name`.
pub fn field<A: Action, F: Field>(action: &mut A, value: &mut F, name: &str) {
    value.persist_field(action, name, 0);
}

/// Map `value` to the column `name` with a declared size (`varchar(size)`).
pub fn field_sized<A: Action, F: Field>(action: &mut A, value: &mut F, name: &str, size: i32) {
    value.persist_field(action, name, size);
}

/// Declare the natural id of the class.
pub fn id<A: Action, T: DboId>(action: &mut A, value: &mut T, name: &str) {
    action.act_id(value, name, 0);
}

pub fn id_sized<A: Action, T: DboId>(action: &mut A, value: &mut T, name: &str, size: i32) {
    action.act_id(value, name, size);
}

/// A many-to-one reference. An empty `name` uses the other table's name.
pub fn belongs_to<A: Action, C: Dbo>(action: &mut A, value: &mut Ptr<C>, name: &str) {
    action.act_ptr(value, name, ForeignKeyConstraint::NONE);
}

pub fn belongs_to_with<A: Action, C: Dbo>(
    action: &mut A,
    value: &mut Ptr<C>,
    name: &str,
    fk: ForeignKeyConstraint,
) {
    action.act_ptr(value, name, fk);
}

/// The collection side of a relation.
///
/// For [`RelationType::ManyToOne`], `join_name` is the `belongs_to` name in
/// the other class. For [`RelationType::ManyToMany`], it names the join table.
pub fn has_many<A: Action, C: Dbo>(
    action: &mut A,
    value: &mut Collection<Ptr<C>>,
    relation: RelationType,
    join_name: &str,
) {
    action.act_collection(value, relation, join_name, "", ForeignKeyConstraint::NONE);
}

/// Like [`has_many`], naming this side's join table column and its constraints.
pub fn has_many_with<A: Action, C: Dbo>(
    action: &mut A,
    value: &mut Collection<Ptr<C>>,
    relation: RelationType,
    join_name: &str,
    join_id: &str,
    fk: ForeignKeyConstraint,
) {
    action.act_collection(value, relation, join_name, join_id, fk);
}

/// The one side of a one-to-one relation held by the other class's `belongs_to`.
pub fn has_one<A: Action, C: Dbo>(action: &mut A, value: &mut WeakPtr<C>, join_name: &str) {
    action.act_weak_ptr(value, join_name);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_ids() {
        assert!(!<i64 as DboId>::invalid().is_valid());
        assert!(42_i64.is_valid());
        assert!(!String::invalid().is_valid());
        assert!("key".to_string().is_valid());
        assert_eq!(<i32 as DboId>::from_generated(7), Some(7));
        assert_eq!(<i32 as DboId>::from_generated(i64::MAX), None);
        assert_eq!(String::from_generated(1), None);
    }
}
