//! Column and relation metadata collected from a mapped class.

use crate::identifiers::{quote_ident, quote_table};
use crate::types::SqlType;
use std::ops::BitOr;

/// Foreign key constraint flags for `belongs_to` and `has_many`.
///
/// Flags combine with `|` and only affect generated DDL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ForeignKeyConstraint(u8);

impl ForeignKeyConstraint {
    pub const NONE: Self = Self(0);
    pub const NOT_NULL: Self = Self(0x01);
    pub const ON_UPDATE_CASCADE: Self = Self(0x02);
    pub const ON_UPDATE_SET_NULL: Self = Self(0x04);
    pub const ON_DELETE_CASCADE: Self = Self(0x08);
    pub const ON_DELETE_SET_NULL: Self = Self(0x10);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// The `on update`/`on delete` clauses for these flags.
    pub fn sql_actions(self) -> String {
        let mut sql = String::new();
        if self.contains(Self::ON_UPDATE_CASCADE) {
            sql.push_str(" on update cascade");
        } else if self.contains(Self::ON_UPDATE_SET_NULL) {
            sql.push_str(" on update set null");
        }
        if self.contains(Self::ON_DELETE_CASCADE) {
            sql.push_str(" on delete cascade");
        } else if self.contains(Self::ON_DELETE_SET_NULL) {
            sql.push_str(" on delete set null");
        }
        sql
    }
}

impl BitOr for ForeignKeyConstraint {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// The kind of a `has_many` relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationType {
    /// The other side holds a foreign key to this side (`belongs_to`).
    ManyToOne,
    /// Both sides are linked through a join table.
    ManyToMany,
}

/// Per-column flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FieldFlags(u16);

impl FieldFlags {
    pub const NONE: Self = Self(0);
    /// The auto-generated surrogate key column.
    pub const SURROGATE_ID: Self = Self(0x001);
    /// The optimistic concurrency version column.
    pub const VERSION: Self = Self(0x002);
    /// The value may be changed through generic field access.
    pub const MUTABLE: Self = Self(0x004);
    /// The name is an expression that must not be quoted.
    pub const LITERAL: Self = Self(0x008);
    /// Part of a foreign key to another table.
    pub const FOREIGN_KEY: Self = Self(0x010);
    /// First column of a mapped object in a query result.
    pub const FIRST_DBO_FIELD: Self = Self(0x020);
    /// Part of a natural primary key.
    pub const NATURAL_ID: Self = Self(0x040);
    /// The select list already carries an `as` alias.
    pub const ALIASED_NAME: Self = Self(0x080);

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl BitOr for FieldFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Metadata for one column of a mapped table or query result.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    pub name: String,
    pub sql_type: SqlType,
    /// Declared size (0 when unbounded).
    pub size: i32,
    pub nullable: bool,
    /// Table or alias the column is read from in a query.
    pub qualifier: String,
    pub flags: FieldFlags,
    /// Referenced table for foreign key columns.
    pub foreign_key_table: String,
    /// Relation name for foreign key columns (`belongs_to` name).
    pub foreign_key_name: String,
    pub fk_constraints: ForeignKeyConstraint,
}

impl FieldInfo {
    pub fn new(name: impl Into<String>, sql_type: SqlType, size: i32) -> Self {
        Self {
            name: name.into(),
            sql_type,
            size,
            nullable: false,
            qualifier: String::new(),
            flags: FieldFlags::MUTABLE,
            foreign_key_table: String::new(),
            foreign_key_name: String::new(),
            fk_constraints: ForeignKeyConstraint::NONE,
        }
    }

    /// A literal SQL expression, such as a computed select-list item.
    pub fn expression(expr: impl Into<String>, sql_type: SqlType) -> Self {
        let mut info = Self::new(expr, sql_type, 0);
        info.flags = FieldFlags::LITERAL;
        info
    }

    pub fn with_flags(mut self, flags: FieldFlags) -> Self {
        self.flags.insert(flags);
        self
    }

    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = qualifier.into();
        self
    }

    pub fn is_surrogate_id(&self) -> bool {
        self.flags.contains(FieldFlags::SURROGATE_ID)
    }

    pub fn is_version(&self) -> bool {
        self.flags.contains(FieldFlags::VERSION)
    }

    pub fn is_natural_id(&self) -> bool {
        self.flags.contains(FieldFlags::NATURAL_ID)
    }

    pub fn is_foreign_key(&self) -> bool {
        self.flags.contains(FieldFlags::FOREIGN_KEY)
    }

    pub fn is_first_dbo_field(&self) -> bool {
        self.flags.contains(FieldFlags::FIRST_DBO_FIELD)
    }

    pub fn is_mutable(&self) -> bool {
        self.flags.contains(FieldFlags::MUTABLE)
    }

    pub fn is_aliased(&self) -> bool {
        self.flags.contains(FieldFlags::ALIASED_NAME)
    }

    /// The column as it appears in SQL: quoted and qualified.
    pub fn sql(&self) -> String {
        if self.flags.contains(FieldFlags::LITERAL) {
            return self.name.clone();
        }
        if self.qualifier.is_empty() {
            quote_ident(&self.name)
        } else {
            format!("{}.{}", quote_table(&self.qualifier), quote_ident(&self.name))
        }
    }
}

/// Metadata for one `has_many` / `has_one` relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetInfo {
    /// Table of the related class.
    pub table_name: String,
    /// Join column (`ManyToOne`) or join table (`ManyToMany`) name.
    pub join_name: String,
    /// Column holding this side's id in the join table.
    pub join_self_id: String,
    /// Column holding the other side's id in the join table.
    pub join_other_id: String,
    pub relation: RelationType,
    pub fk_constraints: ForeignKeyConstraint,
    pub other_fk_constraints: ForeignKeyConstraint,
    /// A `has_one` relation (weak pointer) rather than a collection.
    pub weak: bool,
}

impl SetInfo {
    pub fn new(
        table_name: impl Into<String>,
        relation: RelationType,
        join_name: impl Into<String>,
        join_self_id: impl Into<String>,
        fk_constraints: ForeignKeyConstraint,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            join_name: join_name.into(),
            join_self_id: join_self_id.into(),
            join_other_id: String::new(),
            relation,
            fk_constraints,
            other_fk_constraints: ForeignKeyConstraint::NONE,
            weak: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_flags_combine() {
        let c = ForeignKeyConstraint::NOT_NULL | ForeignKeyConstraint::ON_DELETE_CASCADE;
        assert!(c.contains(ForeignKeyConstraint::NOT_NULL));
        assert!(!c.contains(ForeignKeyConstraint::ON_UPDATE_CASCADE));
        assert!(!c.contains(ForeignKeyConstraint::NONE));
        assert_eq!(c.sql_actions(), " on delete cascade");
        let c = ForeignKeyConstraint::ON_UPDATE_SET_NULL | ForeignKeyConstraint::ON_DELETE_SET_NULL;
        assert_eq!(c.sql_actions(), " on update set null on delete set null");
    }

    #[test]
    fn field_sql_is_quoted_and_qualified() {
        let f = FieldInfo::new("name", SqlType::Text, 0).with_qualifier("a");
        assert_eq!(f.sql(), "\"a\".\"name\"");
        let f = FieldInfo::new("name", SqlType::Text, 0);
        assert_eq!(f.sql(), "\"name\"");
        let f = FieldInfo::expression("count(*)", SqlType::BigInt);
        assert_eq!(f.sql(), "count(*)");
        assert!(!f.is_mutable());
    }
}
