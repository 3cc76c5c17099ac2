//! SQLite SQL dialect.

use dbo_core::{DateTimeKind, Dialect, LimitQuery};

/// Dialect facts for SQLite 3.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn autoincrement_type(&self) -> &'static str {
        "integer"
    }

    fn autoincrement_sql(&self) -> &'static str {
        "autoincrement"
    }

    fn date_time_type(&self, kind: DateTimeKind) -> &'static str {
        match kind {
            DateTimeKind::Date | DateTimeKind::DateTime => "text",
            DateTimeKind::Time => "integer",
        }
    }

    fn blob_type(&self) -> &'static str {
        "blob"
    }

    fn boolean_type(&self) -> &'static str {
        "boolean"
    }

    fn text_type(&self, _size: i32) -> String {
        "text".to_string()
    }

    fn long_long_type(&self) -> &'static str {
        "integer"
    }

    fn limit_query_method(&self) -> LimitQuery {
        LimitQuery::Limit
    }

    fn support_alter_table(&self) -> bool {
        false
    }

    fn support_deferrable_fk_constraint(&self) -> bool {
        true
    }

    fn require_subquery_alias(&self) -> bool {
        false
    }

    fn max_identifier_length(&self) -> usize {
        128
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbo_core::SqlType;

    #[test]
    fn type_names() {
        let d = SqliteDialect;
        assert_eq!(d.type_name(SqlType::DateTime, 0), "text");
        assert_eq!(d.type_name(SqlType::Time, 0), "integer");
        assert_eq!(d.type_name(SqlType::Text, 20), "text");
        assert_eq!(d.type_name(SqlType::BigInt, 0), "integer");
        assert_eq!(d.type_name(SqlType::Double, 0), "double precision");
        assert!(d.support_deferrable_fk_constraint());
    }
}
