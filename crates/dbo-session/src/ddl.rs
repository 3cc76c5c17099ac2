//! Schema creation and removal from mapping metadata.
//!
//! Every mapped class gets one table: the id column, the version column,
//! then its fields and foreign keys in declaration order. Many-to-many
//! relations add a join table keyed on both foreign keys, with an index on
//! each of them. Foreign keys are declared inline as named constraints.

use crate::mapping::{MappingInfo, resolved};
use crate::{Session, SessionImpl};
use dbo_core::error::{SchemaError, SchemaErrorKind};
use dbo_core::{
    Dialect, Error, FieldInfo, ForeignKeyConstraint, RelationType, Result, bare_table_name,
    constraint_name, quote_ident, quote_table, shorten_identifier,
};
use std::collections::HashSet;

/// A foreign key column and the table it references.
struct ForeignKey<'a> {
    column: &'a str,
    name: &'a str,
    table: &'a str,
    id: &'a str,
    constraints: ForeignKeyConstraint,
}

fn foreign_key_sql(dialect: &dyn Dialect, table: &str, fk: &ForeignKey<'_>) -> String {
    let mut sql = format!(
        "constraint {} foreign key ({}) references {} ({}){}",
        quote_ident(&constraint_name(table, fk.name, dialect.max_identifier_length())),
        quote_ident(fk.column),
        quote_table(fk.table),
        quote_ident(fk.id),
        fk.constraints.sql_actions()
    );
    if dialect.support_deferrable_fk_constraint() {
        sql.push_str(" deferrable initially deferred");
    }
    sql
}

fn column_sql(dialect: &dyn Dialect, field: &FieldInfo) -> String {
    let mut sql = format!(
        "{} {}",
        quote_ident(&field.name),
        dialect.type_name(field.sql_type, field.size)
    );
    if !field.nullable || field.is_natural_id() {
        sql.push_str(" not null");
    }
    sql
}

fn create_table_sql(session: &SessionImpl, dialect: &dyn Dialect, info: &MappingInfo) -> Result<String> {
    let mut lines = Vec::with_capacity(info.fields.len() + 2);
    if info.id.surrogate {
        let mut id = format!(
            "{} {} primary key",
            quote_ident(&info.id.name),
            dialect.autoincrement_type()
        );
        let extra = dialect.autoincrement_sql();
        if !extra.is_empty() {
            id.push(' ');
            id.push_str(extra);
        }
        lines.push(id);
    }
    if let Some(version) = &info.version {
        lines.push(format!("{} integer not null", quote_ident(version)));
    }

    let mut foreign_keys = Vec::new();
    for field in &info.fields {
        lines.push(column_sql(dialect, field));
        if field.is_foreign_key() {
            let other = session.mapping_by_table(&field.foreign_key_table)?;
            foreign_keys.push(foreign_key_sql(
                dialect,
                &info.table,
                &ForeignKey {
                    column: &field.name,
                    name: &field.foreign_key_name,
                    table: &field.foreign_key_table,
                    id: &other.id_column().name,
                    constraints: field.fk_constraints,
                },
            ));
        }
    }
    if !info.id.surrogate {
        lines.push(format!("primary key ({})", quote_ident(&info.id.name)));
    }
    lines.extend(foreign_keys);

    Ok(format!(
        "create table {} (\n  {}\n)",
        quote_table(&info.table),
        lines.join(",\n  ")
    ))
}

/// One side of a join table.
struct JoinSide<'a> {
    info: &'a MappingInfo,
    column: &'a str,
    constraints: ForeignKeyConstraint,
}

fn join_table_sql(dialect: &dyn Dialect, join_table: &str, sides: [JoinSide<'_>; 2]) -> Vec<String> {
    let mut lines: Vec<String> = sides
        .iter()
        .map(|side| {
            format!(
                "{} {} not null",
                quote_ident(side.column),
                dialect.type_name(side.info.id.sql_type, side.info.id.size)
            )
        })
        .collect();
    lines.push(format!(
        "primary key ({}, {})",
        quote_ident(sides[0].column),
        quote_ident(sides[1].column)
    ));
    for side in &sides {
        lines.push(foreign_key_sql(
            dialect,
            join_table,
            &ForeignKey {
                column: side.column,
                name: side.column,
                table: &side.info.table,
                id: &side.info.id.name,
                constraints: side.constraints,
            },
        ));
    }

    let mut statements = vec![format!(
        "create table {} (\n  {}\n)",
        quote_table(join_table),
        lines.join(",\n  ")
    )];
    for side in &sides {
        let index = shorten_identifier(
            &format!("{}_{}", bare_table_name(join_table), side.column),
            dialect.max_identifier_length(),
        );
        statements.push(format!(
            "create index {} on {} ({})",
            quote_ident(&index),
            quote_table(join_table),
            quote_ident(side.column)
        ));
    }
    statements
}

impl SessionImpl {
    /// Join tables of all many-to-many relations, each once.
    fn join_tables(&self) -> Result<Vec<(String, Vec<String>)>> {
        let dialect = self.dialect()?;
        let mut seen = HashSet::new();
        let mut tables = Vec::new();
        for mapping in self.mappings() {
            let info = mapping.info(self)?;
            for relation in &resolved(self, &info)?.relations {
                let set = &relation.set;
                if set.relation != RelationType::ManyToMany || !seen.insert(set.join_name.clone()) {
                    continue;
                }
                let other = self.mapping_by_table(&set.table_name)?.info(self)?;
                let statements = join_table_sql(
                    dialect.as_ref(),
                    &set.join_name,
                    [
                        JoinSide {
                            info: &info,
                            column: &set.join_self_id,
                            constraints: set.fk_constraints,
                        },
                        JoinSide {
                            info: &other,
                            column: &set.join_other_id,
                            constraints: set.other_fk_constraints,
                        },
                    ],
                );
                tables.push((set.join_name.clone(), statements));
            }
        }
        Ok(tables)
    }

    pub(crate) fn schema_statements(&self) -> Result<Vec<String>> {
        let dialect = self.dialect()?;
        let mut statements = Vec::new();
        for mapping in self.mappings() {
            let info = mapping.info(self)?;
            statements.push(create_table_sql(self, dialect.as_ref(), &info)?);
        }
        for (_, join) in self.join_tables()? {
            statements.extend(join);
        }
        Ok(statements)
    }

    fn drop_statements(&self) -> Result<Vec<String>> {
        let mut statements: Vec<String> = self
            .join_tables()?
            .into_iter()
            .map(|(table, _)| format!("drop table {}", quote_table(&table)))
            .collect();
        statements.extend(
            self.mappings()
                .iter()
                .rev()
                .map(|m| format!("drop table {}", quote_table(m.table_name()))),
        );
        Ok(statements)
    }

    /// Finalize cached statements, which may refer to tables about to change.
    fn forget_statements(&self) -> Result<()> {
        self.with_connection(|conn| {
            conn.clear_statement_cache();
            Ok(())
        })?;
        self.bump_generation();
        Ok(())
    }
}

fn schema_error(kind: SchemaErrorKind, sql: &str, err: Error) -> Error {
    Error::Schema(SchemaError {
        kind,
        sql: Some(sql.to_string()),
        message: err.to_string(),
        source: Some(Box::new(err)),
    })
}

impl Session {
    /// The statements [`create_tables`](Self::create_tables) would run.
    pub fn table_creation_sql(&self) -> Result<String> {
        let statements = self.inner.schema_statements()?;
        Ok(statements
            .iter()
            .map(|sql| format!("{sql};\n"))
            .collect())
    }

    /// Create the tables of all mapped classes.
    ///
    /// Runs in its own transaction; if any statement fails nothing is
    /// created and the error carries the failing statement.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn create_tables(&self) -> Result<()> {
        let statements = self.inner.schema_statements()?;
        let tx = self.begin()?;
        for sql in &statements {
            tracing::debug!(sql = %sql, "Creating schema");
            self.inner
                .execute_sql(sql)
                .map_err(|err| schema_error(SchemaErrorKind::Create, sql, err))?;
        }
        tx.commit()?;
        tracing::info!(statements = statements.len(), "Created tables");
        Ok(())
    }

    /// Drop the tables of all mapped classes, join tables first.
    ///
    /// Fails when a table does not exist.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn drop_tables(&self) -> Result<()> {
        let statements = self.inner.drop_statements()?;
        let tx = self.begin()?;
        self.inner.flush()?;
        self.inner.forget_statements()?;
        for sql in &statements {
            tracing::debug!(sql = %sql, "Dropping schema");
            self.inner
                .execute_sql(sql)
                .map_err(|err| schema_error(SchemaErrorKind::Drop, sql, err))?;
        }
        tx.commit()?;
        tracing::info!(statements = statements.len(), "Dropped tables");
        Ok(())
    }
}
