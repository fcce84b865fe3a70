//! T-SQL rendering for introspection and guarded seeding.
//!
//! Identifiers are bracket-quoted and values rendered as escaped literals;
//! nothing user-supplied is spliced into SQL unquoted.

use super::{FixtureTableSpec, SeedRow, SqlValue, TableName};
use crate::driver::DriverError;

/// Quotes an identifier as `[name]`, doubling any `]`.
pub fn quote_identifier(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// Renders a Unicode string literal, doubling any `'`.
pub fn quote_literal(value: &str) -> String {
    format!("N'{}'", value.replace('\'', "''"))
}

impl SqlValue {
    /// Renders the value as a T-SQL literal.
    ///
    /// Non-finite floats have no T-SQL literal and render as `NULL`.
    pub fn to_literal(&self) -> String {
        match self {
            Self::Null => "NULL".to_string(),
            Self::Bool(value) => (if *value { "1" } else { "0" }).to_string(),
            Self::Int(value) => value.to_string(),
            Self::Float(value) if value.is_finite() => value.to_string(),
            Self::Float(_) => "NULL".to_string(),
            Self::Text(value) => quote_literal(value),
        }
    }
}

/// Counts matching base tables in `INFORMATION_SCHEMA.TABLES`.
pub fn table_exists(table: &TableName) -> String {
    format!(
        "SELECT COUNT_BIG(*) FROM INFORMATION_SCHEMA.TABLES \
         WHERE TABLE_SCHEMA = {} AND TABLE_NAME = {} AND TABLE_TYPE = 'BASE TABLE'",
        quote_literal(&table.schema),
        quote_literal(&table.name)
    )
}

/// Exact row count of a table.
pub fn row_count(table: &TableName) -> String {
    format!("SELECT COUNT_BIG(*) FROM {}", table.qualified())
}

/// Wraps the fixture's DDL so it is a no-op when the table already exists.
pub fn guarded_create(spec: &FixtureTableSpec) -> String {
    let table = spec.table_name();
    format!(
        "IF OBJECT_ID({}, N'U') IS NULL\nBEGIN\n{}\nEND",
        quote_literal(&table.qualified()),
        spec.create_ddl.trim().trim_end_matches(';')
    )
}

/// Inserts `row` only when no row with the same key exists.
///
/// The existence check takes `UPDLOCK, HOLDLOCK` inside one transaction so
/// two concurrent seeders cannot both decide to insert.
///
/// # Errors
/// Returns [`DriverError::InvalidParameters`] if the row has no non-null
/// key value.
pub fn guarded_insert(spec: &FixtureTableSpec, row: &SeedRow) -> Result<String, DriverError> {
    let key = match row.get(&spec.key_column) {
        Some(SqlValue::Null) | None => {
            return Err(DriverError::InvalidParameters(format!(
                "seed row for {} has no value for key column '{}'",
                spec.table_name(),
                spec.key_column
            )));
        }
        Some(value) => value,
    };

    let table = spec.table_name().qualified();
    let columns = row
        .0
        .keys()
        .map(|column| quote_identifier(column))
        .collect::<Vec<_>>()
        .join(", ");
    let values = row
        .0
        .values()
        .map(SqlValue::to_literal)
        .collect::<Vec<_>>()
        .join(", ");

    Ok(format!(
        "SET XACT_ABORT ON;\n\
         BEGIN TRANSACTION;\n\
         IF NOT EXISTS (SELECT 1 FROM {table} WITH (UPDLOCK, HOLDLOCK) WHERE {key_column} = {key})\n\
         \x20   INSERT INTO {table} ({columns}) VALUES ({values});\n\
         COMMIT TRANSACTION;",
        key_column = quote_identifier(&spec.key_column),
        key = key.to_literal(),
    ))
}
