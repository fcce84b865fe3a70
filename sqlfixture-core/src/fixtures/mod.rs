//! Fixture table contract.
//!
//! A [`FixtureTableSpec`] describes one table the test suite depends on:
//! how to create it and which rows must exist. The built-in set covers the
//! data-pipeline suites; a JSON file can replace it.
//!
//! # JSON format
//! ```json
//! [
//!   {
//!     "schema": "dbo",
//!     "table": "pipeline_customers",
//!     "create_ddl": "CREATE TABLE [dbo].[pipeline_customers] (customer_id INT PRIMARY KEY)",
//!     "key_column": "customer_id",
//!     "seed_rows": [ { "customer_id": 1 } ]
//!   }
//! ]
//! ```

use crate::error::{BootstrapError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

mod seeder;
pub mod sql;

pub use seeder::{SeedReport, ValidationResult, ensure_minimal_fixtures, validate};

/// Schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableName {
    /// Owning schema
    pub schema: String,
    /// Table name within the schema
    pub name: String,
}

impl TableName {
    /// Creates a table name.
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Bracket-quoted `[schema].[name]`.
    pub fn qualified(&self) -> String {
        format!(
            "{}.{}",
            sql::quote_identifier(&self.schema),
            sql::quote_identifier(&self.name)
        )
    }
}

impl std::fmt::Display for TableName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// A literal value in a seed row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    /// SQL `NULL`
    Null,
    /// Rendered as `1` / `0`
    Bool(bool),
    /// Integer literal
    Int(i64),
    /// Floating-point literal
    Float(f64),
    /// Unicode string literal
    Text(String),
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

/// One seed row: column name to value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeedRow(pub BTreeMap<String, SqlValue>);

impl SeedRow {
    /// Builds a row from `(column, value)` pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<SqlValue>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Value of `column`, if present.
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.0.get(column)
    }
}

fn default_schema() -> String {
    "dbo".to_string()
}

/// Static description of a table the tests rely on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureTableSpec {
    /// Owning schema
    #[serde(default = "default_schema")]
    pub schema: String,
    /// Table name
    pub table: String,
    /// `CREATE TABLE` statement; wrapped in an existence guard when run
    pub create_ddl: String,
    /// Natural key used to decide whether a seed row already exists
    pub key_column: String,
    /// Rows that must exist
    #[serde(default)]
    pub seed_rows: Vec<SeedRow>,
}

impl FixtureTableSpec {
    /// Creates a spec in the `dbo` schema with no seed rows.
    pub fn new(
        table: impl Into<String>,
        create_ddl: impl Into<String>,
        key_column: impl Into<String>,
    ) -> Self {
        Self {
            schema: default_schema(),
            table: table.into(),
            create_ddl: create_ddl.into(),
            key_column: key_column.into(),
            seed_rows: Vec::new(),
        }
    }

    /// Builder method to set the schema.
    #[must_use]
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    /// Builder method to append a seed row.
    #[must_use]
    pub fn with_row(mut self, row: SeedRow) -> Self {
        self.seed_rows.push(row);
        self
    }

    /// Qualified name of the table.
    pub fn table_name(&self) -> TableName {
        TableName::new(&self.schema, &self.table)
    }

    /// Checks the fixture is usable for guarded seeding.
    ///
    /// # Errors
    /// Returns a configuration error if names or DDL are empty, or a seed
    /// row lacks a non-null key value.
    pub fn validate(&self) -> Result<()> {
        if self.schema.trim().is_empty() || self.table.trim().is_empty() {
            return Err(BootstrapError::configuration(
                "fixture schema and table names cannot be empty",
            ));
        }
        if self.create_ddl.trim().is_empty() {
            return Err(BootstrapError::configuration(format!(
                "fixture {} has no create_ddl",
                self.table_name()
            )));
        }
        if self.key_column.trim().is_empty() {
            return Err(BootstrapError::configuration(format!(
                "fixture {} has no key_column",
                self.table_name()
            )));
        }
        for (index, row) in self.seed_rows.iter().enumerate() {
            match row.get(&self.key_column) {
                None | Some(SqlValue::Null) => {
                    return Err(BootstrapError::configuration(format!(
                        "seed row {index} of {} has no value for key column '{}'",
                        self.table_name(),
                        self.key_column
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// Tables the data-pipeline suites read and write.
pub fn default_fixtures() -> Vec<FixtureTableSpec> {
    vec![
        FixtureTableSpec::new(
            "pipeline_customers",
            "CREATE TABLE [dbo].[pipeline_customers] (\
                customer_id INT NOT NULL PRIMARY KEY, \
                customer_name NVARCHAR(200) NOT NULL, \
                segment NVARCHAR(50) NULL, \
                created_at DATETIME2 NOT NULL DEFAULT SYSUTCDATETIME())",
            "customer_id",
        )
        .with_row(SeedRow::from_pairs([
            ("customer_id", SqlValue::Int(1)),
            ("customer_name", "Acme Analytics".into()),
            ("segment", "enterprise".into()),
        ]))
        .with_row(SeedRow::from_pairs([
            ("customer_id", SqlValue::Int(2)),
            ("customer_name", "Northwind Traders".into()),
            ("segment", "smb".into()),
        ]))
        .with_row(SeedRow::from_pairs([
            ("customer_id", SqlValue::Int(3)),
            ("customer_name", "O'Brien & Sons".into()),
            ("segment", SqlValue::Null),
        ])),
        FixtureTableSpec::new(
            "pipeline_scores",
            "CREATE TABLE [dbo].[pipeline_scores] (\
                score_id INT NOT NULL PRIMARY KEY, \
                customer_id INT NOT NULL, \
                model_name NVARCHAR(100) NOT NULL, \
                score DECIMAL(9, 4) NOT NULL)",
            "score_id",
        )
        .with_row(SeedRow::from_pairs([
            ("score_id", SqlValue::Int(100)),
            ("customer_id", SqlValue::Int(1)),
            ("model_name", "churn_v2".into()),
            ("score", SqlValue::Float(0.8125)),
        ]))
        .with_row(SeedRow::from_pairs([
            ("score_id", SqlValue::Int(101)),
            ("customer_id", SqlValue::Int(2)),
            ("model_name", "churn_v2".into()),
            ("score", SqlValue::Float(0.2)),
        ])),
        FixtureTableSpec::new(
            "pipeline_delivery_log",
            "CREATE TABLE [dbo].[pipeline_delivery_log] (\
                delivery_id INT IDENTITY(1, 1) NOT NULL PRIMARY KEY, \
                file_name NVARCHAR(260) NOT NULL, \
                delivered_at DATETIME2 NULL)",
            "delivery_id",
        ),
    ]
}

/// Loads fixture specs from a JSON file and validates each one.
///
/// # Errors
/// Returns an error if the file cannot be read or parsed, or a spec is invalid.
pub fn load_fixtures_file(path: &Path) -> Result<Vec<FixtureTableSpec>> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        BootstrapError::io(
            format!("failed to read fixtures file {}", path.display()),
            e,
        )
    })?;
    let specs: Vec<FixtureTableSpec> =
        serde_json::from_str(&contents).map_err(|e| BootstrapError::Serialization {
            context: format!("invalid fixtures file {}", path.display()),
            source: e,
        })?;
    for spec in &specs {
        spec.validate()?;
    }
    Ok(specs)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_fixtures_are_valid() {
        let fixtures = default_fixtures();
        assert_eq!(fixtures.len(), 3);
        for spec in &fixtures {
            assert!(spec.validate().is_ok(), "{} should be valid", spec.table);
        }
        assert!(fixtures[2].seed_rows.is_empty());
    }

    #[test]
    fn test_seed_row_without_key_is_rejected() {
        let spec = FixtureTableSpec::new("t", "CREATE TABLE t (id INT)", "id")
            .with_row(SeedRow::from_pairs([("name", "x")]));
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("key column 'id'"));

        let spec = FixtureTableSpec::new("t", "CREATE TABLE t (id INT)", "id")
            .with_row(SeedRow::from_pairs([("id", SqlValue::Null)]));
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_fixture_spec_json_shape() {
        let json = r#"[
            {
                "table": "orders",
                "create_ddl": "CREATE TABLE [dbo].[orders] (order_id INT PRIMARY KEY, note NVARCHAR(10))",
                "key_column": "order_id",
                "seed_rows": [
                    { "order_id": 7, "note": "first", "paid": true, "total": 12.5, "coupon": null }
                ]
            }
        ]"#;

        let specs: Vec<FixtureTableSpec> = serde_json::from_str(json).unwrap();
        assert_eq!(specs[0].schema, "dbo");
        let row = &specs[0].seed_rows[0];
        assert_eq!(row.get("order_id"), Some(&SqlValue::Int(7)));
        assert_eq!(row.get("note"), Some(&SqlValue::Text("first".to_string())));
        assert_eq!(row.get("paid"), Some(&SqlValue::Bool(true)));
        assert_eq!(row.get("total"), Some(&SqlValue::Float(12.5)));
        assert_eq!(row.get("coupon"), Some(&SqlValue::Null));
    }

    #[test]
    fn test_load_fixtures_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixtures.json");
        let specs = default_fixtures();
        std::fs::write(&path, serde_json::to_string_pretty(&specs).unwrap()).unwrap();

        let loaded = load_fixtures_file(&path).unwrap();
        assert_eq!(loaded, specs);
    }

    #[test]
    fn test_load_fixtures_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(matches!(
            load_fixtures_file(&missing),
            Err(BootstrapError::Io { .. })
        ));

        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "{ not json").unwrap();
        assert!(matches!(
            load_fixtures_file(&broken),
            Err(BootstrapError::Serialization { .. })
        ));
    }

    #[test]
    fn test_table_name_quoting() {
        let table = TableName::new("dbo", "odd]name");
        assert_eq!(table.qualified(), "[dbo].[odd]]name]");
        assert_eq!(table.to_string(), "dbo.odd]name");
    }
}
