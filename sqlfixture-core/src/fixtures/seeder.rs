//! Lightweight validation and minimal fixture seeding.
//!
//! The cheap path next to the external initializer: confirm the fixture
//! contract holds and repair only what is missing. Both operations are
//! idempotent; running them twice never duplicates rows.

use super::FixtureTableSpec;
use crate::driver::{Connection, DriverError};
use crate::error::{BootstrapError, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Snapshot of the fixture contract against a live database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    /// A connection was available to inspect
    pub connected: bool,
    /// Every fixture table exists
    pub required_tables_exist: bool,
    /// Every table with seed rows holds at least one row
    pub data_available: bool,
    /// Row counts keyed by `schema.table`; filled only when all tables exist
    pub per_table_row_counts: BTreeMap<String, u64>,
    /// Tables not found, as `schema.table`
    pub missing_tables: Vec<String>,
    /// First error encountered, if inspection stopped early
    pub error: Option<String>,
}

/// What [`ensure_minimal_fixtures`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    /// Data was already available; nothing was touched
    pub skipped: bool,
    /// Tables created, as `schema.table`
    pub tables_created: Vec<String>,
    /// Seed rows inserted
    pub rows_inserted: u64,
}

struct Inspection {
    existing: Vec<bool>,
    counts: Option<BTreeMap<String, u64>>,
}

impl Inspection {
    fn all_exist(&self) -> bool {
        self.existing.iter().all(|exists| *exists)
    }

    fn data_available(&self, specs: &[FixtureTableSpec]) -> bool {
        let Some(counts) = &self.counts else {
            return false;
        };
        specs
            .iter()
            .filter(|spec| !spec.seed_rows.is_empty())
            .all(|spec| {
                counts
                    .get(&spec.table_name().to_string())
                    .is_some_and(|count| *count > 0)
            })
    }
}

fn inspect(
    conn: &mut dyn Connection,
    specs: &[FixtureTableSpec],
) -> std::result::Result<Inspection, (String, DriverError)> {
    let mut existing = Vec::with_capacity(specs.len());
    for spec in specs {
        let table = spec.table_name();
        let exists = conn
            .table_exists(&table)
            .map_err(|e| (table.to_string(), e))?;
        existing.push(exists);
    }

    // Counting is only meaningful once the whole schema is in place.
    let counts = if existing.iter().all(|exists| *exists) {
        let mut counts = BTreeMap::new();
        for spec in specs {
            let table = spec.table_name();
            let count = conn.row_count(&table).map_err(|e| (table.to_string(), e))?;
            counts.insert(table.to_string(), count);
        }
        Some(counts)
    } else {
        None
    };

    Ok(Inspection { existing, counts })
}

/// Checks the fixture contract over an open connection.
///
/// Never fails; problems are reported through [`ValidationResult::error`].
pub fn validate(conn: &mut dyn Connection, specs: &[FixtureTableSpec]) -> ValidationResult {
    match inspect(conn, specs) {
        Ok(inspection) => {
            let missing_tables = specs
                .iter()
                .zip(&inspection.existing)
                .filter(|(_, exists)| !**exists)
                .map(|(spec, _)| spec.table_name().to_string())
                .collect();
            ValidationResult {
                connected: true,
                required_tables_exist: inspection.all_exist(),
                data_available: inspection.data_available(specs),
                per_table_row_counts: inspection.counts.clone().unwrap_or_default(),
                missing_tables,
                error: None,
            }
        }
        Err((table, error)) => ValidationResult {
            connected: true,
            error: Some(format!("failed to inspect {table}: {error}")),
            ..ValidationResult::default()
        },
    }
}

/// Creates missing fixture tables and inserts missing seed rows.
///
/// Does nothing when the data is already available. Table creation is
/// guarded by an existence check and every insert by a key lookup, so
/// repeated or concurrent runs never produce duplicates.
///
/// # Errors
/// Returns [`BootstrapError::SeedingFailed`] naming the table whose
/// inspection, creation, or insert failed.
pub fn ensure_minimal_fixtures(
    conn: &mut dyn Connection,
    specs: &[FixtureTableSpec],
) -> Result<SeedReport> {
    let inspection = inspect(conn, specs).map_err(|(table, error)| {
        BootstrapError::seeding_failed(table, "failed to inspect fixture table", error)
    })?;

    if inspection.data_available(specs) {
        debug!("Fixture data already available; seeding skipped");
        return Ok(SeedReport {
            skipped: true,
            ..SeedReport::default()
        });
    }

    let mut report = SeedReport::default();
    for (spec, exists) in specs.iter().zip(&inspection.existing) {
        let table = spec.table_name().to_string();

        if !exists {
            conn.create_table_if_absent(spec).map_err(|e| {
                BootstrapError::seeding_failed(&table, "failed to create fixture table", e)
            })?;
            info!("Created fixture table {}", table);
            report.tables_created.push(table.clone());
        }

        for row in &spec.seed_rows {
            let inserted = conn.insert_if_absent(spec, row).map_err(|e| {
                BootstrapError::seeding_failed(&table, "failed to insert seed row", e)
            })?;
            if inserted {
                report.rows_inserted = report.rows_inserted.saturating_add(1);
            }
        }
    }

    info!(
        "Seeded fixtures: {} table(s) created, {} row(s) inserted",
        report.tables_created.len(),
        report.rows_inserted
    );
    Ok(report)
}
