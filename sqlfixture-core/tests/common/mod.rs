//! Scripted driver and in-memory database shared by the integration tests.
//!
//! The driver accepts an explicit set of (driver, password, database)
//! triples and refuses every connection until a virtual clock passes a
//! configured boot delay. The clock only moves when the injected sleeper is
//! called, so readiness tests run instantly.

#![allow(dead_code, clippy::unwrap_used)]

use sqlfixture_core::fixtures::{FixtureTableSpec, SeedRow, TableName};
use sqlfixture_core::{
    BootstrapConfig, Connection, ConnectionTarget, Driver, DriverError, DriverResult, Sleeper,
};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const DRIVER_18: &str = "ODBC Driver 18 for SQL Server";
pub const DRIVER_17: &str = "ODBC Driver 17 for SQL Server";

/// Virtual time, advanced only by [`VirtualClock::sleeper`].
#[derive(Debug, Clone, Default)]
pub struct VirtualClock {
    millis: Arc<AtomicU64>,
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl VirtualClock {
    pub fn now(&self) -> Duration {
        Duration::from_millis(self.millis.load(Ordering::SeqCst))
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }

    pub fn sleeper(&self) -> Sleeper {
        let clock = self.clone();
        Arc::new(move |delay: Duration| {
            let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
            clock.millis.fetch_add(millis, Ordering::SeqCst);
            clock.sleeps.lock().unwrap().push(delay);
        })
    }
}

/// One connect call seen by the scripted driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeAttempt {
    pub driver: String,
    pub password: String,
    pub database: String,
}

/// Fake server state shared by every connection of one driver.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    tables: Arc<Mutex<BTreeMap<String, BTreeMap<String, SeedRow>>>>,
    read_only: Arc<Mutex<bool>>,
    creates: Arc<AtomicUsize>,
    inserts: Arc<AtomicUsize>,
}

impl MemoryDatabase {
    /// Rejects all DDL and inserts with a permission error.
    pub fn set_read_only(&self, read_only: bool) {
        *self.read_only.lock().unwrap() = read_only;
    }

    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn insert_count(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }

    pub fn rows(&self, table: &TableName) -> usize {
        self.tables
            .lock()
            .unwrap()
            .get(&table.qualified())
            .map_or(0, BTreeMap::len)
    }

    pub fn has_table(&self, table: &TableName) -> bool {
        self.tables.lock().unwrap().contains_key(&table.qualified())
    }

    fn check_writable(&self) -> DriverResult<()> {
        if *self.read_only.lock().unwrap() {
            return Err(DriverError::Server {
                code: 262,
                message: "permission denied in database".to_string(),
            });
        }
        Ok(())
    }
}

/// Connection to a [`MemoryDatabase`].
pub struct MemoryConnection {
    db: MemoryDatabase,
}

impl Connection for MemoryConnection {
    fn execute(&mut self, _sql: &str) -> DriverResult<u64> {
        Err(DriverError::Other("raw statements are not scripted".to_string()))
    }

    fn query_scalar(&mut self, _sql: &str) -> DriverResult<Option<i64>> {
        Ok(Some(1))
    }

    fn table_exists(&mut self, table: &TableName) -> DriverResult<bool> {
        Ok(self.db.has_table(table))
    }

    fn row_count(&mut self, table: &TableName) -> DriverResult<u64> {
        Ok(u64::try_from(self.db.rows(table)).unwrap_or(u64::MAX))
    }

    fn create_table_if_absent(&mut self, spec: &FixtureTableSpec) -> DriverResult<()> {
        self.db.check_writable()?;
        let mut tables = self.db.tables.lock().unwrap();
        if !tables.contains_key(&spec.table_name().qualified()) {
            tables.insert(spec.table_name().qualified(), BTreeMap::new());
            self.db.creates.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn insert_if_absent(&mut self, spec: &FixtureTableSpec, row: &SeedRow) -> DriverResult<bool> {
        self.db.check_writable()?;
        let key = row
            .get(&spec.key_column)
            .map(|value| value.to_literal())
            .ok_or_else(|| DriverError::InvalidParameters("missing key".to_string()))?;
        let mut tables = self.db.tables.lock().unwrap();
        let rows = tables
            .get_mut(&spec.table_name().qualified())
            .ok_or_else(|| DriverError::Server {
                code: 208,
                message: format!("Invalid object name '{}'", spec.table),
            })?;
        if rows.contains_key(&key) {
            return Ok(false);
        }
        rows.insert(key, row.clone());
        self.db.inserts.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}

/// Driver whose accepted logins and boot delay are set by the test.
pub struct ScriptedDriver {
    installed: HashSet<String>,
    accepted: Vec<ProbeAttempt>,
    reachable_after: Duration,
    clock: VirtualClock,
    attempts: Mutex<Vec<ProbeAttempt>>,
    db: MemoryDatabase,
}

impl ScriptedDriver {
    pub fn new(clock: &VirtualClock) -> Self {
        Self {
            installed: [DRIVER_18, DRIVER_17].into_iter().map(String::from).collect(),
            accepted: Vec::new(),
            reachable_after: Duration::ZERO,
            clock: clock.clone(),
            attempts: Mutex::new(Vec::new()),
            db: MemoryDatabase::default(),
        }
    }

    pub fn with_installed(mut self, drivers: &[&str]) -> Self {
        self.installed = drivers.iter().map(|d| (*d).to_string()).collect();
        self
    }

    pub fn accepting(mut self, driver: &str, password: &str, database: &str) -> Self {
        self.accepted.push(ProbeAttempt {
            driver: driver.to_string(),
            password: password.to_string(),
            database: database.to_string(),
        });
        self
    }

    pub const fn reachable_after(mut self, delay: Duration) -> Self {
        self.reachable_after = delay;
        self
    }

    pub fn database(&self) -> MemoryDatabase {
        self.db.clone()
    }

    pub fn attempts(&self) -> Vec<ProbeAttempt> {
        self.attempts.lock().unwrap().clone()
    }
}

impl Driver for ScriptedDriver {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn connect(
        &self,
        target: &ConnectionTarget,
        _timeout: Duration,
    ) -> DriverResult<Box<dyn Connection>> {
        let Some(profile) = target.profile() else {
            return Ok(Box::new(MemoryConnection {
                db: self.db.clone(),
            }));
        };

        let attempt = ProbeAttempt {
            driver: profile.driver.clone(),
            password: profile.password().to_string(),
            database: profile.database.clone(),
        };
        self.attempts.lock().unwrap().push(attempt.clone());

        if !self.installed.contains(&attempt.driver) {
            return Err(DriverError::DriverNotFound(attempt.driver));
        }
        if self.clock.now() < self.reachable_after {
            return Err(DriverError::Unreachable("connection refused".to_string()));
        }
        if self.accepted.contains(&attempt) {
            return Ok(Box::new(MemoryConnection {
                db: self.db.clone(),
            }));
        }
        let login_ok = self
            .accepted
            .iter()
            .any(|a| a.driver == attempt.driver && a.password == attempt.password);
        if login_ok {
            Err(DriverError::DatabaseUnavailable { code: 4060 })
        } else {
            Err(DriverError::LoginFailed { code: 18456 })
        }
    }
}

/// Configuration with no initializer and no waiting, for scripted runs.
pub fn scripted_config() -> BootstrapConfig {
    BootstrapConfig::new("localhost")
        .with_drivers([DRIVER_18, DRIVER_17])
        .with_passwords(["p1", "p2"])
        .with_databases(["db1"])
        .with_wait(1, Duration::from_secs(1))
        .with_init_script(None)
}

/// Writes an executable shell script into `dir`.
pub fn write_script(dir: &tempfile::TempDir, name: &str, body: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, body).unwrap();
    path
}
