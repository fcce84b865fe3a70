//! End-to-end bootstrap tests against the scripted driver.
//!
//! This test suite covers:
//! - Exactly-once initialization under concurrent callers
//! - Skipping when the driver library is unavailable
//! - Initializer timeout enforcement
//! - Failure outcomes that are never retried
//! - The seeder fallback policy around initializer failures

#![allow(clippy::unwrap_used)]

mod common;

use common::{DRIVER_17, ScriptedDriver, VirtualClock, scripted_config, write_script};
use sqlfixture_core::{
    BootstrapConfig, BootstrapError, BootstrapStage, Driver, Environment, Readiness,
    UnavailableDriver, default_fixtures,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn scripted_environment(config: BootstrapConfig) -> (Environment, Arc<ScriptedDriver>) {
    let clock = VirtualClock::default();
    let driver = Arc::new(ScriptedDriver::new(&clock).accepting(DRIVER_17, "p2", "db1"));
    let environment = Environment::new(config, Arc::clone(&driver) as Arc<dyn Driver>)
        .with_sleeper(clock.sleeper());
    (environment, driver)
}

#[cfg(unix)]
#[test]
fn test_concurrent_callers_run_initializer_once() {
    let dir = tempfile::tempdir().unwrap();
    let counter = dir.path().join("runs.log");
    let script = write_script(
        &dir,
        "init.sh",
        &format!("sleep 1\necho run >> '{}'\n", counter.display()),
    );
    let (environment, _driver) =
        scripted_environment(scripted_config().with_init_script(Some(script)));
    let environment = Arc::new(environment);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let environment = Arc::clone(&environment);
            std::thread::spawn(move || environment.ensure_ready())
        })
        .collect();
    let outcomes: Vec<Readiness> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(outcomes.iter().all(Readiness::is_ready), "{outcomes:?}");
    assert!(outcomes.iter().all(|o| o == &outcomes[0]));
    let runs = std::fs::read_to_string(&counter).unwrap();
    assert_eq!(runs.lines().count(), 1);

    // Later callers reuse the decided outcome and the promoted target.
    assert_eq!(environment.ensure_ready(), outcomes[0]);
    assert_eq!(environment.resolved_target(), outcomes[0].target());
    assert!(environment.connection().is_ok());
}

#[test]
fn test_unavailable_driver_skips_without_failing() {
    let environment = Environment::new(scripted_config(), Arc::new(UnavailableDriver));

    let outcome = environment.ensure_ready();
    assert!(matches!(outcome, Readiness::Skipped { .. }));
    assert!(outcome.is_usable());
    assert!(
        outcome
            .skip_message()
            .unwrap()
            .starts_with("database tests skipped")
    );
    assert!(matches!(
        environment.connection(),
        Err(BootstrapError::DriverUnavailable)
    ));
}

#[cfg(unix)]
#[test]
fn test_initializer_timeout_fails_bootstrap() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(&dir, "hang.sh", "echo waiting for nothing\nexec sleep 60\n");
    let config = scripted_config()
        .with_init_script(Some(script))
        .with_init_timeout(Duration::from_secs(1));
    let (environment, _driver) = scripted_environment(config);

    let started = Instant::now();
    let outcome = environment.ensure_ready();

    assert!(started.elapsed() < Duration::from_secs(15));
    let Readiness::Failed(failure) = &outcome else {
        unreachable!("expected a failed outcome, got {outcome:?}");
    };
    assert_eq!(failure.stage, BootstrapStage::Initializer);
    assert!(failure.message.contains("timed out"));
    assert!(
        failure
            .diagnostics
            .as_deref()
            .unwrap_or_default()
            .contains("waiting for nothing")
    );
    assert!(environment.resolved_target().is_none());
}

#[test]
fn test_failed_bootstrap_is_not_retried() {
    let clock = VirtualClock::default();
    // Nothing is accepted, so every pass is rejected.
    let driver = Arc::new(ScriptedDriver::new(&clock));
    let config = scripted_config().with_wait(3, Duration::from_secs(2));
    let environment = Environment::new(config, Arc::clone(&driver) as Arc<dyn Driver>)
        .with_sleeper(clock.sleeper());

    let first = environment.ensure_ready();
    let probes_after_first = driver.attempts().len();
    let second = environment.ensure_ready();

    assert_eq!(first, second);
    let Readiness::Failed(failure) = &first else {
        unreachable!("expected a failed outcome, got {first:?}");
    };
    assert_eq!(failure.stage, BootstrapStage::Readiness);
    assert_eq!(probes_after_first, 12);
    assert_eq!(driver.attempts().len(), probes_after_first);
    assert_eq!(clock.sleeps(), vec![Duration::from_secs(2); 2]);

    let err = environment.connection().err().unwrap();
    assert!(matches!(err, BootstrapError::NotReady { .. }));
    assert!(err.to_string().contains("readiness stage failed"));
}

#[test]
fn test_missing_initializer_seeds_fixtures() {
    let dir = tempfile::tempdir().unwrap();
    let config =
        scripted_config().with_init_script(Some(dir.path().join("not_there.sh")));
    let (environment, driver) = scripted_environment(config);

    assert!(environment.ensure_ready().is_ready());

    let db = driver.database();
    for spec in default_fixtures() {
        assert!(db.has_table(&spec.table_name()), "{} missing", spec.table);
        assert_eq!(db.rows(&spec.table_name()), spec.seed_rows.len());
    }
}

#[test]
fn test_seeding_failure_without_initializer_is_fatal() {
    let (environment, driver) = scripted_environment(scripted_config());
    driver.database().set_read_only(true);

    let outcome = environment.ensure_ready();
    let Readiness::Failed(failure) = &outcome else {
        unreachable!("expected a failed outcome, got {outcome:?}");
    };
    assert_eq!(failure.stage, BootstrapStage::Seeding);
    assert!(failure.message.contains("pipeline_customers"));
}

#[cfg(unix)]
#[test]
fn test_initializer_failure_is_fatal_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(&dir, "init.sh", "echo schema step failed >&2\nexit 2\n");
    let (environment, driver) =
        scripted_environment(scripted_config().with_init_script(Some(script)));

    let outcome = environment.ensure_ready();
    let Readiness::Failed(failure) = &outcome else {
        unreachable!("expected a failed outcome, got {outcome:?}");
    };
    assert_eq!(failure.stage, BootstrapStage::Initializer);
    assert!(failure.message.contains("exited with code 2"));
    assert!(
        failure
            .diagnostics
            .as_deref()
            .unwrap_or_default()
            .contains("schema step failed")
    );
    assert_eq!(driver.database().create_count(), 0);
}

#[cfg(unix)]
#[test]
fn test_seeder_fallback_after_initializer_failure() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(&dir, "init.sh", "exit 2\n");
    let config = scripted_config()
        .with_init_script(Some(script))
        .with_seed_after_initializer_failure(true);
    let (environment, driver) = scripted_environment(config);

    assert!(environment.ensure_ready().is_ready());
    assert_eq!(driver.database().create_count(), default_fixtures().len());
}

#[cfg(unix)]
#[test]
fn test_failed_fallback_reports_initializer_error() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(&dir, "init.sh", "exit 2\n");
    let config = scripted_config()
        .with_init_script(Some(script))
        .with_seed_after_initializer_failure(true);
    let (environment, driver) = scripted_environment(config);
    driver.database().set_read_only(true);

    let outcome = environment.ensure_ready();
    let Readiness::Failed(failure) = &outcome else {
        unreachable!("expected a failed outcome, got {outcome:?}");
    };
    assert_eq!(failure.stage, BootstrapStage::Initializer);
}

#[cfg(unix)]
#[test]
fn test_seeding_problems_after_initializer_are_tolerated() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(&dir, "init.sh", "echo provisioned\n");
    let (environment, driver) =
        scripted_environment(scripted_config().with_init_script(Some(script)));
    driver.database().set_read_only(true);

    assert!(environment.ensure_ready().is_ready());
}
