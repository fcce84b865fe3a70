//! Bootstrap against a real SQL Server container.
//!
//! Requires Docker and pulls a large image, so these tests are ignored by
//! default. Run with `cargo nextest run --run-ignored only -E 'test(real_server)'`.

#![cfg(feature = "mssql")]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use sqlfixture_core::{BootstrapConfig, Environment, Readiness, select_driver};
use std::time::Duration;
use testcontainers_modules::mssql_server::MssqlServer;
use testcontainers_modules::testcontainers::runners::SyncRunner;

const SA_PASSWORD: &str = "Strong(!)Fixture1";

fn config_for(port: u16) -> BootstrapConfig {
    BootstrapConfig::new("127.0.0.1")
        .with_port(port)
        .with_drivers(["ODBC Driver 18 for SQL Server"])
        .with_passwords(["wrong-password", SA_PASSWORD])
        .with_databases(["master"])
        .with_wait(30, Duration::from_secs(2))
        .with_init_script(None)
}

#[test]
#[ignore = "requires Docker"]
fn test_real_server_bootstrap_and_seed() {
    let container = MssqlServer::default()
        .with_accept_eula()
        .with_sa_password(SA_PASSWORD)
        .start()
        .expect("Failed to start SQL Server container");
    let port = container
        .get_host_port_ipv4(1433)
        .expect("Failed to get SQL Server port");

    let environment = Environment::new(config_for(port), select_driver());
    let outcome = environment.ensure_ready();
    assert!(outcome.is_ready(), "bootstrap failed: {outcome:?}");

    let profile = outcome.target().and_then(|t| t.profile()).unwrap();
    assert_eq!(profile.password(), SA_PASSWORD);

    let mut conn = environment.connection().unwrap();
    conn.ping().unwrap();

    let result = environment.validate();
    assert!(result.data_available, "{result:?}");
    assert_eq!(
        result.per_table_row_counts.get("dbo.pipeline_customers"),
        Some(&3)
    );

    // A second seed finds everything in place.
    assert!(environment.seed().unwrap().skipped);
}

#[test]
#[ignore = "requires Docker"]
fn test_real_server_wrong_passwords_fail_readiness() {
    let container = MssqlServer::default()
        .with_accept_eula()
        .with_sa_password(SA_PASSWORD)
        .start()
        .expect("Failed to start SQL Server container");
    let port = container
        .get_host_port_ipv4(1433)
        .expect("Failed to get SQL Server port");

    let config = config_for(port)
        .with_passwords(["wrong-password"])
        .with_wait(3, Duration::from_secs(1));
    let environment = Environment::new(config, select_driver());

    let outcome = environment.ensure_ready();
    assert!(matches!(outcome, Readiness::Failed(_)), "{outcome:?}");
}
