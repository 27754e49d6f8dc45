//! End-to-end controller tests against fake infrastructure.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use detest_core::report::UnitStatus;
use detest_runner::driver::CANCELLED_CAUSE;
use detest_runner::{DiscoveryPolicy, OrchestrationError, Orchestrator, Registry};
use tokio_util::sync::CancellationToken;

use common::*;

const CHECKS: &[&str] = &["first", "last"];

fn orchestrator(
    trace: &Trace,
    config: detest_core::config::ProjectConfig,
    options: detest_runner::RunOptions,
) -> Orchestrator {
    Orchestrator::new(
        config,
        Arc::new(FakeProvisioner::new(trace)),
        Arc::new(FakeLauncher::new(trace)),
        options,
    )
}

#[tokio::test]
async fn two_slots_two_units_one_failure() {
    let url = spawn_http_stub().await;
    let trace = trace();
    let probe = Probe::default();

    let mut registry = Registry::new();
    registry
        .register("suite", "unit_1", CHECKS, probe.factory("unit_1", Some("first"), false))
        .unwrap()
        .register("suite", "unit_2", CHECKS, probe.factory("unit_2", None, false))
        .unwrap();

    let report = orchestrator(&trace, config(&url, 2), options())
        .with_registry(registry)
        .run()
        .await
        .unwrap();

    assert_eq!(events(&trace), vec!["provision 2", "start", "stop", "teardown"]);

    assert_eq!(report.results.len(), 2);
    assert_eq!(report.results[0].unit, "unit_1");
    assert_matches!(
        report.results[0].status,
        UnitStatus::Failed { ref check, .. } if check == "first"
    );
    assert_eq!(report.results[1].unit, "unit_2");
    assert_eq!(report.results[1].status, UnitStatus::Passed);
    assert_eq!(report.results[1].checks_run, 2);
    assert!(!report.is_success());

    let mut ran = events(&probe.ran);
    ran.sort();
    assert_eq!(ran, vec!["unit_1@database_1", "unit_2@database_2"]);
}

#[tokio::test]
async fn in_flight_units_bounded_by_parallelism() {
    let url = spawn_http_stub().await;
    let trace = trace();
    let probe = Probe::default();

    let mut registry = Registry::new();
    for i in 0..5 {
        let name = format!("unit_{i}");
        registry
            .register("suite", &name, CHECKS, probe.factory(&name, None, false))
            .unwrap();
    }

    let report = orchestrator(&trace, config(&url, 2), options())
        .with_registry(registry)
        .run()
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.passed(), 5);
    assert!(probe.max_in_flight.load(Ordering::SeqCst) <= 2);

    let names: Vec<_> = report.results.iter().map(|r| r.unit.as_str()).collect();
    assert_eq!(names, vec!["unit_0", "unit_1", "unit_2", "unit_3", "unit_4"]);
}

#[tokio::test]
async fn service_env_resolves_db_url_to_first_endpoint() {
    let trace = trace();
    let launcher = Arc::new(FakeLauncher::new(&trace));

    let report = Orchestrator::new(
        config(DEAD_URL, 3),
        Arc::new(FakeProvisioner::new(&trace)),
        launcher.clone(),
        options(),
    )
    .run()
    .await
    .unwrap();

    assert!(report.results.is_empty());
    let env = launcher.env.lock().unwrap().clone();
    assert_eq!(
        env,
        vec![(
            "DATABASE_URL".to_string(),
            "postgresql://u:p@127.0.0.1:1/database_1".to_string()
        )]
    );
}

#[tokio::test]
async fn zero_units_still_tears_down() {
    let trace = trace();
    let report = orchestrator(&trace, config(DEAD_URL, 1), options())
        .run()
        .await
        .unwrap();

    assert!(report.results.is_empty());
    assert!(report.is_success());
    assert_eq!(events(&trace), vec!["provision 1", "start", "stop", "teardown"]);
}

#[tokio::test]
async fn declarative_modules_discovered() {
    let url = spawn_http_stub().await;
    let tests = tempfile::tempdir().unwrap();
    std::fs::write(
        tests.path().join("accounts.json"),
        r#"{ "cases": [
            { "name": "first_case", "setup": [], "checks": [] },
            { "name": "second_case", "setup": [] },
            { "name": "no_setup", "checks": [] }
        ] }"#,
    )
    .unwrap();

    let trace = trace();
    let mut opts = options();
    opts.tests_dir = Some(tests.path().to_path_buf());

    let report = orchestrator(&trace, config(&url, 1), opts)
        .run()
        .await
        .unwrap();

    let names: Vec<_> = report.results.iter().map(|r| r.unit.as_str()).collect();
    assert_eq!(names, vec!["first_case", "second_case"]);
    assert!(report.is_success());
}

#[tokio::test]
async fn broken_module_makes_run_unsuccessful() {
    let url = spawn_http_stub().await;
    let tests = tempfile::tempdir().unwrap();
    std::fs::write(tests.path().join("good.json"), r#"{ "cases": [ { "name": "ok", "setup": [] } ] }"#)
        .unwrap();
    std::fs::write(tests.path().join("bad.json"), "{").unwrap();

    let trace = trace();
    let mut opts = options();
    opts.tests_dir = Some(tests.path().to_path_buf());

    let report = orchestrator(&trace, config(&url, 1), opts)
        .run()
        .await
        .unwrap();

    assert_eq!(report.passed(), 1);
    assert_eq!(report.discovery_failures.len(), 1);
    assert!(!report.is_success());
}

#[tokio::test]
async fn strict_discovery_failure_stops_service_before_teardown() {
    let tests = tempfile::tempdir().unwrap();
    std::fs::write(tests.path().join("bad.json"), "{").unwrap();

    let trace = trace();
    let mut opts = options();
    opts.tests_dir = Some(tests.path().to_path_buf());
    opts.discovery = DiscoveryPolicy::FailFast;

    let result = orchestrator(&trace, config(DEAD_URL, 1), opts).run().await;

    assert_matches!(result, Err(OrchestrationError::Discovery(_)));
    assert_eq!(events(&trace), vec!["provision 1", "start", "stop", "teardown"]);
}

#[tokio::test]
async fn service_exit_fails_fast() {
    let trace = trace();
    let probe = Probe::default();
    let mut registry = Registry::new();
    registry
        .register("suite", "unit", CHECKS, probe.factory("unit", None, false))
        .unwrap();

    let launcher = FakeLauncher {
        exits_immediately: true,
        ..FakeLauncher::new(&trace)
    };
    let result = Orchestrator::new(
        config(DEAD_URL, 1),
        Arc::new(FakeProvisioner::new(&trace)),
        Arc::new(launcher),
        options(),
    )
    .with_registry(registry)
    .run()
    .await;

    assert_matches!(result, Err(OrchestrationError::ServiceExited { .. }));
    assert_eq!(events(&trace), vec!["provision 1", "start", "stop", "teardown"]);
    assert!(events(&probe.ran).is_empty());
}

#[tokio::test]
async fn unreachable_service_times_out() {
    let trace = trace();
    let probe = Probe::default();
    let mut registry = Registry::new();
    registry
        .register("suite", "unit", CHECKS, probe.factory("unit", None, false))
        .unwrap();

    let result = orchestrator(&trace, config(DEAD_URL, 1), options())
        .with_registry(registry)
        .run()
        .await;

    assert_matches!(result, Err(OrchestrationError::ServiceUnreachable { .. }));
    assert_eq!(events(&trace), vec!["provision 1", "start", "stop", "teardown"]);
}

#[tokio::test]
async fn invalid_config_touches_nothing() {
    let trace = trace();
    let mut bad = config(DEAD_URL, 1);
    bad.parallel_execution = 0;

    let result = orchestrator(&trace, bad, options()).run().await;

    assert_matches!(result, Err(OrchestrationError::ConfigInvalid(_)));
    assert!(events(&trace).is_empty());
}

#[tokio::test]
async fn provision_failure_skips_service_and_teardown() {
    let trace = trace();
    let provisioner = FakeProvisioner {
        fail_provision: true,
        ..FakeProvisioner::new(&trace)
    };

    let result = Orchestrator::new(
        config(DEAD_URL, 1),
        Arc::new(provisioner),
        Arc::new(FakeLauncher::new(&trace)),
        options(),
    )
    .run()
    .await;

    assert_matches!(result, Err(OrchestrationError::Provision(_)));
    assert_eq!(events(&trace), vec!["provision 1"]);
}

#[tokio::test]
async fn teardown_failure_recorded_not_raised() {
    let url = spawn_http_stub().await;
    let trace = trace();
    let probe = Probe::default();
    let mut registry = Registry::new();
    registry
        .register("suite", "unit", CHECKS, probe.factory("unit", None, false))
        .unwrap();

    let provisioner = FakeProvisioner {
        fail_teardown: true,
        ..FakeProvisioner::new(&trace)
    };
    let report = Orchestrator::new(
        config(&url, 1),
        Arc::new(provisioner),
        Arc::new(FakeLauncher::new(&trace)),
        options(),
    )
    .with_registry(registry)
    .run()
    .await
    .unwrap();

    assert_eq!(report.passed(), 1);
    assert_eq!(report.teardown_failures.len(), 1);
    assert_eq!(report.teardown_failures[0].resource, "container");
    assert!(report.is_success());
}

#[tokio::test]
async fn cancellation_before_start_provisions_nothing() {
    let trace = trace();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = orchestrator(&trace, config(DEAD_URL, 1), options())
        .with_cancellation(cancel)
        .run()
        .await
        .unwrap();

    assert!(report.cancelled);
    assert!(events(&trace).is_empty());
}

#[tokio::test]
async fn cancellation_mid_run_interrupts_and_tears_down() {
    let url = spawn_http_stub().await;
    let trace = trace();
    let probe = Probe::default();
    let mut registry = Registry::new();
    registry
        .register("suite", "stuck", CHECKS, probe.factory("stuck", None, true))
        .unwrap()
        .register("suite", "queued", CHECKS, probe.factory("queued", None, false))
        .unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let report = orchestrator(&trace, config(&url, 1), options())
        .with_registry(registry)
        .with_cancellation(cancel)
        .run()
        .await
        .unwrap();

    assert!(report.cancelled);
    assert!(!report.is_success());
    assert_eq!(report.results.len(), 1);
    assert_eq!(
        report.results[0].status,
        UnitStatus::Errored {
            cause: CANCELLED_CAUSE.to_string()
        }
    );
    assert_eq!(events(&trace), vec!["provision 1", "start", "stop", "teardown"]);
}
