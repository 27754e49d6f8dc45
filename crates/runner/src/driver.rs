//! Execution driver: runs one unit against one leased database.
//!
//! Each unit runs in its own task so a panic is contained and reported as
//! an error instead of tearing down the run. The unit's pool is closed
//! before [`ExecutionDriver::run`] returns, whatever the outcome.

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use detest_core::report::{RunResult, UnitStatus};
use detest_core::types::{DatabaseEndpoint, Timestamp};
use tokio_util::sync::CancellationToken;

use crate::case::{CheckFailure, TestCase, TestContext, TestUnitDescriptor, UnitFactory};
use crate::client::ServiceClient;

/// Upper bound for a single `setup` or `check` call.
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(30);

/// Cause recorded for units interrupted by cancellation.
pub const CANCELLED_CAUSE: &str = "cancelled";

/// Name under which a failing `setup` is reported.
const SETUP: &str = "setup";

#[derive(Debug, Clone)]
pub struct ExecutionDriver {
    client: ServiceClient,
    check_timeout: Duration,
    cancel: CancellationToken,
}

impl ExecutionDriver {
    pub fn new(client: ServiceClient, cancel: CancellationToken) -> Self {
        Self {
            client,
            check_timeout: DEFAULT_CHECK_TIMEOUT,
            cancel,
        }
    }

    pub fn with_check_timeout(mut self, timeout: Duration) -> Self {
        self.check_timeout = timeout;
        self
    }

    /// Instantiate `unit` on `endpoint`, run setup and every check in
    /// order, and record the outcome. Never returns an error: every
    /// failure becomes part of the [`RunResult`].
    pub async fn run(&self, unit: &TestUnitDescriptor, endpoint: &DatabaseEndpoint) -> RunResult {
        let started_at = Utc::now();
        let start = Instant::now();
        tracing::info!(unit = %unit.qualified_name(), database = %endpoint, "Running unit");

        let pool = match detest_db::create_lazy_pool(&endpoint.url) {
            Ok(pool) => pool,
            Err(e) => {
                let status = UnitStatus::Errored {
                    cause: format!("database pool: {e}"),
                };
                return finish(unit, status, started_at, start, 0);
            }
        };

        let progress = Arc::new(AtomicUsize::new(0));
        let ctx = TestContext {
            db: pool.clone(),
            http: self.client.clone(),
        };
        let task = tokio::spawn(execute(
            Arc::clone(&unit.factory),
            ctx,
            unit.checks.clone(),
            self.check_timeout,
            Arc::clone(&progress),
        ));
        let abort = task.abort_handle();

        let status = tokio::select! {
            joined = task => match joined {
                Ok(status) => status,
                Err(e) if e.is_panic() => UnitStatus::Errored {
                    cause: format!("panicked: {}", panic_message(e.into_panic())),
                },
                Err(e) => UnitStatus::Errored { cause: e.to_string() },
            },
            _ = self.cancel.cancelled() => {
                abort.abort();
                UnitStatus::Errored { cause: CANCELLED_CAUSE.to_string() }
            }
        };

        pool.close().await;
        finish(unit, status, started_at, start, progress.load(Ordering::SeqCst))
    }
}

async fn execute(
    factory: Arc<dyn UnitFactory>,
    ctx: TestContext,
    checks: Vec<String>,
    timeout: Duration,
    progress: Arc<AtomicUsize>,
) -> UnitStatus {
    let mut unit = factory.instantiate(ctx);
    match tokio::time::timeout(timeout, unit.setup()).await {
        Ok(Ok(())) => {}
        Ok(Err(failure)) => return failed_at(SETUP, failure),
        Err(_) => return timed_out(SETUP, timeout),
    }

    for check in &checks {
        progress.fetch_add(1, Ordering::SeqCst);
        match tokio::time::timeout(timeout, unit.check(check)).await {
            Ok(Ok(())) => tracing::debug!(check = %check, "Check passed"),
            Ok(Err(failure)) => return failed_at(check, failure),
            Err(_) => return timed_out(check, timeout),
        }
    }
    UnitStatus::Passed
}

fn failed_at(check: &str, failure: CheckFailure) -> UnitStatus {
    match failure {
        CheckFailure::Assertion(reason) => UnitStatus::Failed {
            check: check.to_string(),
            reason,
        },
        CheckFailure::Error(cause) => UnitStatus::Errored {
            cause: format!("{check}: {cause}"),
        },
    }
}

fn timed_out(check: &str, timeout: Duration) -> UnitStatus {
    UnitStatus::Errored {
        cause: format!("{check}: timed out after {}ms", timeout.as_millis()),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn finish(
    unit: &TestUnitDescriptor,
    status: UnitStatus,
    started_at: Timestamp,
    start: Instant,
    checks_run: usize,
) -> RunResult {
    let duration_ms = start.elapsed().as_millis() as u64;
    match &status {
        UnitStatus::Passed => {
            tracing::info!(unit = %unit.qualified_name(), duration_ms, "Unit passed");
        }
        UnitStatus::Failed { check, reason } => {
            tracing::warn!(unit = %unit.qualified_name(), check = %check, reason = %reason, "Unit failed");
        }
        UnitStatus::Errored { cause } => {
            tracing::error!(unit = %unit.qualified_name(), cause = %cause, "Unit errored");
        }
    }
    RunResult {
        unit: unit.name.clone(),
        module: unit.module.clone(),
        status,
        started_at,
        duration_ms,
        checks_run,
    }
}
