//! Orchestration controller: one full test run.
//!
//! ```text
//! Idle -> ConfigLoaded -> ResourcesProvisioned -> ServiceStarted
//!      -> UnitsDiscovered -> Running -> Reporting -> TornDown
//! ```
//!
//! Whatever happens after provisioning, the service is stopped before the
//! container is torn down, and only resources that were actually created
//! are released.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use detest_container::{ProvisionError, ResourceProvisioner};
use detest_core::config::ProjectConfig;
use detest_core::error::CoreError;
use detest_core::report::{RunReport, RunResult, TeardownFailure, UnitStatus};
use detest_core::supervisor::SupervisorError;
use detest_core::template::{to_assignments, TemplateContext};
use detest_core::types::DatabaseEndpoint;
use detest_db::readiness::ReadinessConfig;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::case::TestUnitDescriptor;
use crate::client::ServiceClient;
use crate::discovery::{discover_with, Discovery, DiscoveryError, DiscoveryPolicy};
use crate::driver::{ExecutionDriver, DEFAULT_CHECK_TIMEOUT};
use crate::registry::Registry;
use crate::service::{RunningService, ServiceLauncher};

/// Directory scanned for test modules when none is given.
pub const DEFAULT_TESTS_DIR: &str = "tests";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    ConfigLoaded,
    ResourcesProvisioned,
    ServiceStarted,
    UnitsDiscovered,
    Running,
    Reporting,
    TornDown,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::ConfigLoaded => "config_loaded",
            Self::ResourcesProvisioned => "resources_provisioned",
            Self::ServiceStarted => "service_started",
            Self::UnitsDiscovered => "units_discovered",
            Self::Running => "running",
            Self::Reporting => "reporting",
            Self::TornDown => "torn_down",
        };
        f.write_str(s)
    }
}

/// Failures that abort a run before any unit result exists.
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(#[source] CoreError),

    #[error("Failed to provision databases: {0}")]
    Provision(#[source] ProvisionError),

    #[error("Failed to start service: {0}")]
    Service(#[from] SupervisorError),

    #[error("Service at {url} not reachable after {elapsed_ms}ms: {last_error}")]
    ServiceUnreachable {
        url: String,
        elapsed_ms: u64,
        last_error: String,
    },

    #[error("Service pipeline exited before {url} became reachable")]
    ServiceExited { url: String },

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}

/// Knobs of a run that do not come from `config.json`.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Working directory of the service pipeline (the cloned project).
    pub project_dir: PathBuf,
    /// Directory of declarative modules; `None` runs registered units only.
    pub tests_dir: Option<PathBuf>,
    pub discovery: DiscoveryPolicy,
    /// HTTP reachability poll for the started service.
    pub service_readiness: ReadinessConfig,
    pub check_timeout: Duration,
}

impl RunOptions {
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
            tests_dir: Some(PathBuf::from(DEFAULT_TESTS_DIR)),
            discovery: DiscoveryPolicy::default(),
            service_readiness: ReadinessConfig::default(),
            check_timeout: DEFAULT_CHECK_TIMEOUT,
        }
    }
}

/// Why the stages stopped early.
enum Abort {
    Cancelled,
    Failed(OrchestrationError),
}

impl From<OrchestrationError> for Abort {
    fn from(err: OrchestrationError) -> Self {
        Self::Failed(err)
    }
}

impl From<ProvisionError> for Abort {
    fn from(err: ProvisionError) -> Self {
        match err {
            ProvisionError::Cancelled => Self::Cancelled,
            other => Self::Failed(OrchestrationError::Provision(other)),
        }
    }
}

impl From<SupervisorError> for Abort {
    fn from(err: SupervisorError) -> Self {
        Self::Failed(err.into())
    }
}

impl From<DiscoveryError> for Abort {
    fn from(err: DiscoveryError) -> Self {
        Self::Failed(err.into())
    }
}

/// Resources created so far, released in reverse order.
#[derive(Default)]
struct Acquired {
    provisioned: bool,
    service: Option<Box<dyn RunningService>>,
}

/// Drives a complete run for one project configuration.
pub struct Orchestrator {
    config: ProjectConfig,
    provisioner: Arc<dyn ResourceProvisioner>,
    launcher: Arc<dyn ServiceLauncher>,
    registry: Registry,
    options: RunOptions,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        config: ProjectConfig,
        provisioner: Arc<dyn ResourceProvisioner>,
        launcher: Arc<dyn ServiceLauncher>,
        options: RunOptions,
    ) -> Self {
        Self {
            config,
            provisioner,
            launcher,
            registry: Registry::new(),
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Add compiled-in units; they run before discovered ones.
    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    /// Token that stops the run when cancelled.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Execute the whole run.
    ///
    /// Unit failures are part of the returned report; `Err` means the run
    /// could not get as far as executing units. Teardown always happens
    /// before this returns.
    pub async fn run(&self) -> Result<RunReport, OrchestrationError> {
        enter(Stage::Idle);
        self.config
            .validate_for_test()
            .map_err(OrchestrationError::ConfigInvalid)?;
        enter(Stage::ConfigLoaded);

        let mut acquired = Acquired::default();
        let outcome = self.run_stages(&mut acquired).await;
        let teardown_failures = self.teardown(acquired).await;
        enter(Stage::TornDown);

        match outcome {
            Ok(mut report) => {
                report.teardown_failures = teardown_failures;
                Ok(report)
            }
            Err(Abort::Cancelled) => {
                tracing::warn!("Run cancelled before units started");
                Ok(RunReport {
                    teardown_failures,
                    cancelled: true,
                    ..Default::default()
                })
            }
            Err(Abort::Failed(e)) => {
                tracing::error!(error = %e, "Run aborted");
                Err(e)
            }
        }
    }

    async fn run_stages(&self, acquired: &mut Acquired) -> Result<RunReport, Abort> {
        self.check_cancelled()?;
        let slots = self.config.parallel_execution as usize;
        let endpoints = self.provisioner.provision(slots).await?;
        acquired.provisioned = true;
        enter(Stage::ResourcesProvisioned);

        self.check_cancelled()?;
        let Some(service_db) = endpoints.first() else {
            return Err(Abort::Failed(OrchestrationError::Provision(
                ProvisionError::InvalidArgument("provisioner returned no endpoints".to_string()),
            )));
        };
        let env = TemplateContext::for_database(&service_db.url)
            .resolve_env(&self.config.environment_variables);
        tracing::debug!(env = %to_assignments(&env), "Resolved service environment");
        let service = acquired.service.insert(self.launcher.launch(
            &self.config.commands,
            env,
            &self.options.project_dir,
        )?);
        enter(Stage::ServiceStarted);

        let discovery = self.discover()?;
        enter(Stage::UnitsDiscovered);

        if discovery.units.is_empty() {
            tracing::warn!("No test units discovered");
        } else {
            self.wait_for_service(&mut **service).await?;
        }

        enter(Stage::Running);
        let (results, cancelled) = self.run_units(discovery.units, endpoints).await;

        enter(Stage::Reporting);
        Ok(RunReport {
            results,
            discovery_failures: discovery.failures,
            teardown_failures: Vec::new(),
            cancelled,
        })
    }

    fn discover(&self) -> Result<Discovery, DiscoveryError> {
        let seed = self.registry.descriptors();
        match &self.options.tests_dir {
            Some(dir) => discover_with(dir, self.options.discovery, seed),
            None => Ok(Discovery {
                units: seed,
                failures: Vec::new(),
            }),
        }
    }

    /// Poll the service base URL until it answers with any status.
    async fn wait_for_service(&self, service: &mut dyn RunningService) -> Result<(), Abort> {
        let url = self.config.project_url.clone();
        let client = ServiceClient::new(&url);
        let config = &self.options.service_readiness;
        let start = Instant::now();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            if service.has_exited() {
                return Err(OrchestrationError::ServiceExited { url }.into());
            }

            let last_error = match client.probe().await {
                Ok(status) => {
                    tracing::info!(
                        url = %url,
                        status,
                        attempt,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Service reachable",
                    );
                    return Ok(());
                }
                Err(e) => e.to_string(),
            };

            if start.elapsed() + config.interval > config.timeout {
                return Err(OrchestrationError::ServiceUnreachable {
                    url,
                    elapsed_ms: start.elapsed().as_millis() as u64,
                    last_error,
                }
                .into());
            }
            tracing::debug!(attempt, error = %last_error, "Service not reachable yet");

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(Abort::Cancelled),
                _ = tokio::time::sleep(config.interval) => {}
            }
        }
    }

    /// Run every unit with at most one in flight per endpoint.
    ///
    /// Results come back in discovery order. Returns whether the run was
    /// cancelled before all units were launched or finished.
    async fn run_units(
        &self,
        units: Vec<TestUnitDescriptor>,
        endpoints: Vec<DatabaseEndpoint>,
    ) -> (Vec<RunResult>, bool) {
        let client = ServiceClient::new(&self.config.project_url);
        let driver = ExecutionDriver::new(client, self.cancel.clone())
            .with_check_timeout(self.options.check_timeout);

        // Free endpoints; receiving one is taking an exclusive lease.
        let (free_tx, mut free_rx) = mpsc::unbounded_channel();
        for endpoint in endpoints {
            let _ = free_tx.send(endpoint);
        }

        let total = units.len();
        let mut handles = Vec::with_capacity(total);
        for unit in units {
            let endpoint = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                leased = free_rx.recv() => match leased {
                    Some(endpoint) => endpoint,
                    None => break,
                },
            };

            let driver = driver.clone();
            let release = free_tx.clone();
            let task_unit = unit.clone();
            let handle = tokio::spawn(async move {
                let result = driver.run(&task_unit, &endpoint).await;
                let _ = release.send(endpoint);
                result
            });
            handles.push((unit, handle));
        }

        let launched = handles.len();
        let mut results = Vec::with_capacity(launched);
        for (unit, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => RunResult {
                    unit: unit.name.clone(),
                    module: unit.module.clone(),
                    status: UnitStatus::Errored {
                        cause: format!("unit task failed: {e}"),
                    },
                    started_at: Utc::now(),
                    duration_ms: 0,
                    checks_run: 0,
                },
            };
            results.push(result);
        }

        let cancelled = self.cancel.is_cancelled();
        if cancelled {
            tracing::warn!(launched, total, "Run cancelled");
        }
        (results, cancelled)
    }

    /// Stop the service, then remove the container.
    async fn teardown(&self, acquired: Acquired) -> Vec<TeardownFailure> {
        let mut failures = Vec::new();

        if let Some(service) = acquired.service {
            match service.stop().await {
                Ok(exit) => tracing::info!(
                    exit_code = ?exit.exit_code,
                    forced = exit.forced,
                    "Service stopped",
                ),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to stop service");
                    failures.push(TeardownFailure {
                        resource: "service".to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        if acquired.provisioned {
            if let Err(e) = self.provisioner.teardown().await {
                tracing::error!(error = %e, "Failed to tear down databases");
                failures.push(TeardownFailure {
                    resource: "container".to_string(),
                    message: e.to_string(),
                });
            }
        }

        failures
    }

    fn check_cancelled(&self) -> Result<(), Abort> {
        if self.cancel.is_cancelled() {
            return Err(Abort::Cancelled);
        }
        Ok(())
    }
}

fn enter(stage: Stage) {
    tracing::info!(stage = %stage, "Orchestration stage");
}
