//! Fakes shared by the orchestration tests.
//!
//! Every fake appends to one shared [`Trace`] so tests can assert the
//! exact order of provisioning, service start/stop and teardown.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use detest_container::engine::EngineError;
use detest_container::{ProvisionError, ResourceProvisioner, TeardownError};
use detest_core::config::{CommandSet, ProjectConfig};
use detest_core::supervisor::{ServiceExit, SupervisorError};
use detest_core::types::DatabaseEndpoint;
use detest_db::readiness::ReadinessConfig;
use detest_runner::service::{RunningService, ServiceLauncher};
use detest_runner::{CheckFailure, RunOptions, TestCase, TestContext};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub type Trace = Arc<Mutex<Vec<String>>>;

pub fn trace() -> Trace {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn events(trace: &Trace) -> Vec<String> {
    trace.lock().unwrap().clone()
}

// ---------------------------------------------------------------------------
// Provisioner
// ---------------------------------------------------------------------------

pub struct FakeProvisioner {
    pub trace: Trace,
    pub fail_provision: bool,
    pub fail_teardown: bool,
}

impl FakeProvisioner {
    pub fn new(trace: &Trace) -> Self {
        Self {
            trace: Arc::clone(trace),
            fail_provision: false,
            fail_teardown: false,
        }
    }
}

#[async_trait]
impl ResourceProvisioner for FakeProvisioner {
    async fn provision(&self, count: usize) -> Result<Vec<DatabaseEndpoint>, ProvisionError> {
        self.trace.lock().unwrap().push(format!("provision {count}"));
        if self.fail_provision {
            return Err(ProvisionError::ContainerNotRunning {
                name: "fake".to_string(),
                status: "exited".to_string(),
            });
        }
        Ok((1..=count)
            .map(|i| DatabaseEndpoint::new("127.0.0.1", 1, "u", "p", &format!("database_{i}")))
            .collect())
    }

    async fn teardown(&self) -> Result<(), TeardownError> {
        self.trace.lock().unwrap().push("teardown".to_string());
        if self.fail_teardown {
            return Err(TeardownError {
                name: "fake".to_string(),
                source: EngineError::CommandFailed {
                    command: "docker rm fake".to_string(),
                    exit_code: 1,
                    stderr: "daemon gone".to_string(),
                },
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct FakeLauncher {
    pub trace: Trace,
    /// Report the pipeline as already exited.
    pub exits_immediately: bool,
    /// Environment the last launch received.
    pub env: Mutex<Vec<(String, String)>>,
}

impl FakeLauncher {
    pub fn new(trace: &Trace) -> Self {
        Self {
            trace: Arc::clone(trace),
            exits_immediately: false,
            env: Mutex::new(Vec::new()),
        }
    }
}

impl ServiceLauncher for FakeLauncher {
    fn launch(
        &self,
        _commands: &CommandSet,
        env: Vec<(String, String)>,
        _working_dir: &Path,
    ) -> Result<Box<dyn RunningService>, SupervisorError> {
        self.trace.lock().unwrap().push("start".to_string());
        *self.env.lock().unwrap() = env;
        Ok(Box::new(FakeService {
            trace: Arc::clone(&self.trace),
            exited: self.exits_immediately,
        }))
    }
}

struct FakeService {
    trace: Trace,
    exited: bool,
}

#[async_trait]
impl RunningService for FakeService {
    fn has_exited(&mut self) -> bool {
        self.exited
    }

    async fn stop(self: Box<Self>) -> Result<ServiceExit, SupervisorError> {
        self.trace.lock().unwrap().push("stop".to_string());
        Ok(ServiceExit {
            exit_code: Some(0),
            forced: false,
            duration_ms: 1,
        })
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// Minimal HTTP server answering `200 ok` to every request.
pub async fn spawn_http_stub() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(
                        b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok",
                    )
                    .await;
                let _ = socket.shutdown().await;
            });
        }
    });
    format!("http://{addr}")
}

/// A URL nothing listens on.
pub const DEAD_URL: &str = "http://127.0.0.1:1";

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

pub fn config(project_url: &str, parallel_execution: u32) -> ProjectConfig {
    let mut config = ProjectConfig::scaffold("demo", "https://example.com/demo.git");
    config.project_url = project_url.to_string();
    config.parallel_execution = parallel_execution;
    config.commands.run = "serve".to_string();
    config
        .environment_variables
        .insert("DATABASE_URL".to_string(), "$DB_URL".to_string());
    config
}

/// Options with no tests directory and fast service polling.
pub fn options() -> RunOptions {
    let mut options = RunOptions::new("/nonexistent/project");
    options.tests_dir = None;
    options.service_readiness = ReadinessConfig {
        interval: Duration::from_millis(10),
        timeout: Duration::from_millis(200),
    };
    options
}

// ---------------------------------------------------------------------------
// Units
// ---------------------------------------------------------------------------

/// Records which database it ran on and how many units overlap.
pub struct RecordingCase {
    pub unit: String,
    pub database: String,
    pub fail_on: Option<String>,
    pub hang: bool,
    pub ran: Trace,
    pub in_flight: Arc<AtomicUsize>,
    pub max_in_flight: Arc<AtomicUsize>,
}

#[async_trait]
impl TestCase for RecordingCase {
    async fn setup(&mut self) -> Result<(), CheckFailure> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.ran
            .lock()
            .unwrap()
            .push(format!("{}@{}", self.unit, self.database));
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(())
    }

    async fn check(&mut self, name: &str) -> Result<(), CheckFailure> {
        if self.hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.fail_on.as_deref() == Some(name) {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(CheckFailure::assertion(format!("{name} failed")));
        }
        if name == "last" {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Shared counters handed to every [`RecordingCase`] of a test.
#[derive(Clone, Default)]
pub struct Probe {
    pub ran: Trace,
    pub in_flight: Arc<AtomicUsize>,
    pub max_in_flight: Arc<AtomicUsize>,
}

impl Probe {
    /// Factory for a unit whose checks are `["first", "last"]`.
    pub fn factory(
        &self,
        unit: &str,
        fail_on: Option<&str>,
        hang: bool,
    ) -> impl Fn(TestContext) -> Box<dyn TestCase> + Send + Sync + 'static {
        let probe = self.clone();
        let unit = unit.to_string();
        let fail_on = fail_on.map(str::to_string);
        move |ctx: TestContext| -> Box<dyn TestCase> {
            let database = ctx
                .db
                .connect_options()
                .get_database()
                .unwrap_or_default()
                .to_string();
            Box::new(RecordingCase {
                unit: unit.clone(),
                database,
                fail_on: fail_on.clone(),
                hang,
                ran: Arc::clone(&probe.ran),
                in_flight: Arc::clone(&probe.in_flight),
                max_in_flight: Arc::clone(&probe.max_in_flight),
            })
        }
    }
}
