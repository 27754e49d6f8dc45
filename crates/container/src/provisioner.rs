//! Resource provisioner: one PostgreSQL container, N logical databases.
//!
//! [`Provisioner::provision`] walks through:
//! 1. Reject `count == 0` before touching the engine.
//! 2. Pull the image if it is not present locally.
//! 3. Stop and remove a stale container left behind by an earlier run.
//! 4. Start the container and wait for it to report `running`.
//! 5. Poll PostgreSQL until it accepts connections (bounded).
//! 6. Create `database_1` .. `database_N` over one admin connection.
//!
//! Any failure after step 4 removes the container again before the error
//! is returned.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use detest_core::types::DatabaseEndpoint;
use detest_db::readiness::{wait_until_ready, ReadinessConfig};
use detest_db::server::{database_names, DatabaseServer, PgServer};
use detest_db::DbError;
use tokio_util::sync::CancellationToken;

use crate::docker::DockerCli;
use crate::engine::{ContainerEngine, ContainerStatus, EngineError};
use crate::settings::PostgresSettings;

/// Bound on waiting for the engine to report the container as running.
const CONTAINER_START_TIMEOUT: Duration = Duration::from_secs(30);

/// Poll interval while waiting for the container to start.
const CONTAINER_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Container '{name}' is {status}, expected running")]
    ContainerNotRunning { name: String, status: String },

    #[error("Database server not ready after {elapsed_ms}ms ({attempts} attempts): {last_error}")]
    Timeout {
        attempts: u32,
        elapsed_ms: u64,
        last_error: String,
    },

    #[error(transparent)]
    Database(DbError),

    #[error("Provisioning cancelled")]
    Cancelled,
}

impl From<DbError> for ProvisionError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Timeout {
                attempts,
                elapsed_ms,
                last_error,
            } => Self::Timeout {
                attempts,
                elapsed_ms,
                last_error,
            },
            DbError::Cancelled => Self::Cancelled,
            other => Self::Database(other),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Failed to tear down container '{name}': {source}")]
pub struct TeardownError {
    pub name: String,
    #[source]
    pub source: EngineError,
}

/// What the orchestration controller needs from a provisioner.
#[async_trait]
pub trait ResourceProvisioner: Send + Sync {
    /// Create `count` isolated databases and return their endpoints.
    async fn provision(&self, count: usize) -> Result<Vec<DatabaseEndpoint>, ProvisionError>;

    /// Remove everything `provision` created. Idempotent.
    async fn teardown(&self) -> Result<(), TeardownError>;
}

/// Provisions databases inside a single container.
pub struct Provisioner {
    engine: Arc<dyn ContainerEngine>,
    server: Arc<dyn DatabaseServer>,
    settings: PostgresSettings,
    readiness: ReadinessConfig,
    cancel: CancellationToken,
}

impl Provisioner {
    /// Docker + PostgreSQL provisioner for `settings`.
    pub fn postgres(settings: PostgresSettings, cancel: CancellationToken) -> Self {
        let server = PgServer::new(settings.admin_url());
        Self::with_components(Arc::new(DockerCli::default()), Arc::new(server), settings, cancel)
    }

    /// Provisioner over explicit engine and server implementations.
    pub fn with_components(
        engine: Arc<dyn ContainerEngine>,
        server: Arc<dyn DatabaseServer>,
        settings: PostgresSettings,
        cancel: CancellationToken,
    ) -> Self {
        let readiness = ReadinessConfig {
            timeout: settings.ready_timeout,
            ..Default::default()
        };
        Self {
            engine,
            server,
            settings,
            readiness,
            cancel,
        }
    }

    /// Override the readiness poll (tests use millisecond intervals).
    pub fn with_readiness(mut self, readiness: ReadinessConfig) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn settings(&self) -> &PostgresSettings {
        &self.settings
    }

    async fn ensure_image(&self) -> Result<(), ProvisionError> {
        let image = &self.settings.image;
        if self.engine.image_exists(image).await? {
            tracing::debug!(image = %image, "Image present locally");
            return Ok(());
        }
        tracing::info!(image = %image, "Pulling image");
        self.engine.pull_image(image).await?;
        tracing::info!(image = %image, "Image pulled");
        Ok(())
    }

    /// Stop and remove a container with our name left over from a prior run.
    async fn remove_stale(&self) -> Result<(), ProvisionError> {
        let name = &self.settings.container_name;
        let Some(status) = self.engine.container_status(name).await? else {
            return Ok(());
        };
        tracing::warn!(container = %name, %status, "Removing stale container from a previous run");
        self.stop_and_remove(status).await?;
        Ok(())
    }

    async fn stop_and_remove(&self, status: ContainerStatus) -> Result<(), EngineError> {
        let name = &self.settings.container_name;
        if !status.is_terminal() {
            match self.engine.stop_container(name).await {
                Ok(()) | Err(EngineError::NoSuchContainer(_)) => {}
                Err(e) => return Err(e),
            }
        }
        match self.engine.remove_container(name).await {
            Ok(()) | Err(EngineError::NoSuchContainer(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn wait_running(&self) -> Result<(), ProvisionError> {
        let name = &self.settings.container_name;
        let start = Instant::now();
        loop {
            let status = self.engine.container_status(name).await?;
            match status {
                Some(ContainerStatus::Running) => {
                    tracing::info!(container = %name, "Container running");
                    return Ok(());
                }
                Some(status) if status.is_terminal() || start.elapsed() > CONTAINER_START_TIMEOUT => {
                    return Err(ProvisionError::ContainerNotRunning {
                        name: name.clone(),
                        status: status.to_string(),
                    });
                }
                None => {
                    return Err(ProvisionError::ContainerNotRunning {
                        name: name.clone(),
                        status: "missing".to_string(),
                    });
                }
                Some(_) => {}
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(ProvisionError::Cancelled),
                _ = tokio::time::sleep(CONTAINER_POLL_INTERVAL) => {}
            }
        }
    }

    /// Steps 4-6; the caller removes the container if this fails.
    async fn start_and_create(&self, count: usize) -> Result<Vec<DatabaseEndpoint>, ProvisionError> {
        let spec = self.settings.container_spec();
        let id = self.engine.run_container(&spec).await?;
        tracing::info!(container = %spec.name, id = %id, port = self.settings.port, "Container started");

        self.wait_running().await?;
        wait_until_ready(self.server.as_ref(), &self.readiness, &self.cancel).await?;

        let names = database_names(count);
        self.server.create_databases(&names).await?;

        Ok(names
            .iter()
            .map(|name| self.settings.endpoint(name))
            .collect())
    }
}

#[async_trait]
impl ResourceProvisioner for Provisioner {
    async fn provision(&self, count: usize) -> Result<Vec<DatabaseEndpoint>, ProvisionError> {
        if count == 0 {
            return Err(ProvisionError::InvalidArgument(
                "database count must be at least 1".to_string(),
            ));
        }

        self.ensure_image().await?;
        self.remove_stale().await?;

        match self.start_and_create(count).await {
            Ok(endpoints) => {
                tracing::info!(count = endpoints.len(), "Databases provisioned");
                Ok(endpoints)
            }
            Err(e) => {
                tracing::error!(error = %e, "Provisioning failed, removing container");
                if let Err(cleanup) = self.teardown().await {
                    tracing::error!(error = %cleanup, "Cleanup after failed provisioning also failed");
                }
                Err(e)
            }
        }
    }

    async fn teardown(&self) -> Result<(), TeardownError> {
        let name = &self.settings.container_name;
        let result = match self.engine.container_status(name).await {
            Ok(None) => {
                tracing::info!(container = %name, "No container to tear down");
                return Ok(());
            }
            Ok(Some(status)) => self.stop_and_remove(status).await,
            Err(e) => Err(e),
        };

        result.map_err(|source| TeardownError {
            name: name.clone(),
            source,
        })?;
        tracing::info!(container = %name, "Container removed");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
