//! Container engine abstraction.
//!
//! The provisioner only needs a handful of operations on one named
//! container; [`ContainerEngine`] captures exactly those so the Docker
//! implementation can be swapped for an in-memory fake in tests.

use async_trait::async_trait;
use detest_core::shell::ShellError;

/// Lifecycle state as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    Other(String),
}

impl ContainerStatus {
    /// Parse Docker's `.State.Status` string.
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "created" => Self::Created,
            "running" => Self::Running,
            "paused" => Self::Paused,
            "restarting" => Self::Restarting,
            "removing" => Self::Removing,
            "exited" => Self::Exited,
            "dead" => Self::Dead,
            other => Self::Other(other.to_string()),
        }
    }

    /// Whether the container has stopped for good and will not become
    /// running on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Exited | Self::Dead)
    }
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Restarting => "restarting",
            Self::Removing => "removing",
            Self::Exited => "exited",
            Self::Dead => "dead",
            Self::Other(s) => s,
        };
        f.write_str(s)
    }
}

/// Host port published to a container port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    pub host: u16,
    pub container: u16,
}

/// Everything needed to start one detached container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub env: Vec<(String, String)>,
    pub ports: Vec<PortMapping>,
}

/// Errors from the container engine layer.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The engine binary could not be executed at all.
    #[error("Container engine unavailable: {0}")]
    Unavailable(#[from] ShellError),

    /// The engine ran but rejected the request.
    #[error("`{command}` failed ({exit_code}): {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("No such container: {0}")]
    NoSuchContainer(String),
}

/// Operations the provisioner performs against the container engine.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn image_exists(&self, image: &str) -> Result<bool, EngineError>;

    async fn pull_image(&self, image: &str) -> Result<(), EngineError>;

    /// `None` when no container with that name exists.
    async fn container_status(&self, name: &str) -> Result<Option<ContainerStatus>, EngineError>;

    /// Start a detached container; returns the engine's container id.
    async fn run_container(&self, spec: &ContainerSpec) -> Result<String, EngineError>;

    async fn stop_container(&self, name: &str) -> Result<(), EngineError>;

    async fn remove_container(&self, name: &str) -> Result<(), EngineError>;
}
