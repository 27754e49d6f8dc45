//! Service launching seam between the controller and the supervisor.

use std::path::Path;

use async_trait::async_trait;
use detest_core::config::CommandSet;
use detest_core::supervisor::{ServiceExit, ServiceHandle, ServiceSupervisor, SupervisorError};

/// Starts the service pipeline.
pub trait ServiceLauncher: Send + Sync {
    fn launch(
        &self,
        commands: &CommandSet,
        env: Vec<(String, String)>,
        working_dir: &Path,
    ) -> Result<Box<dyn RunningService>, SupervisorError>;
}

/// A launched service that must be stopped exactly once.
#[async_trait]
pub trait RunningService: Send {
    fn has_exited(&mut self) -> bool;

    async fn stop(self: Box<Self>) -> Result<ServiceExit, SupervisorError>;
}

impl ServiceLauncher for ServiceSupervisor {
    fn launch(
        &self,
        commands: &CommandSet,
        env: Vec<(String, String)>,
        working_dir: &Path,
    ) -> Result<Box<dyn RunningService>, SupervisorError> {
        Ok(Box::new(self.start(commands, env, working_dir)?))
    }
}

#[async_trait]
impl RunningService for ServiceHandle {
    fn has_exited(&mut self) -> bool {
        ServiceHandle::has_exited(self)
    }

    async fn stop(self: Box<Self>) -> Result<ServiceExit, SupervisorError> {
        ServiceHandle::stop(*self).await
    }
}
