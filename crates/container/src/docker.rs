//! [`ContainerEngine`] implementation that shells out to the `docker` CLI.

use std::time::Duration;

use async_trait::async_trait;
use detest_core::shell::{self, CommandInput, CommandOutput};

use crate::engine::{ContainerEngine, ContainerSpec, ContainerStatus, EngineError};

/// Timeout for quick inspect/stop/remove calls.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout for `docker pull`; images can be large.
const PULL_TIMEOUT: Duration = Duration::from_secs(600);

/// Docker's stderr marker for a missing object.
const NO_SUCH_OBJECT: &str = "No such";

/// Talks to the Docker daemon through the `docker` binary.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn docker(
        &self,
        args: &[&str],
        timeout: Duration,
    ) -> Result<CommandOutput, EngineError> {
        let input = CommandInput {
            timeout,
            ..Default::default()
        };
        tracing::debug!(args = ?args, "docker");
        Ok(shell::run_program(&self.binary, args, &input).await?)
    }

    /// Map a non-zero exit into an error, recognising missing containers.
    fn check(
        &self,
        args: &[&str],
        output: CommandOutput,
        name: Option<&str>,
    ) -> Result<CommandOutput, EngineError> {
        if output.success() {
            return Ok(output);
        }
        if let Some(name) = name {
            if output.stderr.contains(NO_SUCH_OBJECT) {
                return Err(EngineError::NoSuchContainer(name.to_string()));
            }
        }
        Err(EngineError::CommandFailed {
            command: format!("{} {}", self.binary, args.join(" ")),
            exit_code: output.exit_code,
            stderr: output.stderr_tail(),
        })
    }
}

#[async_trait]
impl ContainerEngine for DockerCli {
    async fn image_exists(&self, image: &str) -> Result<bool, EngineError> {
        let output = self
            .docker(&["image", "inspect", "--format", "{{.Id}}", image], COMMAND_TIMEOUT)
            .await?;
        Ok(output.success())
    }

    async fn pull_image(&self, image: &str) -> Result<(), EngineError> {
        let args = ["pull", image];
        let output = self.docker(&args, PULL_TIMEOUT).await?;
        self.check(&args, output, None)?;
        Ok(())
    }

    async fn container_status(&self, name: &str) -> Result<Option<ContainerStatus>, EngineError> {
        let args = ["container", "inspect", "--format", "{{.State.Status}}", name];
        let output = self.docker(&args, COMMAND_TIMEOUT).await?;
        match self.check(&args, output, Some(name)) {
            Ok(output) => Ok(Some(ContainerStatus::parse(&output.stdout))),
            Err(EngineError::NoSuchContainer(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn run_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        let owned = run_args(spec);
        let args: Vec<&str> = owned.iter().map(String::as_str).collect();
        let output = self.docker(&args, COMMAND_TIMEOUT).await?;
        let output = self.check(&args, output, None)?;
        Ok(output.stdout.trim().to_string())
    }

    async fn stop_container(&self, name: &str) -> Result<(), EngineError> {
        let args = ["stop", name];
        let output = self.docker(&args, COMMAND_TIMEOUT).await?;
        self.check(&args, output, Some(name))?;
        Ok(())
    }

    async fn remove_container(&self, name: &str) -> Result<(), EngineError> {
        let args = ["rm", "--force", "--volumes", name];
        let output = self.docker(&args, COMMAND_TIMEOUT).await?;
        self.check(&args, output, Some(name))?;
        Ok(())
    }
}

/// Arguments for `docker run` in detached mode.
pub fn run_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "--detach".to_string(),
        "--name".to_string(),
        spec.name.clone(),
    ];
    for (key, value) in &spec.env {
        args.push("--env".to_string());
        args.push(format!("{key}={value}"));
    }
    for port in &spec.ports {
        args.push("--publish".to_string());
        args.push(format!("{}:{}", port.host, port.container));
    }
    args.push(spec.image.clone());
    args
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::engine::PortMapping;

    fn spec() -> ContainerSpec {
        ContainerSpec {
            name: "postgres_multidb_container".to_string(),
            image: "postgres:latest".to_string(),
            env: vec![
                ("POSTGRES_USER".to_string(), "admin".to_string()),
                ("POSTGRES_PASSWORD".to_string(), "password".to_string()),
            ],
            ports: vec![PortMapping {
                host: 6969,
                container: 5432,
            }],
        }
    }

    #[test]
    fn run_args_layout() {
        assert_eq!(
            run_args(&spec()),
            vec![
                "run",
                "--detach",
                "--name",
                "postgres_multidb_container",
                "--env",
                "POSTGRES_USER=admin",
                "--env",
                "POSTGRES_PASSWORD=password",
                "--publish",
                "6969:5432",
                "postgres:latest",
            ]
        );
    }

    #[test]
    fn image_comes_last() {
        let args = run_args(&spec());
        assert_eq!(args.last().map(String::as_str), Some("postgres:latest"));
    }

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        let docker = DockerCli::new("detest-no-such-docker");
        let result = docker.container_status("anything").await;
        assert_matches!(result, Err(EngineError::Unavailable(_)));
    }

    #[test]
    fn check_maps_missing_container() {
        let docker = DockerCli::default();
        let output = CommandOutput {
            program: "docker".to_string(),
            stdout: String::new(),
            stderr: "Error response from daemon: No such container: pg".to_string(),
            exit_code: 1,
            duration_ms: 3,
        };
        let result = docker.check(&["stop", "pg"], output, Some("pg"));
        assert_matches!(result, Err(EngineError::NoSuchContainer(name)) if name == "pg");
    }

    #[test]
    fn check_reports_other_failures() {
        let docker = DockerCli::default();
        let output = CommandOutput {
            program: "docker".to_string(),
            stdout: String::new(),
            stderr: "port is already allocated\n".to_string(),
            exit_code: 125,
            duration_ms: 3,
        };
        let result = docker.check(&["run", "x"], output, None);
        assert_matches!(
            result,
            Err(EngineError::CommandFailed { exit_code: 125, ref stderr, .. })
                if stderr == "port is already allocated"
        );
    }
}
