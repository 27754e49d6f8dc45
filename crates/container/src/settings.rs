use std::time::Duration;

use detest_core::types::DatabaseEndpoint;

use crate::engine::{ContainerSpec, PortMapping};

/// Port PostgreSQL listens on inside the container.
pub const POSTGRES_CONTAINER_PORT: u16 = 5432;

/// Maintenance database used for the admin connection.
const ADMIN_DATABASE: &str = "postgres";

/// Database container configuration loaded from environment variables.
///
/// All fields have defaults suitable for a developer machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresSettings {
    pub image: String,
    /// Fixed, well-known container name; at most one exists at a time.
    pub container_name: String,
    /// Host the published port is reachable on.
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Bound on the database readiness poll.
    pub ready_timeout: Duration,
}

impl Default for PostgresSettings {
    fn default() -> Self {
        Self {
            image: "postgres:latest".to_string(),
            container_name: "postgres_multidb_container".to_string(),
            host: "localhost".to_string(),
            port: 6969,
            user: "admin".to_string(),
            password: "password".to_string(),
            ready_timeout: Duration::from_secs(60),
        }
    }
}

impl PostgresSettings {
    /// Load settings from environment variables with defaults.
    ///
    /// | Env Var                        | Default                       |
    /// |--------------------------------|-------------------------------|
    /// | `DETEST_PG_IMAGE`              | `postgres:latest`             |
    /// | `DETEST_PG_CONTAINER`          | `postgres_multidb_container`  |
    /// | `DETEST_PG_HOST`               | `localhost`                   |
    /// | `DETEST_PG_PORT`               | `6969`                        |
    /// | `DETEST_PG_USER`               | `admin`                       |
    /// | `DETEST_PG_PASSWORD`           | `password`                    |
    /// | `DETEST_PG_READY_TIMEOUT_SECS` | `60`                          |
    ///
    /// Unparseable numeric values fall back to the default with a warning.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let string = |key: &str, default: String| std::env::var(key).unwrap_or(default);

        let port = parse_env("DETEST_PG_PORT").unwrap_or(defaults.port);
        let ready_timeout = parse_env("DETEST_PG_READY_TIMEOUT_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.ready_timeout);

        Self {
            image: string("DETEST_PG_IMAGE", defaults.image),
            container_name: string("DETEST_PG_CONTAINER", defaults.container_name),
            host: string("DETEST_PG_HOST", defaults.host),
            port,
            user: string("DETEST_PG_USER", defaults.user),
            password: string("DETEST_PG_PASSWORD", defaults.password),
            ready_timeout,
        }
    }

    /// URL of the maintenance database used to create the per-slot ones.
    pub fn admin_url(&self) -> String {
        self.endpoint(ADMIN_DATABASE).url
    }

    pub fn endpoint(&self, database: &str) -> DatabaseEndpoint {
        DatabaseEndpoint::new(&self.host, self.port, &self.user, &self.password, database)
    }

    /// The container to start for these settings.
    pub fn container_spec(&self) -> ContainerSpec {
        ContainerSpec {
            name: self.container_name.clone(),
            image: self.image.clone(),
            env: vec![
                ("POSTGRES_USER".to_string(), self.user.clone()),
                ("POSTGRES_PASSWORD".to_string(), self.password.clone()),
            ],
            ports: vec![PortMapping {
                host: self.port,
                container: POSTGRES_CONTAINER_PORT,
            }],
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparseable setting");
            None
        }
    }
}
