//! Administrative access to the PostgreSQL server inside the container.

use async_trait::async_trait;
use sqlx::{Connection, Executor, PgConnection};

use crate::error::DbError;

/// Prefix of every logical database created for a run.
pub const DATABASE_NAME_PREFIX: &str = "database_";

/// Maximum identifier length PostgreSQL accepts without truncation.
const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Server-level operations the provisioner needs.
#[async_trait]
pub trait DatabaseServer: Send + Sync {
    /// Open and close one connection; `Ok` means the server accepts clients.
    async fn ping(&self) -> Result<(), DbError>;

    /// Create every database in `names` over a single admin connection.
    async fn create_databases(&self, names: &[String]) -> Result<(), DbError>;
}

/// [`DatabaseServer`] backed by a real PostgreSQL instance.
pub struct PgServer {
    admin_url: String,
}

impl PgServer {
    /// `admin_url` must point at an existing maintenance database
    /// (usually `postgres`).
    pub fn new(admin_url: String) -> Self {
        Self { admin_url }
    }
}

#[async_trait]
impl DatabaseServer for PgServer {
    async fn ping(&self) -> Result<(), DbError> {
        let conn = PgConnection::connect(&self.admin_url).await?;
        conn.close().await?;
        Ok(())
    }

    async fn create_databases(&self, names: &[String]) -> Result<(), DbError> {
        for name in names {
            if !is_safe_identifier(name) {
                return Err(DbError::InvalidName(name.clone()));
            }
        }

        let mut conn = PgConnection::connect(&self.admin_url).await?;
        for name in names {
            // CREATE DATABASE cannot take bind parameters or run inside a
            // transaction; the name was validated above.
            conn.execute(format!("CREATE DATABASE {name}").as_str())
                .await?;
            tracing::info!(database = %name, "Created database");
        }
        conn.close().await?;
        Ok(())
    }
}

/// Deterministic database names `database_1` .. `database_{count}`.
pub fn database_names(count: usize) -> Vec<String> {
    (1..=count)
        .map(|i| format!("{DATABASE_NAME_PREFIX}{i}"))
        .collect()
}

/// Lower-case letters, digits and underscores, starting with a letter or
/// underscore. Prevents SQL injection through the database name.
pub fn is_safe_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    name.len() <= MAX_IDENTIFIER_LENGTH
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
