//! PostgreSQL access for the orchestrator: connection pools for test
//! units, the administrative [`server::DatabaseServer`] used to carve out
//! logical databases, and the readiness poll run after container start.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;

pub mod error;
pub mod readiness;
pub mod server;

pub use error::DbError;

pub type DbPool = sqlx::PgPool;

/// Connections per test-unit pool. Units are short-lived and mostly
/// sequential inside, so a handful is plenty.
const UNIT_POOL_MAX_CONNECTIONS: u32 = 5;

/// How long a unit waits for a pooled connection before erroring.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Create a connection pool from a database URL, connecting eagerly.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(UNIT_POOL_MAX_CONNECTIONS)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(database_url)
        .await
}

/// Create a pool that only connects on first use.
///
/// Fails only when the URL itself is malformed.
pub fn create_lazy_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(UNIT_POOL_MAX_CONNECTIONS)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect_lazy(database_url)
}

/// Run a trivial query to confirm the pool can reach the database.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lazy_pool_does_not_connect() {
        // Nothing listens on port 1; a lazy pool must still be created.
        let pool = create_lazy_pool("postgresql://u:p@127.0.0.1:1/database_1").unwrap();
        assert_eq!(pool.size(), 0);
        pool.close().await;
    }

    #[tokio::test]
    async fn lazy_pool_rejects_malformed_url() {
        assert!(create_lazy_pool("not a url").is_err());
    }
}
