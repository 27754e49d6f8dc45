#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Invalid database name: '{0}'")]
    InvalidName(String),

    #[error("Database not ready after {attempts} attempts ({elapsed_ms}ms): {last_error}")]
    Timeout {
        attempts: u32,
        elapsed_ms: u64,
        last_error: String,
    },

    #[error("Readiness wait cancelled")]
    Cancelled,
}
