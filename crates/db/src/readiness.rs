//! Poll a freshly started server until it accepts connections.
//!
//! A container reporting "running" says nothing about PostgreSQL being
//! ready, so the provisioner calls [`wait_until_ready`] before creating
//! databases. Retries use a fixed interval and stop at a hard deadline.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::DbError;
use crate::server::DatabaseServer;

/// Tunable parameters for the readiness poll.
#[derive(Debug, Clone)]
pub struct ReadinessConfig {
    /// Delay between connection attempts.
    pub interval: Duration,
    /// Give up once this much time has passed since the first attempt.
    pub timeout: Duration,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Ping `server` until it answers, the timeout passes, or `cancel` fires.
///
/// Returns the number of attempts it took.
pub async fn wait_until_ready(
    server: &dyn DatabaseServer,
    config: &ReadinessConfig,
    cancel: &CancellationToken,
) -> Result<u32, DbError> {
    let start = Instant::now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let last_error = tokio::select! {
            _ = cancel.cancelled() => return Err(DbError::Cancelled),
            result = server.ping() => match result {
                Ok(()) => {
                    tracing::info!(
                        attempt,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Database accepting connections",
                    );
                    return Ok(attempt);
                }
                Err(e) => e.to_string(),
            }
        };

        if start.elapsed() + config.interval > config.timeout {
            return Err(DbError::Timeout {
                attempts: attempt,
                elapsed_ms: start.elapsed().as_millis() as u64,
                last_error,
            });
        }

        tracing::debug!(attempt, error = %last_error, "Database not ready yet");

        tokio::select! {
            _ = cancel.cancelled() => return Err(DbError::Cancelled),
            _ = tokio::time::sleep(config.interval) => {}
        }
    }
}
