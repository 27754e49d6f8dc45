pub mod create;
pub mod init;

use tokio_util::sync::CancellationToken;

/// Every unit passed (or the command succeeded).
pub const EXIT_OK: u8 = 0;
/// The run completed but some units failed or errored.
pub const EXIT_UNITS_FAILED: u8 = 1;
/// The command could not do its job (bad config, provisioning, service).
pub const EXIT_ERROR: u8 = 2;
/// Interrupted by Ctrl-C or SIGTERM.
pub const EXIT_CANCELLED: u8 = 130;

/// Cancel `token` on SIGINT or SIGTERM.
pub fn cancel_on_signal(token: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "Failed to install Ctrl-C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            () = ctrl_c => tracing::info!("Received SIGINT (Ctrl-C), cancelling run"),
            () = terminate => tracing::info!("Received SIGTERM, cancelling run"),
        }
        token.cancel();
    });
}
