//! Process utilities.

use tracing::{error, info};

/// Resolve when the process receives Ctrl+C.
///
/// If the signal handler cannot be installed the future never resolves,
/// leaving shutdown to the other exit paths.
pub async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
}
