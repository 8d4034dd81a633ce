use std::future::pending;

use tokio::select;
use tracing::{error, info};

/// Waits for the process to be asked to terminate, via either SIGINT or SIGTERM.
///
/// If a handler cannot be registered for one of the signals, it is logged and only the other signal is waited on.
pub async fn wait_for_termination_signal() {
    let signal_name = select! {
        _ = interrupt() => "SIGINT",
        _ = terminate() => "SIGTERM",
    };

    info!("Received {}, shutting down...", signal_name);
}

async fn interrupt() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for SIGINT.");
        pending::<()>().await;
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            error!(error = %e, "Failed to listen for SIGTERM.");
            pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    pending::<()>().await;
}
