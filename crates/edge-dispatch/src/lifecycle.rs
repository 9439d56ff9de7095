//! Process signal handling.

use crate::pool::dispatcher::DispatcherHandle;
use tokio::signal;

/// Resolves when the process receives Ctrl+C or, on unix, `SIGTERM`.
///
/// A signal whose handler cannot be installed is logged and never fires.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::error!("Failed to install SIGTERM handler: {_e}");
                core::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = core::future::pending::<()>();

    let ctrl_c = async {
        if let Err(_e) = signal::ctrl_c().await {
            #[cfg(feature = "tracing")]
            tracing::error!("Failed to install Ctrl+C handler: {_e}");
            core::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received SIGTERM signal");
        },
    }
}

/// Stops `handle` on the first shutdown signal and waits until the
/// dispatcher has fully wound down.
///
/// Returns early, without waiting for a signal, if the dispatcher is stopped
/// by other means.
pub async fn stop_on_signal(handle: DispatcherHandle) {
    tokio::select! {
        () = shutdown_signal() => handle.stop(),
        () = handle.stopped() => {}
    }
    handle.stopped().await;

    #[cfg(feature = "tracing")]
    tracing::info!("Dispatcher shut down successfully");
}
