//! Shutdown signal for long-running commands
//!
//! `modulectl sweep` runs until the process receives SIGTERM or Ctrl+C. The
//! receiver carries the name of the signal so the sweep can log why it stopped.

use tokio::sync::watch;
use tracing::warn;

/// Spawn a signal listener and return a receiver that changes to
/// `Some(signal name)` once. Must be called inside a Tokio runtime.
pub fn create_shutdown_receiver() -> watch::Receiver<Option<&'static str>> {
    let (tx, rx) = watch::channel(None);

    tokio::spawn(async move {
        let received = termination_signal().await;
        let _ = tx.send(Some(received));
    });

    rx
}

#[cfg(unix)]
async fn termination_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            received = ctrl_c() => received,
        },
        Err(e) => {
            warn!("SIGTERM handler unavailable, stopping on Ctrl+C only: {}", e);
            ctrl_c().await
        }
    }
}

#[cfg(not(unix))]
async fn termination_signal() -> &'static str {
    ctrl_c().await
}

/// Resolves on Ctrl+C; never resolves if the handler cannot be installed
async fn ctrl_c() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Ctrl+C handler unavailable: {}", e);
        std::future::pending::<()>().await;
    }
    "Ctrl+C"
}
