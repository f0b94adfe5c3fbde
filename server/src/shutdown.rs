//! Graceful shutdown handling.
//!
//! Termination signals flip a `watch` channel that the coordinator checks at
//! every suspension point. Tests hold the sender directly instead.

use log::{error, info};
use std::io;
use tokio::sync::watch;

/// Waits for SIGINT or SIGTERM (Ctrl+C elsewhere).
pub async fn wait_for_signal() -> io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => info!("SIGINT received - initiating graceful shutdown"),
            _ = sigterm.recv() => info!("SIGTERM received - initiating graceful shutdown"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Ctrl+C received - initiating graceful shutdown");
    }

    Ok(())
}

/// Spawns a task that raises the returned flag on the first termination
/// signal.
pub fn listen_for_signals() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);

    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(()) => {
                let _ = tx.send(true);
            }
            Err(e) => {
                error!("Failed to install signal handlers: {}", e);
                // Keep the sender alive so the server keeps running.
                std::future::pending::<()>().await;
            }
        }
    });

    rx
}

/// Resolves once shutdown has been requested. Never resolves if the sender is
/// dropped without requesting it.
pub async fn requested(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
