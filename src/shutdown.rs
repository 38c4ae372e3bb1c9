//! Shutdown signalling
//!
//! SIGINT and SIGTERM cancel a shared `CancellationToken`. The monitor loop
//! observes the token between polls.

use crate::error::{Error, Result};
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Wait for SIGINT or SIGTERM, returning the signal name
pub async fn wait_for_signal() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| Error::Internal(format!("cannot register SIGTERM handler: {}", e)))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| Error::Internal(format!("cannot register SIGINT handler: {}", e)))?;

    let name = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    Ok(name)
}

/// Cancel `token` on the first shutdown signal. The task also ends when the
/// token is cancelled by someone else.
pub fn spawn_signal_listener(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            result = wait_for_signal() => match result {
                Ok(name) => {
                    info!("Received {}, shutting down", name);
                    token.cancel();
                }
                Err(e) => error!("Signal handling unavailable: {}", e),
            },
            _ = token.cancelled() => {}
        }
    })
}
