//! Signal handling for graceful shutdown.
//!
//! SIGINT and SIGTERM flip a [`ShutdownToken`]. The applier checks the token
//! between operations, so an in-flight firewall or jail change always
//! completes before the process stops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken {
    flag: Arc<AtomicBool>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Spawn a task that cancels this token on SIGINT or SIGTERM.
    ///
    /// Must be called from within a tokio runtime. If handlers cannot be
    /// registered (restricted environments) the token simply never fires.
    pub fn listen_for_signals(&self) {
        let token = self.clone();
        tokio::spawn(async move {
            let sigint = signal(SignalKind::interrupt())
                .map_err(|e| warn!("Failed to register SIGINT handler: {}", e))
                .ok();
            let sigterm = signal(SignalKind::terminate())
                .map_err(|e| warn!("Failed to register SIGTERM handler: {}", e))
                .ok();

            let name = match (sigint, sigterm) {
                (Some(mut int), Some(mut term)) => {
                    tokio::select! {
                        _ = int.recv() => "SIGINT",
                        _ = term.recv() => "SIGTERM",
                    }
                }
                (Some(mut int), None) => {
                    int.recv().await;
                    "SIGINT"
                }
                (None, Some(mut term)) => {
                    term.recv().await;
                    "SIGTERM"
                }
                (None, None) => {
                    warn!("No signal handlers registered - graceful shutdown disabled");
                    return;
                }
            };

            info!(
                "Received {}, finishing the current operation before stopping...",
                name
            );
            token.cancel();
        });
    }
}
