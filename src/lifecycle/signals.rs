//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers (SIGTERM, SIGINT, SIGHUP)
//! - Translate signals to internal actions
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - SIGHUP requests a manual failover, not shutdown
//! - Config reload is driven by the file watcher, not a signal

use std::io;

/// What the daemon should do about a received signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    Shutdown,
    Failover,
}

/// Registered signal streams. Create once and poll with [`Signals::recv`].
pub struct Signals {
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    hangup: tokio::signal::unix::Signal,
}

impl Signals {
    #[cfg(unix)]
    pub fn new() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            terminate: signal(SignalKind::terminate())?,
            interrupt: signal(SignalKind::interrupt())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    #[cfg(not(unix))]
    pub fn new() -> io::Result<Self> {
        Ok(Self {})
    }

    /// Wait for the next signal.
    #[cfg(unix)]
    pub async fn recv(&mut self) -> SignalAction {
        tokio::select! {
            _ = self.terminate.recv() => {
                tracing::info!("Received SIGTERM");
                SignalAction::Shutdown
            }
            _ = self.interrupt.recv() => {
                tracing::info!("Received SIGINT");
                SignalAction::Shutdown
            }
            _ = self.hangup.recv() => {
                tracing::info!("Received SIGHUP");
                SignalAction::Failover
            }
        }
    }

    #[cfg(not(unix))]
    pub async fn recv(&mut self) -> SignalAction {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Received Ctrl-C");
        SignalAction::Shutdown
    }
}
