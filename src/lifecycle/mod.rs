//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Build collaborators → Restore catalogue and queue
//!     → Initialize monitor → Start dispatch worker → Admin API
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Broadcast → Stop worker and monitor → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!     SIGHUP → Trigger a manual failover
//! ```
//!
//! # Design Decisions
//! - Ordered startup: storage first, then core, then listeners
//! - Ordered shutdown: worker, monitor, then background tasks
//! - Durable state is restored before anything can mutate it

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::{SignalAction, Signals};
pub use startup::{Collaborators, Services, StartupError};
