//! Failover subsystem.
//!
//! # Data Flow
//! ```text
//! trigger (monitor, SIGHUP, admin API)
//!     → coordinator.rs (single-flight run)
//!         → BackupNetworkStore::list() in rank order
//!         → attach.rs (NetworkAttacher: command or manual)
//!         → settle → ConnectivityProbe
//!     → switch-succeeded | switch-failed
//! ```
//!
//! # Design Decisions
//! - One run at a time; concurrent triggers are dropped, not queued
//! - Association errors never escape a run; only the aggregate outcome does
//! - Policy lives behind ArcSwap so config reloads apply to the next run

pub mod attach;
pub mod coordinator;

pub use attach::{AttachError, CommandAttacher, ManualAttacher, NetworkAttacher};
pub use coordinator::{FailoverCoordinator, FailoverOutcome, SwitchFailure};
