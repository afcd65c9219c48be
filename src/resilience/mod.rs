//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound call (dispatch, direct call, probe, association):
//!     → timeouts.rs (enforce deadline; expiry is a transport failure)
//!     → On ordinary failure: backoff.rs (delay = base × 2^(k-1), capped)
//!     → scheduler.rs (delay queue; wakes the dispatch worker when due)
//!
//! Long-running operations (dispatch loop, failover run):
//!     → single_flight.rs (one runner, concurrent triggers dropped)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Backoff is deterministic by default; jitter is opt-in per caller
//! - Re-entry is a scheduled wake-up, never a recursive call

pub mod backoff;
pub mod scheduler;
pub mod single_flight;
pub mod timeouts;

pub use backoff::BackoffPolicy;
pub use scheduler::RetryScheduler;
pub use single_flight::{FlightGuard, SingleFlight};
