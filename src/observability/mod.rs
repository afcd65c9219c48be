//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout via the fmt layer
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured fields, never formatted strings, for ids and counts
//! - Request ids flow through every dispatch log line
//! - Metrics are cheap (atomic increments) and recorded even when no
//!   exporter is installed

pub mod logging;
pub mod metrics;
