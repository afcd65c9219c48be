//! Resilient dispatch subsystem.
//!
//! # Data Flow
//! ```text
//! enqueue / make_resilient_call
//!     → dispatcher.rs (sorted active set, capacity eviction, persist)
//!     → Notify ─▶ single worker ─▶ dispatch_loop (single-flight)
//!         → next eligible (tier desc, oldest first, no backoff pending)
//!         → Transport::call under deadline
//!         → completed | requeued (RetryScheduler) | deferred | failed
//!     → EventBus<DispatchEvent> after each durable transition
//! ```
//!
//! # Design Decisions
//! - At most one call in flight; ordering beats throughput here
//! - Transport failures are connectivity signals: the loop stops instead of
//!   burning attempts
//! - Completed and failed requests leave the active set immediately

pub mod dispatcher;
pub mod types;

pub use dispatcher::{ResilientDispatcher, QUEUE_KEY};
pub use types::{
    evict_over_capacity, sort_queue, DispatchError, DispatchEvent, DispatchEventKind,
    PendingRequest, PriorityTier, QueueStatistics, QueueStatus, RequestMetadata, RequestStatus,
};
