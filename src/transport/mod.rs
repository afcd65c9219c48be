//! Outbound transport subsystem.
//!
//! # Data Flow
//! ```text
//! ResilientDispatcher / ConnectivityProbe / FailoverCoordinator
//!     → Transport::call(target, timeout)
//!     → http.rs (reqwest) or a test double
//!     → CallResponse { status, headers, body } | CallError
//! ```
//!
//! # Design Decisions
//! - A call that returns any status is a successful call; status
//!   classification is the caller's job (`ensure_success`)
//! - Timeouts are part of the call contract, not an afterthought
//! - Errors are classified once, here, into the shared taxonomy

pub mod http;
pub mod types;

use std::time::Duration;

use async_trait::async_trait;

pub use http::HttpTransport;
pub use types::{
    CallError, CallResponse, CallTarget, ResponseBody, TransportErrorKind, IDEMPOTENCY_KEY,
};

/// Generic outbound call primitive.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn call(&self, target: &CallTarget, timeout: Duration) -> Result<CallResponse, CallError>;
}
