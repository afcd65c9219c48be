//! Timeout enforcement.
//!
//! Every outbound operation (dispatch, direct call, probe, association) runs
//! under an explicit deadline. An elapsed deadline is reported as a transport
//! timeout so callers classify it like any other transport failure.

use std::future::Future;
use std::time::Duration;

use crate::transport::{CallError, TransportErrorKind};

/// Run `fut` under `limit`, mapping expiry to [`CallError::Transport`].
pub async fn with_deadline<F, T>(limit: Duration, fut: F) -> Result<T, CallError>
where
    F: Future<Output = Result<T, CallError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(CallError::Transport {
            kind: TransportErrorKind::Timeout,
            message: format!("deadline of {}ms elapsed", limit.as_millis()),
        }),
    }
}
