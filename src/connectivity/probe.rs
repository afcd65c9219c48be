//! Reachability probing.
//!
//! # Responsibilities
//! - Fetch a small cache-busted endpoint and time it
//! - Remember the most recent result for quality scoring
//!
//! Used by the monitor (`force_probe`), the failover coordinator (verifying a
//! candidate) and the probe-driven connectivity source.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::clock::{self, now_ms};
use crate::config::ProbeConfig;
use crate::observability::metrics;
use crate::resilience::timeouts::with_deadline;
use crate::transport::{CallError, CallTarget, Transport};

/// Outcome of one reachability probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub success: bool,
    #[serde(rename = "latency_ms", with = "clock::duration_ms")]
    pub latency: Duration,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// HTTP status, absent when the call never got a response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProbeResult {
    /// The endpoint answered, even if with a failure status.
    pub fn got_response(&self) -> bool {
        self.status.is_some()
    }
}

/// Reachability probe shared by all connectivity consumers.
pub struct ConnectivityProbe {
    transport: Arc<dyn Transport>,
    config: ProbeConfig,
    last: Mutex<Option<ProbeResult>>,
}

impl ConnectivityProbe {
    pub fn new(transport: Arc<dyn Transport>, config: ProbeConfig) -> Self {
        Self {
            transport,
            config,
            last: Mutex::new(None),
        }
    }

    /// Issue one probe and remember its result.
    pub async fn probe(&self) -> ProbeResult {
        let target = CallTarget::get(&self.config.url).with_header("Cache-Control", "no-cache");
        let started = Instant::now();
        let limit = self.config.timeout();
        let outcome = with_deadline(limit, self.transport.call(&target, limit)).await;
        let latency = started.elapsed();

        let result = match outcome {
            Ok(response) if response.is_success() => ProbeResult {
                success: true,
                latency,
                timestamp: now_ms(),
                status: Some(response.status),
                error: None,
            },
            Ok(response) => {
                tracing::warn!(status = response.status, "Probe failed: non-success status");
                ProbeResult {
                    success: false,
                    latency,
                    timestamp: now_ms(),
                    status: Some(response.status),
                    error: Some(CallError::Protocol { status: response.status }.to_string()),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Probe failed: no response");
                ProbeResult {
                    success: false,
                    latency,
                    timestamp: now_ms(),
                    status: None,
                    error: Some(e.to_string()),
                }
            }
        };

        metrics::record_probe(result.success, result.latency);
        tracing::debug!(
            success = result.success,
            latency_ms = result.latency.as_millis() as u64,
            "Probe complete"
        );

        *self.last.lock().expect("probe mutex poisoned") = Some(result.clone());
        result
    }

    /// Most recent probe result, if any probe has run.
    pub fn last_result(&self) -> Option<ProbeResult> {
        self.last.lock().expect("probe mutex poisoned").clone()
    }
}

impl std::fmt::Debug for ConnectivityProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityProbe")
            .field("url", &self.config.url)
            .field("timeout_ms", &self.config.timeout_ms)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{CallResponse, TransportErrorKind};
    use async_trait::async_trait;

    struct Fixed(Result<CallResponse, CallError>);

    #[async_trait]
    impl Transport for Fixed {
        async fn call(&self, target: &CallTarget, _timeout: Duration) -> Result<CallResponse, CallError> {
            assert!(target.has_header("cache-control"));
            self.0.clone()
        }
    }

    fn probe_with(outcome: Result<CallResponse, CallError>) -> ConnectivityProbe {
        ConnectivityProbe::new(Arc::new(Fixed(outcome)), ProbeConfig::default())
    }

    #[tokio::test]
    async fn test_success_is_remembered() {
        let probe = probe_with(Ok(CallResponse::new(200, "+12°C")));
        assert!(probe.last_result().is_none());

        let result = probe.probe().await;
        assert!(result.success);
        assert_eq!(result.status, Some(200));
        assert_eq!(probe.last_result(), Some(result));
    }

    #[tokio::test]
    async fn test_failure_status_keeps_response() {
        let result = probe_with(Ok(CallResponse::new(503, ""))).probe().await;
        assert!(!result.success);
        assert!(result.got_response());
        assert_eq!(result.error.as_deref(), Some("HTTP 503"));
    }

    #[tokio::test]
    async fn test_transport_failure_has_no_status() {
        let result = probe_with(Err(CallError::transport(TransportErrorKind::Connect, "refused")))
            .probe()
            .await;
        assert!(!result.success);
        assert!(!result.got_response());
    }

    /// Ignores the timeout it is handed.
    struct Stalled;

    #[async_trait]
    impl Transport for Stalled {
        async fn call(&self, _target: &CallTarget, _timeout: Duration) -> Result<CallResponse, CallError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_transport_hits_deadline() {
        let probe = ConnectivityProbe::new(
            Arc::new(Stalled),
            ProbeConfig {
                timeout_ms: 2_000,
                ..ProbeConfig::default()
            },
        );

        let result = probe.probe().await;
        assert!(!result.success);
        assert!(!result.got_response());
        assert!(result.error.unwrap().contains("2000ms"));
        assert!(result.latency >= Duration::from_secs(2));
    }

    #[test]
    fn test_latency_serialized_as_millis() {
        let result = ProbeResult {
            success: true,
            latency: Duration::from_millis(420),
            timestamp: 1,
            status: Some(200),
            error: None,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["latency_ms"], 420);
        assert!(json.get("error").is_none());
    }
}
