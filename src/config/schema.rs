//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the daemon.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for linkguard.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct LinkguardConfig {
    /// Where queue and catalogue snapshots live.
    pub storage: StorageConfig,

    /// Reachability probe settings.
    pub probe: ProbeConfig,

    /// Connectivity source settings.
    pub source: SourceConfig,

    /// Monitor history and quality thresholds.
    pub monitor: MonitorConfig,

    /// Failover policy.
    pub failover: FailoverConfig,

    /// Dispatch queue policy.
    pub dispatcher: DispatcherConfig,

    /// How backup networks are associated.
    pub attachment: AttachmentConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,
}

/// Durable storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding one JSON file per storage key.
    pub data_dir: String,

    /// Keyring service name credentials are filed under.
    pub credential_service: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            credential_service: "linkguard".to_string(),
        }
    }
}

/// Reachability probe configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ProbeConfig {
    /// Small, cache-busted endpoint fetched by every probe.
    pub url: String,

    /// Probe timeout in milliseconds.
    pub timeout_ms: u64,
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            url: "https://wttr.in/Washington?format=%t".to_string(),
            timeout_ms: 10_000,
        }
    }
}

/// Kind of primary attachment reported by the probe-driven source.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PrimaryAttachment {
    Cellular,
    #[default]
    Wifi,
    Ethernet,
    Other,
}

/// Probe-driven connectivity source configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SourceConfig {
    /// Seconds between probes.
    pub poll_interval_secs: u64,

    /// Attachment reported while connected.
    pub primary_attachment: PrimaryAttachment,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 15,
            primary_attachment: PrimaryAttachment::Wifi,
        }
    }
}

/// Connectivity monitor configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    /// Bounded state history size.
    pub history_size: usize,

    /// Probe latency below this is excellent.
    pub excellent_latency_ms: u64,

    /// Probe latency below this is good; above is poor.
    pub good_latency_ms: u64,

    /// WiFi signal strength below this is poor.
    pub weak_signal_threshold: u8,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            history_size: 20,
            excellent_latency_ms: 1_000,
            good_latency_ms: 3_000,
            weak_signal_threshold: 30,
        }
    }
}

/// Failover policy. Hot-reloadable.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct FailoverConfig {
    /// Trigger automatically on connectivity loss.
    pub auto_failover: bool,

    /// Association attempts per candidate.
    pub max_attempts: u32,

    pub base_delay_ms: u64,
    pub max_delay_ms: u64,

    /// Fraction of extra random delay between attempts (0 disables).
    pub jitter_ratio: f64,

    /// Bound on a single association attempt.
    pub association_timeout_ms: u64,

    /// Wait between association and the verification probe.
    pub settle_ms: u64,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            auto_failover: true,
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter_ratio: 0.0,
            association_timeout_ms: 30_000,
            settle_ms: 3_000,
        }
    }
}

/// Dispatch queue policy. Hot-reloadable.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Maximum active requests before eviction.
    pub capacity: usize,

    /// Default processed attempts before a request fails.
    pub max_attempts: u32,

    pub base_delay_ms: u64,
    pub max_delay_ms: u64,

    /// Bound on a single dispatched call.
    pub request_timeout_ms: u64,

    /// Requests older than this are expired unattempted.
    pub retention_secs: u64,

    /// Pause between consecutive dispatches.
    pub inter_request_delay_ms: u64,

    /// Delay before a request deferred by a transport failure is offered
    /// to the worker again. The re-entered cycle still checks reachability
    /// first.
    pub deferred_recheck_ms: u64,

    /// Period of the worker's expiry sweep, which runs even while dispatch
    /// is stalled.
    pub expiry_sweep_ms: u64,
}

impl DispatcherConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn inter_request_delay(&self) -> Duration {
        Duration::from_millis(self.inter_request_delay_ms)
    }

    pub fn deferred_recheck(&self) -> Duration {
        Duration::from_millis(self.deferred_recheck_ms)
    }

    pub fn expiry_sweep(&self) -> Duration {
        Duration::from_millis(self.expiry_sweep_ms)
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            max_attempts: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            request_timeout_ms: 30_000,
            retention_secs: 24 * 60 * 60,
            inter_request_delay_ms: 100,
            deferred_recheck_ms: 5_000,
            expiry_sweep_ms: 60_000,
        }
    }
}

/// Network attachment configuration.
///
/// Empty command vectors mean association is unsupported and failover falls
/// back to asking the operator.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
#[serde(default)]
pub struct AttachmentConfig {
    /// Command for secure networks; `{name}` and `{credential}` are substituted.
    pub command: Vec<String>,

    /// Command for open networks; `{name}` is substituted.
    pub open_command: Vec<String>,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8181".to_string(),
        }
    }
}
