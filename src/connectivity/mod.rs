//! Connectivity subsystem.
//!
//! # Data Flow
//! ```text
//! ConnectivitySource (ManualSource | ProbeDrivenSource)
//!     → watch channel
//!     → monitor.rs (history, quality, failover decision)
//!     → EventBus<ConnectivityEvent> (state-changed, switch-*)
//!     → FailoverCoordinator (own task) / ResilientDispatcher (kick)
//!
//! probe.rs ──latency──▶ quality.rs ──QualityClass──▶ monitor.rs
//! ```
//!
//! # Design Decisions
//! - The monitor never blocks on I/O when asked for current state
//! - Quality is derived on read from the latest state, probe and switch flag
//! - Failover runs on its own task so state delivery is never stalled

pub mod monitor;
pub mod probe;
pub mod quality;
pub mod source;
pub mod state;

use serde::Serialize;

use crate::events::Event;
use crate::failover::SwitchFailure;
use crate::networks::BackupNetwork;

pub use monitor::{ConnectivityMonitor, ConnectivitySnapshot, ConnectivityStatistics, HistoryEntry};
pub use probe::{ConnectivityProbe, ProbeResult};
pub use quality::{attachment_is_poor, classify, QualityClass, QualityThresholds};
pub use source::{ConnectivitySource, ManualSource, ProbeDrivenSource};
pub use state::{AttachmentType, CellularGeneration, NetworkState, QualityHint, Reachability};

/// Something observable happened to connectivity or failover.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ConnectivityEvent {
    StateChanged {
        current: NetworkState,
        previous: NetworkState,
    },
    SwitchStarted,
    SwitchSucceeded {
        candidate: BackupNetwork,
    },
    SwitchFailed {
        reason: SwitchFailure,
    },
    /// Association is not automated here; an operator has to join
    /// `candidate` by hand.
    ManualActionRequired {
        candidate: BackupNetwork,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectivityEventKind {
    StateChanged,
    SwitchStarted,
    SwitchSucceeded,
    SwitchFailed,
    ManualActionRequired,
}

impl Event for ConnectivityEvent {
    type Kind = ConnectivityEventKind;

    fn kind(&self) -> ConnectivityEventKind {
        match self {
            ConnectivityEvent::StateChanged { .. } => ConnectivityEventKind::StateChanged,
            ConnectivityEvent::SwitchStarted => ConnectivityEventKind::SwitchStarted,
            ConnectivityEvent::SwitchSucceeded { .. } => ConnectivityEventKind::SwitchSucceeded,
            ConnectivityEvent::SwitchFailed { .. } => ConnectivityEventKind::SwitchFailed,
            ConnectivityEvent::ManualActionRequired { .. } => {
                ConnectivityEventKind::ManualActionRequired
            }
        }
    }
}
