//! Quality classification.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::MonitorConfig;
use crate::connectivity::probe::ProbeResult;
use crate::connectivity::state::{AttachmentType, CellularGeneration, NetworkState, Reachability};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityClass {
    Excellent,
    Good,
    Poor,
    Disconnected,
    Switching,
}

impl QualityClass {
    /// Good enough to attempt a call directly instead of queueing it.
    pub fn allows_direct_call(&self) -> bool {
        matches!(self, QualityClass::Excellent | QualityClass::Good)
    }
}

impl fmt::Display for QualityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QualityClass::Excellent => "excellent",
            QualityClass::Good => "good",
            QualityClass::Poor => "poor",
            QualityClass::Disconnected => "disconnected",
            QualityClass::Switching => "switching",
        };
        f.write_str(s)
    }
}

/// Latency and signal thresholds for [`classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityThresholds {
    pub excellent_latency: Duration,
    pub good_latency: Duration,
    pub weak_signal: u8,
}

impl From<&MonitorConfig> for QualityThresholds {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            excellent_latency: Duration::from_millis(config.excellent_latency_ms),
            good_latency: Duration::from_millis(config.good_latency_ms),
            weak_signal: config.weak_signal_threshold,
        }
    }
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self::from(&MonitorConfig::default())
    }
}

/// The platform itself reports a weak link (2G, or a weak WiFi signal).
pub fn attachment_is_poor(state: &NetworkState, thresholds: &QualityThresholds) -> bool {
    let Some(hint) = state.quality_hint else {
        return false;
    };
    match state.attachment {
        AttachmentType::Cellular => hint.cellular_generation == Some(CellularGeneration::G2),
        AttachmentType::Wifi => hint
            .signal_strength
            .is_some_and(|strength| strength < thresholds.weak_signal),
        _ => false,
    }
}

/// Derive the quality class. Rules apply in order, first match wins.
pub fn classify(
    state: &NetworkState,
    last_probe: Option<&ProbeResult>,
    switching: bool,
    thresholds: &QualityThresholds,
) -> QualityClass {
    if !state.connected {
        return QualityClass::Disconnected;
    }
    if switching {
        return QualityClass::Switching;
    }
    if state.internet_reachable == Reachability::Unreachable {
        return QualityClass::Poor;
    }
    if attachment_is_poor(state, thresholds) {
        return QualityClass::Poor;
    }
    match last_probe {
        Some(probe) if probe.success => {
            if probe.latency < thresholds.excellent_latency {
                QualityClass::Excellent
            } else if probe.latency < thresholds.good_latency {
                QualityClass::Good
            } else {
                QualityClass::Poor
            }
        }
        _ => QualityClass::Good,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::state::QualityHint;

    fn probe(success: bool, latency_ms: u64) -> ProbeResult {
        ProbeResult {
            success,
            latency: Duration::from_millis(latency_ms),
            timestamp: 0,
            status: None,
            error: None,
        }
    }

    #[test]
    fn test_rule_order() {
        let t = QualityThresholds::default();
        let online = NetworkState::online(AttachmentType::Wifi);

        assert_eq!(classify(&NetworkState::disconnected(), None, true, &t), QualityClass::Disconnected);
        assert_eq!(classify(&online, None, true, &t), QualityClass::Switching);
        assert_eq!(
            classify(&NetworkState::captive(AttachmentType::Wifi), Some(&probe(true, 10)), false, &t),
            QualityClass::Poor
        );
        assert_eq!(classify(&online, None, false, &t), QualityClass::Good);
    }

    #[test]
    fn test_latency_buckets() {
        let t = QualityThresholds::default();
        let online = NetworkState::online(AttachmentType::Ethernet);

        assert_eq!(classify(&online, Some(&probe(true, 999)), false, &t), QualityClass::Excellent);
        assert_eq!(classify(&online, Some(&probe(true, 1_000)), false, &t), QualityClass::Good);
        assert_eq!(classify(&online, Some(&probe(true, 2_999)), false, &t), QualityClass::Good);
        assert_eq!(classify(&online, Some(&probe(true, 3_000)), false, &t), QualityClass::Poor);
        // A failed probe says nothing about latency
        assert_eq!(classify(&online, Some(&probe(false, 50)), false, &t), QualityClass::Good);
    }

    #[test]
    fn test_attachment_hints() {
        let t = QualityThresholds::default();
        let edge = NetworkState::online(AttachmentType::Cellular).with_hint(QualityHint {
            cellular_generation: Some(CellularGeneration::G2),
            signal_strength: None,
        });
        let lte = NetworkState::online(AttachmentType::Cellular).with_hint(QualityHint {
            cellular_generation: Some(CellularGeneration::G4),
            signal_strength: None,
        });
        let weak_wifi = NetworkState::online(AttachmentType::Wifi).with_hint(QualityHint {
            cellular_generation: None,
            signal_strength: Some(29),
        });
        let ok_wifi = NetworkState::online(AttachmentType::Wifi).with_hint(QualityHint {
            cellular_generation: None,
            signal_strength: Some(30),
        });

        assert!(attachment_is_poor(&edge, &t));
        assert!(!attachment_is_poor(&lte, &t));
        assert!(attachment_is_poor(&weak_wifi, &t));
        assert!(!attachment_is_poor(&ok_wifi, &t));
        assert_eq!(classify(&edge, Some(&probe(true, 10)), false, &t), QualityClass::Poor);
    }
}
