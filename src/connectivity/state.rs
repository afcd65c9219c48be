//! Network state snapshots.

use serde::{Deserialize, Serialize};

use crate::config::PrimaryAttachment;

/// How the host is attached to a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentType {
    #[default]
    None,
    Cellular,
    Wifi,
    Ethernet,
    Other,
}

impl AttachmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttachmentType::None => "none",
            AttachmentType::Cellular => "cellular",
            AttachmentType::Wifi => "wifi",
            AttachmentType::Ethernet => "ethernet",
            AttachmentType::Other => "other",
        }
    }
}

impl From<PrimaryAttachment> for AttachmentType {
    fn from(primary: PrimaryAttachment) -> Self {
        match primary {
            PrimaryAttachment::Cellular => AttachmentType::Cellular,
            PrimaryAttachment::Wifi => AttachmentType::Wifi,
            PrimaryAttachment::Ethernet => AttachmentType::Ethernet,
            PrimaryAttachment::Other => AttachmentType::Other,
        }
    }
}

/// Whether the internet is reachable over the current attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Reachability {
    Reachable,
    Unreachable,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellularGeneration {
    #[serde(rename = "2g")]
    G2,
    #[serde(rename = "3g")]
    G3,
    #[serde(rename = "4g")]
    G4,
    #[serde(rename = "5g")]
    G5,
}

/// Optional link-quality details reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct QualityHint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cellular_generation: Option<CellularGeneration>,
    /// 0..=100
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_strength: Option<u8>,
}

/// Immutable connectivity snapshot. Replaced wholesale on every change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NetworkState {
    pub attachment: AttachmentType,
    pub connected: bool,
    pub internet_reachable: Reachability,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_hint: Option<QualityHint>,
}

impl NetworkState {
    /// Nothing attached.
    pub fn disconnected() -> Self {
        Self {
            attachment: AttachmentType::None,
            connected: false,
            internet_reachable: Reachability::Unreachable,
            quality_hint: None,
        }
    }

    /// Attached via `attachment` with working internet.
    pub fn online(attachment: AttachmentType) -> Self {
        Self {
            attachment,
            connected: true,
            internet_reachable: Reachability::Reachable,
            quality_hint: None,
        }
    }

    /// Attached via `attachment` but the internet is not reachable.
    pub fn captive(attachment: AttachmentType) -> Self {
        Self {
            attachment,
            connected: true,
            internet_reachable: Reachability::Unreachable,
            quality_hint: None,
        }
    }

    pub fn with_hint(mut self, hint: QualityHint) -> Self {
        self.quality_hint = Some(hint);
        self
    }

    /// Connected and the internet is known to be reachable.
    pub fn is_reachable(&self) -> bool {
        self.connected && self.internet_reachable == Reachability::Reachable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reachability_requires_connection() {
        assert!(NetworkState::online(AttachmentType::Wifi).is_reachable());
        assert!(!NetworkState::captive(AttachmentType::Wifi).is_reachable());

        let mut odd = NetworkState::online(AttachmentType::Wifi);
        odd.connected = false;
        assert!(!odd.is_reachable());

        let mut unknown = NetworkState::online(AttachmentType::Ethernet);
        unknown.internet_reachable = Reachability::Unknown;
        assert!(!unknown.is_reachable());
    }

    #[test]
    fn test_wire_format() {
        let state = NetworkState::online(AttachmentType::Cellular).with_hint(QualityHint {
            cellular_generation: Some(CellularGeneration::G2),
            signal_strength: None,
        });
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "attachment": "cellular",
                "connected": true,
                "internet_reachable": "reachable",
                "quality_hint": {"cellular_generation": "2g"}
            })
        );
    }
}
