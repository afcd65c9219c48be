//! Queue records, events and errors.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::events::Event;
use crate::storage::StoreError;
use crate::transport::{CallError, CallTarget, ResponseBody};

/// Dispatch priority. Higher tiers always go first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PriorityTier {
    Low = 1,
    #[default]
    Normal = 2,
    High = 3,
    Critical = 4,
}

impl fmt::Display for PriorityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PriorityTier::Low => "low",
            PriorityTier::Normal => "normal",
            PriorityTier::High => "high",
            PriorityTier::Critical => "critical",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Expired,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Completed | RequestStatus::Failed | RequestStatus::Expired
        )
    }
}

/// Caller-supplied annotations, carried through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RequestMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl RequestMetadata {
    pub fn described(description: impl Into<String>) -> Self {
        Self {
            description: Some(description.into()),
            tags: Vec::new(),
        }
    }
}

/// One queued outbound call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequest {
    pub id: Uuid,
    pub target: CallTarget,
    pub priority: PriorityTier,
    pub status: RequestStatus,
    pub attempt_count: u32,
    pub max_attempts: u32,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
    #[serde(default)]
    pub last_attempt_at: Option<u64>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub metadata: RequestMetadata,
}

impl PendingRequest {
    pub fn new(
        id: Uuid,
        target: CallTarget,
        priority: PriorityTier,
        max_attempts: u32,
        metadata: RequestMetadata,
        created_at: u64,
    ) -> Self {
        Self {
            id,
            target,
            priority,
            status: RequestStatus::Pending,
            attempt_count: 0,
            max_attempts,
            created_at,
            last_attempt_at: None,
            last_error: None,
            metadata,
        }
    }

    /// Older than `retention_ms` at `now_ms`.
    pub fn is_expired(&self, now_ms: u64, retention_ms: u64) -> bool {
        now_ms.saturating_sub(self.created_at) > retention_ms
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempt_count >= self.max_attempts
    }
}

/// Dispatch order: tier descending, then oldest first.
pub fn sort_queue(requests: &mut [PendingRequest]) {
    requests.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(a.created_at.cmp(&b.created_at))
    });
}

/// Drop requests until at most `capacity` remain.
///
/// Victims are the lowest tier first and the oldest within a tier. An
/// in-progress request is never evicted.
pub fn evict_over_capacity(requests: &mut Vec<PendingRequest>, capacity: usize) -> Vec<PendingRequest> {
    let mut evicted = Vec::new();
    while requests.len() > capacity {
        let victim = requests
            .iter()
            .enumerate()
            .filter(|(_, r)| r.status != RequestStatus::InProgress)
            .min_by(|(_, a), (_, b)| a.priority.cmp(&b.priority).then(a.created_at.cmp(&b.created_at)))
            .map(|(index, _)| index);
        match victim {
            Some(index) => evicted.push(requests.remove(index)),
            None => break,
        }
    }
    evicted
}

/// Something observable happened to the queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum DispatchEvent {
    RequestQueued { request: PendingRequest },
    RequestStarted { request: PendingRequest },
    RequestRetrying { request: PendingRequest, delay_ms: u64 },
    RequestCompleted { request: PendingRequest, response: ResponseBody },
    RequestFailed { request: PendingRequest, last_error: String },
    RequestExpired { request: PendingRequest },
    RequestCancelled { request: PendingRequest },
    QueueCleared { count: usize },
    CapacityWarning { evicted: PendingRequest },
    ProcessingStarted,
    ProcessingStopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchEventKind {
    RequestQueued,
    RequestStarted,
    RequestRetrying,
    RequestCompleted,
    RequestFailed,
    RequestExpired,
    RequestCancelled,
    QueueCleared,
    CapacityWarning,
    ProcessingStarted,
    ProcessingStopped,
}

impl Event for DispatchEvent {
    type Kind = DispatchEventKind;

    fn kind(&self) -> DispatchEventKind {
        match self {
            DispatchEvent::RequestQueued { .. } => DispatchEventKind::RequestQueued,
            DispatchEvent::RequestStarted { .. } => DispatchEventKind::RequestStarted,
            DispatchEvent::RequestRetrying { .. } => DispatchEventKind::RequestRetrying,
            DispatchEvent::RequestCompleted { .. } => DispatchEventKind::RequestCompleted,
            DispatchEvent::RequestFailed { .. } => DispatchEventKind::RequestFailed,
            DispatchEvent::RequestExpired { .. } => DispatchEventKind::RequestExpired,
            DispatchEvent::RequestCancelled { .. } => DispatchEventKind::RequestCancelled,
            DispatchEvent::QueueCleared { .. } => DispatchEventKind::QueueCleared,
            DispatchEvent::CapacityWarning { .. } => DispatchEventKind::CapacityWarning,
            DispatchEvent::ProcessingStarted => DispatchEventKind::ProcessingStarted,
            DispatchEvent::ProcessingStopped => DispatchEventKind::ProcessingStopped,
        }
    }
}

/// Lifetime counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub struct QueueStatistics {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub retried: u64,
    pub expired: u64,
    pub evicted: u64,
}

/// Summary of the active set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    /// Pending requests waiting out a backoff delay.
    pub waiting_retry: usize,
    pub is_processing: bool,
    pub oldest_created_at: Option<u64>,
    pub statistics: QueueStatistics,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("request {id} failed: {last_error}")]
    Failed { id: Uuid, last_error: String },

    #[error("request {0} expired before it could be delivered")]
    Expired(Uuid),

    /// Cancelled, cleared, evicted, or the dispatcher shut down.
    #[error("request {0} was removed before completing")]
    Removed(Uuid),

    #[error(transparent)]
    Call(#[from] CallError),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(tier: PriorityTier, created_at: u64) -> PendingRequest {
        PendingRequest::new(
            Uuid::new_v4(),
            CallTarget::get("http://example.invalid"),
            tier,
            5,
            RequestMetadata::default(),
            created_at,
        )
    }

    #[test]
    fn test_queue_order() {
        let mut queue = vec![
            req(PriorityTier::Low, 1),
            req(PriorityTier::Critical, 3),
            req(PriorityTier::Normal, 2),
            req(PriorityTier::Critical, 2),
        ];
        sort_queue(&mut queue);
        let order: Vec<_> = queue.iter().map(|r| (r.priority, r.created_at)).collect();
        assert_eq!(
            order,
            vec![
                (PriorityTier::Critical, 2),
                (PriorityTier::Critical, 3),
                (PriorityTier::Normal, 2),
                (PriorityTier::Low, 1),
            ]
        );
    }

    #[test]
    fn test_eviction_prefers_low_and_old() {
        let mut queue = vec![
            req(PriorityTier::High, 1),
            req(PriorityTier::Low, 5),
            req(PriorityTier::Low, 3),
            req(PriorityTier::Normal, 2),
        ];
        let evicted = evict_over_capacity(&mut queue, 2);
        let gone: Vec<_> = evicted.iter().map(|r| (r.priority, r.created_at)).collect();
        assert_eq!(gone, vec![(PriorityTier::Low, 3), (PriorityTier::Low, 5)]);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_eviction_spares_in_progress() {
        let mut busy = req(PriorityTier::Low, 1);
        busy.status = RequestStatus::InProgress;
        let mut queue = vec![busy.clone(), req(PriorityTier::Critical, 2)];

        let evicted = evict_over_capacity(&mut queue, 1);
        assert_eq!(evicted[0].priority, PriorityTier::Critical);
        assert_eq!(queue, vec![busy.clone()]);

        // Nothing evictable left
        let mut all_busy = vec![busy.clone(), busy];
        assert!(evict_over_capacity(&mut all_busy, 1).is_empty());
        assert_eq!(all_busy.len(), 2);
    }

    #[test]
    fn test_expiry_and_exhaustion() {
        let mut r = req(PriorityTier::Normal, 1_000);
        assert!(!r.is_expired(1_000 + 500, 500));
        assert!(r.is_expired(1_000 + 501, 500));
        assert!(!r.attempts_exhausted());
        r.attempt_count = 5;
        assert!(r.attempts_exhausted());
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(serde_json::to_string(&PriorityTier::Critical).unwrap(), "\"critical\"");
        assert_eq!(serde_json::to_string(&RequestStatus::InProgress).unwrap(), "\"in_progress\"");
        assert!(PriorityTier::Critical > PriorityTier::High);
        assert_eq!(PriorityTier::Low as u8, 1);
    }
}
