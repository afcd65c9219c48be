//! Connectivity monitor.
//!
//! # Responsibilities
//! - Hold the authoritative current [`NetworkState`] and a bounded history
//! - Derive quality on demand
//! - Announce state changes and decide when failover should run

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde::Serialize;
use tokio::task::JoinHandle;

use crate::clock::now_ms;
use crate::config::MonitorConfig;
use crate::connectivity::probe::{ConnectivityProbe, ProbeResult};
use crate::connectivity::quality::{classify, QualityClass, QualityThresholds};
use crate::connectivity::source::ConnectivitySource;
use crate::connectivity::state::{AttachmentType, NetworkState, Reachability};
use crate::connectivity::{ConnectivityEvent, ConnectivityEventKind};
use crate::events::{EventBus, Subscription};
use crate::failover::{FailoverCoordinator, FailoverOutcome};
use crate::observability::metrics;

/// Number of history entries included in [`ConnectivitySnapshot`].
const SNAPSHOT_HISTORY: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    #[serde(flatten)]
    pub state: NetworkState,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

/// Everything a caller may want to know right now.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectivitySnapshot {
    pub state: NetworkState,
    pub quality: QualityClass,
    pub is_switching: bool,
    pub last_probe: Option<ProbeResult>,
    /// Most recent entries, oldest first.
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectivityStatistics {
    pub total_samples: usize,
    pub connected_percent: f64,
    pub reachable_percent: f64,
    pub attachment_distribution: BTreeMap<String, usize>,
    pub current_quality: QualityClass,
    pub is_switching: bool,
}

struct MonitorState {
    current: NetworkState,
    history: VecDeque<HistoryEntry>,
}

/// Why a transition warrants failover, if it does.
pub(crate) fn failover_reason(
    previous: &NetworkState,
    current: &NetworkState,
    quality: QualityClass,
    has_backups: bool,
) -> Option<&'static str> {
    if previous.connected && !current.connected {
        return Some("connection lost");
    }
    if previous.internet_reachable == Reachability::Reachable
        && current.internet_reachable == Reachability::Unreachable
    {
        return Some("internet lost");
    }
    if current.attachment == AttachmentType::Cellular
        && quality == QualityClass::Poor
        && has_backups
    {
        return Some("poor cellular link");
    }
    None
}

pub struct ConnectivityMonitor {
    source: Arc<dyn ConnectivitySource>,
    probe: Arc<ConnectivityProbe>,
    coordinator: Arc<FailoverCoordinator>,
    thresholds: QualityThresholds,
    history_size: usize,
    state: Mutex<MonitorState>,
    initialized: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectivityMonitor {
    pub fn new(
        source: Arc<dyn ConnectivitySource>,
        probe: Arc<ConnectivityProbe>,
        coordinator: Arc<FailoverCoordinator>,
        config: &MonitorConfig,
    ) -> Self {
        Self {
            source,
            probe,
            coordinator,
            thresholds: QualityThresholds::from(config),
            history_size: config.history_size.max(SNAPSHOT_HISTORY),
            state: Mutex::new(MonitorState {
                current: NetworkState::default(),
                history: VecDeque::new(),
            }),
            initialized: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    /// Take an initial snapshot and start following changes.
    ///
    /// Idempotent: later calls return the current state.
    pub async fn initialize(self: &Arc<Self>) -> NetworkState {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return self.state();
        }

        // Subscribe before the snapshot so no change slips between them.
        let mut rx = self.source.watch();
        let initial = self.source.snapshot().await;
        rx.borrow_and_update();
        self.record(initial.clone());
        metrics::set_reachable(initial.is_reachable());
        tracing::info!(
            attachment = initial.attachment.as_str(),
            connected = initial.connected,
            reachable = initial.is_reachable(),
            "Connectivity monitor initialized"
        );

        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let next = rx.borrow_and_update().clone();
                let Some(monitor) = weak.upgrade() else { break };
                monitor.handle_change(next);
            }
            tracing::debug!("Connectivity change stream ended");
        });
        *self.task.lock().expect("monitor task mutex poisoned") = Some(handle);

        initial
    }

    fn record(&self, state: NetworkState) -> NetworkState {
        let mut inner = self.state.lock().expect("monitor mutex poisoned");
        inner.history.push_back(HistoryEntry {
            state: state.clone(),
            timestamp: now_ms(),
        });
        while inner.history.len() > self.history_size {
            inner.history.pop_front();
        }
        std::mem::replace(&mut inner.current, state)
    }

    fn handle_change(&self, next: NetworkState) {
        if next == self.state() {
            return;
        }

        let previous = self.record(next.clone());
        metrics::set_reachable(next.is_reachable());
        tracing::info!(
            attachment = next.attachment.as_str(),
            connected = next.connected,
            reachable = next.is_reachable(),
            was_reachable = previous.is_reachable(),
            "Connectivity changed"
        );

        self.coordinator.events().emit(&ConnectivityEvent::StateChanged {
            current: next.clone(),
            previous: previous.clone(),
        });

        let quality = self.quality_of(&next);
        let Some(reason) = failover_reason(&previous, &next, quality, self.coordinator.has_candidates())
        else {
            return;
        };

        if !self.coordinator.policy().auto_failover {
            tracing::info!(reason, "Automatic failover disabled, not switching");
            return;
        }
        if self.coordinator.is_running() {
            tracing::info!(reason, "Failover already in progress, dropping trigger");
            return;
        }

        tracing::warn!(reason, "Triggering failover");
        let coordinator = Arc::clone(&self.coordinator);
        tokio::spawn(async move {
            let outcome = coordinator.run().await;
            tracing::debug!(outcome = outcome.label(), "Automatic failover finished");
        });
    }

    fn quality_of(&self, state: &NetworkState) -> QualityClass {
        classify(
            state,
            self.probe.last_result().as_ref(),
            self.coordinator.is_running(),
            &self.thresholds,
        )
    }

    /// Current state, quality and recent history. Never blocks on I/O.
    pub fn current(&self) -> ConnectivitySnapshot {
        let (state, history) = {
            let inner = self.state.lock().expect("monitor mutex poisoned");
            let skip = inner.history.len().saturating_sub(SNAPSHOT_HISTORY);
            (
                inner.current.clone(),
                inner.history.iter().skip(skip).cloned().collect(),
            )
        };
        ConnectivitySnapshot {
            quality: self.quality_of(&state),
            is_switching: self.coordinator.is_running(),
            last_probe: self.probe.last_result(),
            state,
            history,
        }
    }

    pub fn state(&self) -> NetworkState {
        self.state.lock().expect("monitor mutex poisoned").current.clone()
    }

    pub fn quality(&self) -> QualityClass {
        self.quality_of(&self.state())
    }

    pub fn is_reachable(&self) -> bool {
        self.state().is_reachable()
    }

    /// Full bounded history, oldest first.
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.state
            .lock()
            .expect("monitor mutex poisoned")
            .history
            .iter()
            .cloned()
            .collect()
    }

    pub fn subscribe<F>(&self, kind: ConnectivityEventKind, handler: F) -> Subscription
    where
        F: Fn(&ConnectivityEvent) + Send + Sync + 'static,
    {
        self.coordinator.events().subscribe(kind, handler)
    }

    pub fn events(&self) -> &EventBus<ConnectivityEvent> {
        self.coordinator.events()
    }

    /// Probe now, outside the source's own schedule.
    pub async fn force_probe(&self) -> ProbeResult {
        self.probe.probe().await
    }

    /// Manual failover request, guarded like automatic ones.
    pub async fn trigger_failover(&self) -> FailoverOutcome {
        tracing::info!("Manual failover requested");
        self.coordinator.run().await
    }

    pub fn is_switching(&self) -> bool {
        self.coordinator.is_running()
    }

    pub fn statistics(&self) -> ConnectivityStatistics {
        let history = self.history();
        let total = history.len();
        let percent = |count: usize| {
            if total == 0 {
                0.0
            } else {
                count as f64 * 100.0 / total as f64
            }
        };

        let connected = history.iter().filter(|h| h.state.connected).count();
        let reachable = history
            .iter()
            .filter(|h| h.state.internet_reachable == Reachability::Reachable)
            .count();
        let mut attachment_distribution = BTreeMap::new();
        for entry in &history {
            *attachment_distribution
                .entry(entry.state.attachment.as_str().to_string())
                .or_insert(0) += 1;
        }

        ConnectivityStatistics {
            total_samples: total,
            connected_percent: percent(connected),
            reachable_percent: percent(reachable),
            attachment_distribution,
            current_quality: self.quality(),
            is_switching: self.is_switching(),
        }
    }

    /// Stop following connectivity changes.
    pub fn shutdown(&self) {
        if let Some(handle) = self.task.lock().expect("monitor task mutex poisoned").take() {
            handle.abort();
            tracing::info!("Connectivity monitor stopped");
        }
    }
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        if let Ok(mut task) = self.task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
    }
}
