//! Failover to backup networks.
//!
//! One run walks the catalogue in priority order. For each candidate:
//! resolve its secret, associate (bounded attempts with backoff), let the
//! link settle, then probe. The first candidate whose probe succeeds wins.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::config::FailoverConfig;
use crate::connectivity::{ConnectivityEvent, ConnectivityProbe};
use crate::events::EventBus;
use crate::failover::attach::{AttachError, NetworkAttacher};
use crate::networks::{BackupNetwork, BackupNetworkStore};
use crate::observability::metrics;
use crate::resilience::{BackoffPolicy, SingleFlight};

/// Why a failover run ended without a working network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SwitchFailure {
    NoCandidates,
    AllCandidatesFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailoverOutcome {
    Succeeded(BackupNetwork),
    Failed(SwitchFailure),
    /// Another run was active; nothing happened.
    AlreadyRunning,
}

impl FailoverOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            FailoverOutcome::Succeeded(_) => "succeeded",
            FailoverOutcome::Failed(SwitchFailure::NoCandidates) => "no_candidates",
            FailoverOutcome::Failed(SwitchFailure::AllCandidatesFailed) => "all_candidates_failed",
            FailoverOutcome::AlreadyRunning => "already_running",
        }
    }
}

pub struct FailoverCoordinator {
    networks: Arc<BackupNetworkStore>,
    attacher: Arc<dyn NetworkAttacher>,
    probe: Arc<ConnectivityProbe>,
    events: EventBus<ConnectivityEvent>,
    flight: SingleFlight,
    policy: ArcSwap<FailoverConfig>,
}

impl FailoverCoordinator {
    pub fn new(
        networks: Arc<BackupNetworkStore>,
        attacher: Arc<dyn NetworkAttacher>,
        probe: Arc<ConnectivityProbe>,
        events: EventBus<ConnectivityEvent>,
        policy: FailoverConfig,
    ) -> Self {
        Self {
            networks,
            attacher,
            probe,
            events,
            flight: SingleFlight::new(),
            policy: ArcSwap::from_pointee(policy),
        }
    }

    /// Attempt to switch to the best working backup network.
    pub async fn run(&self) -> FailoverOutcome {
        let Some(guard) = self.flight.try_acquire() else {
            tracing::info!("Failover already in progress, dropping trigger");
            return FailoverOutcome::AlreadyRunning;
        };

        let policy = self.policy.load_full();
        tracing::info!("Failover starting");
        self.events.emit(&ConnectivityEvent::SwitchStarted);

        let outcome = self.try_candidates(&policy).await;
        // Handlers of the terminal event must see the switch as finished.
        drop(guard);

        metrics::record_failover(outcome.label());
        match &outcome {
            FailoverOutcome::Succeeded(candidate) => {
                tracing::info!(network = %candidate.name, "Failover succeeded");
                self.events.emit(&ConnectivityEvent::SwitchSucceeded {
                    candidate: candidate.clone(),
                });
            }
            FailoverOutcome::Failed(reason) => {
                tracing::warn!(reason = ?reason, "Failover failed");
                self.events
                    .emit(&ConnectivityEvent::SwitchFailed { reason: *reason });
            }
            FailoverOutcome::AlreadyRunning => {}
        }
        outcome
    }

    async fn try_candidates(&self, policy: &FailoverConfig) -> FailoverOutcome {
        let candidates = self.networks.list();
        if candidates.is_empty() {
            return FailoverOutcome::Failed(SwitchFailure::NoCandidates);
        }

        for candidate in candidates {
            if self.try_candidate(&candidate, policy).await {
                return FailoverOutcome::Succeeded(candidate);
            }
        }
        FailoverOutcome::Failed(SwitchFailure::AllCandidatesFailed)
    }

    async fn try_candidate(&self, candidate: &BackupNetwork, policy: &FailoverConfig) -> bool {
        let credential = if candidate.secure {
            match self.networks.credential(candidate) {
                Ok(Some(secret)) => Some(secret),
                Ok(None) => {
                    tracing::warn!(network = %candidate.name, "No stored credential, skipping");
                    return false;
                }
                Err(e) => {
                    tracing::warn!(network = %candidate.name, error = %e, "Credential lookup failed, skipping");
                    return false;
                }
            }
        } else {
            None
        };

        if self.attacher.supports_association() {
            if !self.associate(candidate, credential.as_deref(), policy).await {
                return false;
            }
        } else {
            tracing::info!(network = %candidate.name, "Manual association required");
            self.events.emit(&ConnectivityEvent::ManualActionRequired {
                candidate: candidate.clone(),
            });
        }

        tokio::time::sleep(Duration::from_millis(policy.settle_ms)).await;

        let result = self.probe.probe().await;
        if !result.success {
            tracing::warn!(
                network = %candidate.name,
                error = ?result.error,
                "Candidate associated but probe failed"
            );
        }
        result.success
    }

    async fn associate(
        &self,
        candidate: &BackupNetwork,
        credential: Option<&str>,
        policy: &FailoverConfig,
    ) -> bool {
        let backoff = BackoffPolicy::new(policy.base_delay_ms, policy.max_delay_ms);
        let limit = Duration::from_millis(policy.association_timeout_ms);

        for attempt in 1..=policy.max_attempts {
            let outcome =
                tokio::time::timeout(limit, self.attacher.associate(&candidate.name, credential)).await;
            match outcome {
                Ok(Ok(true)) => {
                    tracing::info!(network = %candidate.name, attempt, "Associated");
                    return true;
                }
                Ok(Ok(false)) => {
                    tracing::warn!(network = %candidate.name, attempt, "Association rejected");
                }
                Ok(Err(AttachError::Unsupported)) => return false,
                Ok(Err(e)) => {
                    tracing::warn!(network = %candidate.name, attempt, error = %e, "Association error");
                }
                Err(_) => {
                    tracing::warn!(
                        network = %candidate.name,
                        attempt,
                        timeout_ms = policy.association_timeout_ms,
                        "Association timed out"
                    );
                }
            }

            if attempt < policy.max_attempts {
                tokio::time::sleep(backoff.jittered(attempt, policy.jitter_ratio)).await;
            }
        }
        false
    }

    pub fn is_running(&self) -> bool {
        self.flight.is_active()
    }

    /// The in-progress flag shared with the monitor.
    pub fn flight(&self) -> SingleFlight {
        self.flight.clone()
    }

    pub fn events(&self) -> &EventBus<ConnectivityEvent> {
        &self.events
    }

    pub fn has_candidates(&self) -> bool {
        !self.networks.is_empty()
    }

    pub fn policy(&self) -> Arc<FailoverConfig> {
        self.policy.load_full()
    }

    /// Swap in a new policy. Takes effect from the next run.
    pub fn update_policy(&self, policy: FailoverConfig) {
        self.policy.store(Arc::new(policy));
        tracing::info!("Failover policy updated");
    }
}

impl std::fmt::Debug for FailoverCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailoverCoordinator")
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProbeConfig;
    use crate::connectivity::ConnectivityEventKind;
    use crate::failover::attach::ManualAttacher;
    use crate::storage::{CredentialStore, MemoryCredentialStore, MemoryStore};
    use crate::transport::{CallError, CallResponse, CallTarget, Transport, TransportErrorKind};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    struct Switchable(AtomicBool);

    #[async_trait]
    impl Transport for Switchable {
        async fn call(&self, _: &CallTarget, _: Duration) -> Result<CallResponse, CallError> {
            if self.0.load(Ordering::SeqCst) {
                Ok(CallResponse::new(200, ""))
            } else {
                Err(CallError::transport(TransportErrorKind::Connect, "down"))
            }
        }
    }

    struct Fixture {
        coordinator: FailoverCoordinator,
        networks: Arc<BackupNetworkStore>,
        creds: Arc<MemoryCredentialStore>,
    }

    fn fixture(online: bool, attacher: Arc<dyn NetworkAttacher>) -> Fixture {
        let creds = Arc::new(MemoryCredentialStore::new());
        let networks = Arc::new(BackupNetworkStore::new(Arc::new(MemoryStore::new()), creds.clone()));
        let probe = Arc::new(ConnectivityProbe::new(
            Arc::new(Switchable(AtomicBool::new(online))),
            ProbeConfig::default(),
        ));
        let coordinator = FailoverCoordinator::new(
            networks.clone(),
            attacher,
            probe,
            EventBus::new("connectivity"),
            FailoverConfig::default(),
        );
        Fixture {
            coordinator,
            networks,
            creds,
        }
    }

    fn record_kinds(bus: &EventBus<ConnectivityEvent>) -> Arc<Mutex<Vec<ConnectivityEventKind>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        for kind in [
            ConnectivityEventKind::SwitchStarted,
            ConnectivityEventKind::SwitchSucceeded,
            ConnectivityEventKind::SwitchFailed,
            ConnectivityEventKind::ManualActionRequired,
        ] {
            let seen = seen.clone();
            bus.subscribe(kind, move |e: &ConnectivityEvent| {
                use crate::events::Event;
                seen.lock().unwrap().push(e.kind());
            });
        }
        seen
    }

    #[tokio::test]
    async fn test_no_candidates() {
        let coordinator = fixture(true, Arc::new(ManualAttacher)).coordinator;
        let seen = record_kinds(coordinator.events());

        assert_eq!(
            coordinator.run().await,
            FailoverOutcome::Failed(SwitchFailure::NoCandidates)
        );
        assert_eq!(
            *seen.lock().unwrap(),
            vec![ConnectivityEventKind::SwitchStarted, ConnectivityEventKind::SwitchFailed]
        );
        assert!(!coordinator.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_attacher_surfaces_candidate() {
        let Fixture { coordinator, networks, .. } = fixture(true, Arc::new(ManualAttacher));
        networks.add("Hotspot", None, 1).unwrap();
        let seen = record_kinds(coordinator.events());

        let outcome = coordinator.run().await;
        assert!(matches!(outcome, FailoverOutcome::Succeeded(ref n) if n.name == "Hotspot"));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ConnectivityEventKind::SwitchStarted,
                ConnectivityEventKind::ManualActionRequired,
                ConnectivityEventKind::SwitchSucceeded,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_secure_candidate_without_secret_is_skipped() {
        let f = fixture(true, Arc::new(ManualAttacher));
        let vault = f.networks.add("Vault", Some("pw"), 5).unwrap();
        f.networks.add("Open", None, 1).unwrap();
        // The keychain lost the secret behind the catalogue's back.
        f.creds.delete(vault.credential_ref.as_ref().unwrap()).unwrap();
        let seen = record_kinds(f.coordinator.events());

        let outcome = f.coordinator.run().await;
        assert!(matches!(outcome, FailoverOutcome::Succeeded(ref n) if n.name == "Open"));
        // Only the open network was surfaced.
        let manual = seen
            .lock()
            .unwrap()
            .iter()
            .filter(|k| **k == ConnectivityEventKind::ManualActionRequired)
            .count();
        assert_eq!(manual, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_candidates_fail() {
        let Fixture { coordinator, networks, .. } = fixture(false, Arc::new(ManualAttacher));
        networks.add("A", None, 2).unwrap();
        networks.add("B", None, 1).unwrap();

        assert_eq!(
            coordinator.run().await,
            FailoverOutcome::Failed(SwitchFailure::AllCandidatesFailed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_run_is_dropped() {
        let Fixture { coordinator, networks, .. } = fixture(true, Arc::new(ManualAttacher));
        networks.add("A", None, 1).unwrap();
        let coordinator = Arc::new(coordinator);

        let first = tokio::spawn({
            let c = coordinator.clone();
            async move { c.run().await }
        });
        tokio::task::yield_now().await;
        assert!(coordinator.is_running());
        assert_eq!(coordinator.run().await, FailoverOutcome::AlreadyRunning);

        assert!(matches!(first.await.unwrap(), FailoverOutcome::Succeeded(_)));
        assert!(!coordinator.is_running());
    }

    #[test]
    fn test_policy_hot_swap() {
        let coordinator = fixture(true, Arc::new(ManualAttacher)).coordinator;
        let mut policy = FailoverConfig::default();
        policy.max_attempts = 7;
        coordinator.update_policy(policy);
        assert_eq!(coordinator.policy().max_attempts, 7);
    }
}
