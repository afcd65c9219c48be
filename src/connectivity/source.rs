//! Connectivity collaborators.
//!
//! A [`ConnectivitySource`] answers "what is the network doing right now"
//! and pushes every change through a `tokio::sync::watch` channel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};
use tokio::time;

use crate::connectivity::probe::{ConnectivityProbe, ProbeResult};
use crate::connectivity::state::{AttachmentType, NetworkState};

/// Platform connectivity feed.
#[async_trait]
pub trait ConnectivitySource: Send + Sync {
    /// Current state, fetched fresh.
    async fn snapshot(&self) -> NetworkState;

    /// Change stream. The receiver's initial value counts as already seen.
    fn watch(&self) -> watch::Receiver<NetworkState>;
}

/// Source whose state is pushed by the embedder.
#[derive(Debug)]
pub struct ManualSource {
    tx: watch::Sender<NetworkState>,
}

impl ManualSource {
    pub fn new(initial: NetworkState) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    /// Publish a new state to every watcher.
    pub fn set(&self, state: NetworkState) {
        self.tx.send_replace(state);
    }

    pub fn current(&self) -> NetworkState {
        self.tx.borrow().clone()
    }
}

#[async_trait]
impl ConnectivitySource for ManualSource {
    async fn snapshot(&self) -> NetworkState {
        self.current()
    }

    fn watch(&self) -> watch::Receiver<NetworkState> {
        self.tx.subscribe()
    }
}

/// Source that derives state from periodic reachability probes.
///
/// A successful probe means connected and reachable. A failure status means
/// attached but the internet is not reachable. No response at all means
/// disconnected.
pub struct ProbeDrivenSource {
    probe: Arc<ConnectivityProbe>,
    attachment: AttachmentType,
    interval: Duration,
    tx: watch::Sender<NetworkState>,
}

impl ProbeDrivenSource {
    pub fn new(probe: Arc<ConnectivityProbe>, attachment: AttachmentType, interval: Duration) -> Self {
        let (tx, _) = watch::channel(NetworkState::default());
        Self {
            probe,
            attachment,
            interval,
            tx,
        }
    }

    fn state_for(&self, result: &ProbeResult) -> NetworkState {
        if result.success {
            NetworkState::online(self.attachment)
        } else if result.got_response() {
            NetworkState::captive(self.attachment)
        } else {
            NetworkState::disconnected()
        }
    }

    /// Probe once and publish the derived state if it changed.
    pub async fn refresh(&self) -> NetworkState {
        let result = self.probe.probe().await;
        let state = self.state_for(&result);
        let published = state.clone();
        self.tx.send_if_modified(move |current| {
            if *current == published {
                false
            } else {
                *current = published;
                true
            }
        });
        state
    }

    /// Poll until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            attachment = self.attachment.as_str(),
            "Probe-driven connectivity source starting"
        );

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.refresh().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Connectivity source received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ConnectivitySource for ProbeDrivenSource {
    async fn snapshot(&self) -> NetworkState {
        self.refresh().await
    }

    fn watch(&self) -> watch::Receiver<NetworkState> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProbeConfig;
    use crate::connectivity::state::Reachability;
    use crate::transport::{CallError, CallResponse, CallTarget, Transport, TransportErrorKind};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct Script(Mutex<VecDeque<Result<CallResponse, CallError>>>);

    #[async_trait]
    impl Transport for Script {
        async fn call(&self, _: &CallTarget, _: Duration) -> Result<CallResponse, CallError> {
            self.0
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(CallResponse::new(200, "")))
        }
    }

    #[tokio::test]
    async fn test_manual_source_notifies_watchers() {
        let source = ManualSource::new(NetworkState::disconnected());
        let mut rx = source.watch();

        source.set(NetworkState::online(AttachmentType::Wifi));
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_reachable());
        assert!(source.snapshot().await.is_reachable());
    }

    #[tokio::test]
    async fn test_probe_outcomes_map_to_states() {
        let transport = Script(Mutex::new(VecDeque::from(vec![
            Ok(CallResponse::new(200, "")),
            Ok(CallResponse::new(502, "")),
            Err(CallError::transport(TransportErrorKind::Timeout, "slow")),
        ])));
        let probe = Arc::new(ConnectivityProbe::new(Arc::new(transport), ProbeConfig::default()));
        let source = ProbeDrivenSource::new(probe, AttachmentType::Ethernet, Duration::from_secs(5));

        let online = source.snapshot().await;
        assert!(online.is_reachable());
        assert_eq!(online.attachment, AttachmentType::Ethernet);

        let captive = source.snapshot().await;
        assert!(captive.connected);
        assert_eq!(captive.internet_reachable, Reachability::Unreachable);

        let gone = source.snapshot().await;
        assert!(!gone.connected);
    }

    #[tokio::test]
    async fn test_unchanged_state_does_not_notify() {
        let probe = Arc::new(ConnectivityProbe::new(
            Arc::new(Script(Mutex::new(VecDeque::new()))),
            ProbeConfig::default(),
        ));
        let source = ProbeDrivenSource::new(probe, AttachmentType::Wifi, Duration::from_secs(5));
        let mut rx = source.watch();

        source.refresh().await;
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        source.refresh().await;
        assert!(!rx.has_changed().unwrap());
    }
}
