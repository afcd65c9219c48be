//! Startup orchestration.
//!
//! # Responsibilities
//! - Build every subsystem in dependency order and wire them together
//! - Restore durable state before any work starts
//! - Start background tasks (source polling, dispatch worker)
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Collaborators are injected so tests can substitute doubles

use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;

use crate::config::{ConfigError, LinkguardConfig};
use crate::connectivity::{
    ConnectivityMonitor, ConnectivityProbe, ConnectivitySource, ProbeDrivenSource,
};
use crate::dispatch::{DispatchError, ResilientDispatcher};
use crate::events::EventBus;
use crate::failover::{CommandAttacher, FailoverCoordinator, ManualAttacher, NetworkAttacher};
use crate::lifecycle::Shutdown;
use crate::networks::{BackupNetworkStore, NetworkStoreError};
use crate::storage::{
    CredentialStore, FileStore, KeyValueStore, KeyringCredentialStore, StoreError,
};
use crate::transport::{CallError, HttpTransport, Transport};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("failed to load backup networks: {0}")]
    Networks(#[from] NetworkStoreError),

    #[error("failed to load dispatch queue: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("failed to build HTTP transport: {0}")]
    Transport(#[from] CallError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// External collaborators the core is built on.
pub struct Collaborators {
    pub kv: Arc<dyn KeyValueStore>,
    pub credentials: Arc<dyn CredentialStore>,
    pub transport: Arc<dyn Transport>,
    pub attacher: Arc<dyn NetworkAttacher>,
    /// `None` builds a probe-driven source from config.
    pub source: Option<Arc<dyn ConnectivitySource>>,
}

impl Collaborators {
    /// Production collaborators: data directory, OS keyring, reqwest, and
    /// the configured attachment command.
    pub fn from_config(config: &LinkguardConfig) -> Result<Self, StartupError> {
        let attacher: Arc<dyn NetworkAttacher> = match CommandAttacher::from_config(&config.attachment) {
            Some(attacher) => Arc::new(attacher),
            None => {
                tracing::info!("No attachment command configured, failover will ask for manual action");
                Arc::new(ManualAttacher)
            }
        };

        Ok(Self {
            kv: Arc::new(FileStore::open(&config.storage.data_dir)?),
            credentials: Arc::new(KeyringCredentialStore::new(&config.storage.credential_service)),
            transport: Arc::new(HttpTransport::new()?),
            attacher,
            source: None,
        })
    }
}

/// Every long-lived subsystem, explicitly constructed.
pub struct Services {
    pub probe: Arc<ConnectivityProbe>,
    pub networks: Arc<BackupNetworkStore>,
    pub coordinator: Arc<FailoverCoordinator>,
    pub monitor: Arc<ConnectivityMonitor>,
    pub dispatcher: Arc<ResilientDispatcher>,
    pub shutdown: Shutdown,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Services {
    /// Build, restore and start everything.
    pub async fn start(config: &LinkguardConfig, collaborators: Collaborators) -> Result<Self, StartupError> {
        let shutdown = Shutdown::new();
        let mut tasks = Vec::new();

        let probe = Arc::new(ConnectivityProbe::new(
            Arc::clone(&collaborators.transport),
            config.probe.clone(),
        ));

        let networks = Arc::new(BackupNetworkStore::new(
            Arc::clone(&collaborators.kv),
            collaborators.credentials,
        ));
        networks.load()?;

        let coordinator = Arc::new(FailoverCoordinator::new(
            Arc::clone(&networks),
            collaborators.attacher,
            Arc::clone(&probe),
            EventBus::new("connectivity"),
            config.failover.clone(),
        ));

        let source: Arc<dyn ConnectivitySource> = match collaborators.source {
            Some(source) => source,
            None => {
                let source = Arc::new(ProbeDrivenSource::new(
                    Arc::clone(&probe),
                    config.source.primary_attachment.into(),
                    Duration::from_secs(config.source.poll_interval_secs),
                ));
                tasks.push(tokio::spawn(Arc::clone(&source).run(shutdown.subscribe())));
                source as Arc<dyn ConnectivitySource>
            }
        };

        let monitor = Arc::new(ConnectivityMonitor::new(
            source,
            Arc::clone(&probe),
            Arc::clone(&coordinator),
            &config.monitor,
        ));

        let dispatcher = Arc::new(ResilientDispatcher::new(
            collaborators.transport,
            Arc::clone(&monitor),
            collaborators.kv,
            config.dispatcher.clone(),
        ));
        dispatcher.load()?;

        monitor.initialize().await;
        dispatcher.start();

        tracing::info!(
            networks = networks.len(),
            queued = dispatcher.len(),
            reachable = monitor.is_reachable(),
            "Services started"
        );

        Ok(Self {
            probe,
            networks,
            coordinator,
            monitor,
            dispatcher,
            shutdown,
            tasks: Mutex::new(tasks),
        })
    }

    /// Apply the hot-reloadable parts of a new configuration.
    pub fn apply_config(&self, config: &LinkguardConfig) {
        self.coordinator.update_policy(config.failover.clone());
        self.dispatcher.update_policy(config.dispatcher.clone());
        tracing::info!("Configuration reloaded");
    }

    /// Stop background work in reverse dependency order.
    pub async fn shutdown(&self) {
        self.shutdown.trigger();
        self.dispatcher.shutdown();
        self.monitor.shutdown();

        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .expect("task list mutex poisoned")
            .drain(..)
            .collect();
        for task in tasks {
            let _ = task.await;
        }
        tracing::info!("Services stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FailoverConfig;
    use crate::connectivity::{AttachmentType, ManualSource, NetworkState};
    use crate::storage::{MemoryCredentialStore, MemoryStore};
    use crate::transport::{CallResponse, CallTarget};
    use async_trait::async_trait;

    struct Ok200;

    #[async_trait]
    impl Transport for Ok200 {
        async fn call(&self, _: &CallTarget, _: Duration) -> Result<CallResponse, CallError> {
            Ok(CallResponse::new(200, ""))
        }
    }

    fn collaborators(kv: Arc<MemoryStore>) -> Collaborators {
        Collaborators {
            kv,
            credentials: Arc::new(MemoryCredentialStore::new()),
            transport: Arc::new(Ok200),
            attacher: Arc::new(ManualAttacher),
            source: Some(Arc::new(ManualSource::new(NetworkState::online(AttachmentType::Wifi)))),
        }
    }

    #[tokio::test]
    async fn test_start_wires_everything() {
        let kv = Arc::new(MemoryStore::new());
        let services = Services::start(&LinkguardConfig::default(), collaborators(kv))
            .await
            .unwrap();

        assert!(services.monitor.is_reachable());
        assert!(services.networks.is_empty());
        assert!(services.dispatcher.is_empty());

        let mut config = LinkguardConfig::default();
        config.failover = FailoverConfig {
            max_attempts: 1,
            ..FailoverConfig::default()
        };
        config.dispatcher.capacity = 7;
        services.apply_config(&config);
        assert_eq!(services.coordinator.policy().max_attempts, 1);
        assert_eq!(services.dispatcher.policy().capacity, 7);

        services.shutdown().await;
        assert!(services.shutdown.is_triggered());
    }

    #[tokio::test]
    async fn test_corrupt_queue_is_fatal() {
        let kv = Arc::new(MemoryStore::new());
        kv.set(crate::dispatch::QUEUE_KEY, b"not json").unwrap();
        let result = Services::start(&LinkguardConfig::default(), collaborators(kv)).await;
        assert!(matches!(result, Err(StartupError::Dispatch(_))));
    }
}
