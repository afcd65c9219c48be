//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use linkguard::config::LinkguardConfig;
use linkguard::connectivity::{AttachmentType, ConnectivityMonitor, ConnectivityProbe, ManualSource, NetworkState};
use linkguard::dispatch::ResilientDispatcher;
use linkguard::events::EventBus;
use linkguard::failover::{AttachError, FailoverCoordinator, NetworkAttacher};
use linkguard::networks::BackupNetworkStore;
use linkguard::storage::{MemoryCredentialStore, MemoryStore};
use linkguard::transport::{CallError, CallResponse, CallTarget, Transport, TransportErrorKind};

/// A 200 response with a JSON body.
pub fn ok_json(body: &str) -> CallResponse {
    CallResponse::new(200, body).with_header("content-type", "application/json")
}

pub fn status(code: u16) -> CallResponse {
    CallResponse::new(code, "")
}

pub fn unreachable() -> CallError {
    CallError::transport(TransportErrorKind::Connect, "connection refused")
}

/// Transport that answers from a script, then from a fallback.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<CallResponse, CallError>>>,
    fallback: Mutex<Result<CallResponse, CallError>>,
    calls: Mutex<Vec<CallTarget>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::with_fallback(Ok(ok_json("{\"ok\":true}")))
    }

    pub fn with_fallback(fallback: Result<CallResponse, CallError>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, outcome: Result<CallResponse, CallError>) {
        self.script.lock().unwrap().push_back(outcome);
    }

    pub fn set_fallback(&self, outcome: Result<CallResponse, CallError>) {
        *self.fallback.lock().unwrap() = outcome;
    }

    pub fn calls(&self) -> Vec<CallTarget> {
        self.calls.lock().unwrap().clone()
    }

    pub fn urls(&self) -> Vec<String> {
        self.calls().into_iter().map(|t| t.url).collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn call(&self, target: &CallTarget, _timeout: Duration) -> Result<CallResponse, CallError> {
        self.calls.lock().unwrap().push(target.clone());
        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| self.fallback.lock().unwrap().clone())
    }
}

/// Attacher with per-network results. Unknown names associate.
pub struct ScriptedAttacher {
    results: Mutex<HashMap<String, Result<bool, AttachError>>>,
    calls: Mutex<Vec<(String, Option<String>)>>,
}

impl ScriptedAttacher {
    pub fn new() -> Self {
        Self {
            results: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set(&self, name: &str, result: Result<bool, AttachError>) {
        self.results.lock().unwrap().insert(name.to_string(), result);
    }

    pub fn calls(&self) -> Vec<(String, Option<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl NetworkAttacher for ScriptedAttacher {
    fn supports_association(&self) -> bool {
        true
    }

    async fn associate(&self, name: &str, credential: Option<&str>) -> Result<bool, AttachError> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), credential.map(str::to_string)));
        self.results
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or(Ok(true))
    }
}

/// The core services wired over test doubles. The dispatch worker is not
/// started; tests drive `dispatch_loop` themselves unless they call
/// `dispatcher.start()`.
pub struct Harness {
    pub config: LinkguardConfig,
    pub source: Arc<ManualSource>,
    /// Answers dispatched calls.
    pub transport: Arc<ScriptedTransport>,
    /// Answers reachability probes.
    pub probe_transport: Arc<ScriptedTransport>,
    pub attacher: Arc<ScriptedAttacher>,
    pub kv: Arc<MemoryStore>,
    pub credentials: Arc<MemoryCredentialStore>,
    pub networks: Arc<BackupNetworkStore>,
    pub coordinator: Arc<FailoverCoordinator>,
    pub monitor: Arc<ConnectivityMonitor>,
    pub dispatcher: Arc<ResilientDispatcher>,
}

impl Harness {
    pub async fn new(online: bool) -> Self {
        Self::build(online, test_config(), Arc::new(MemoryStore::new())).await
    }

    pub async fn build(online: bool, config: LinkguardConfig, kv: Arc<MemoryStore>) -> Self {
        let initial = if online {
            NetworkState::online(AttachmentType::Wifi)
        } else {
            NetworkState::disconnected()
        };
        let source = Arc::new(ManualSource::new(initial));
        let transport = Arc::new(ScriptedTransport::new());
        let probe_transport = Arc::new(ScriptedTransport::new());
        let attacher = Arc::new(ScriptedAttacher::new());
        let credentials = Arc::new(MemoryCredentialStore::new());

        let probe = Arc::new(ConnectivityProbe::new(
            probe_transport.clone(),
            config.probe.clone(),
        ));
        let networks = Arc::new(BackupNetworkStore::new(kv.clone(), credentials.clone()));
        networks.load().unwrap();

        let coordinator = Arc::new(FailoverCoordinator::new(
            networks.clone(),
            attacher.clone(),
            probe.clone(),
            EventBus::new("connectivity"),
            config.failover.clone(),
        ));
        let monitor = Arc::new(ConnectivityMonitor::new(
            source.clone(),
            probe,
            coordinator.clone(),
            &config.monitor,
        ));
        let dispatcher = Arc::new(ResilientDispatcher::new(
            transport.clone(),
            monitor.clone(),
            kv.clone(),
            config.dispatcher.clone(),
        ));
        dispatcher.load().unwrap();
        monitor.initialize().await;

        Self {
            config,
            source,
            transport,
            probe_transport,
            attacher,
            kv,
            credentials,
            networks,
            coordinator,
            monitor,
            dispatcher,
        }
    }

    /// Push a new state and wait for the monitor to take it in.
    pub async fn set_state(&self, state: NetworkState) {
        self.source.set(state.clone());
        wait_until(|| self.monitor.state() == state).await;
    }
}

/// Zero settle time, no inter-request delay and short rechecks so tests run
/// quickly.
pub fn test_config() -> LinkguardConfig {
    let mut config = LinkguardConfig::default();
    config.failover.settle_ms = 0;
    config.failover.base_delay_ms = 10;
    config.failover.max_delay_ms = 20;
    config.dispatcher.inter_request_delay_ms = 0;
    config.dispatcher.deferred_recheck_ms = 20;
    config
}

/// Poll `condition` until it holds, for at most a few seconds.
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// Start a programmable mock backend on an ephemeral port.
///
/// `f` gets the raw request text and returns `(status, content_type, body)`.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, &'static str, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let mut buf = vec![0u8; 8192];
                        let n = socket.read(&mut buf).await.unwrap_or(0);
                        let request = String::from_utf8_lossy(&buf[..n]).to_string();

                        let (status, content_type, body) = f(request).await;
                        let status_text = match status {
                            200 => "200 OK",
                            404 => "404 Not Found",
                            429 => "429 Too Many Requests",
                            500 => "500 Internal Server Error",
                            502 => "502 Bad Gateway",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };

                        let response_str = format!(
                            "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            content_type,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}
