//! Persistent priority queue of outbound calls and its single worker.
//!
//! Every state transition persists the full active set while the queue lock
//! is held; events go out after the lock is released, so anything a listener
//! observes is already durable.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::clock::now_ms;
use crate::config::DispatcherConfig;
use crate::connectivity::{ConnectivityEvent, ConnectivityEventKind, ConnectivityMonitor};
use crate::dispatch::types::{
    evict_over_capacity, sort_queue, DispatchError, DispatchEvent, DispatchEventKind,
    PendingRequest, PriorityTier, QueueStatistics, QueueStatus, RequestMetadata, RequestStatus,
};
use crate::events::{EventBus, Subscription};
use crate::observability::metrics;
use crate::resilience::timeouts::with_deadline;
use crate::resilience::{BackoffPolicy, RetryScheduler, SingleFlight};
use crate::storage::{KeyValueStore, StoreError};
use crate::transport::{CallError, CallTarget, ResponseBody, Transport, IDEMPOTENCY_KEY};

/// Storage key holding the JSON active set.
pub const QUEUE_KEY: &str = "dispatch_queue";

/// Terminal records kept in memory for status lookups.
const RECENT_LIMIT: usize = 50;

type Waiter = oneshot::Sender<Result<ResponseBody, DispatchError>>;

#[derive(Default)]
struct QueueState {
    requests: Vec<PendingRequest>,
    recent: VecDeque<PendingRequest>,
    /// Last persist failed; the next mutation or cycle writes again.
    dirty: bool,
}

impl QueueState {
    fn remember(&mut self, request: PendingRequest) {
        self.recent.push_back(request);
        while self.recent.len() > RECENT_LIMIT {
            self.recent.pop_front();
        }
    }
}

#[derive(Default)]
struct Counters {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    expired: AtomicU64,
    evicted: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> QueueStatistics {
        QueueStatistics {
            total: self.total.load(Ordering::Relaxed),
            successful: self.successful.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }
}

/// How one processed attempt ended, as far as the loop cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Completed,
    Requeued,
    /// Transport-class failure; stop. The request re-enters after the
    /// recheck delay or on the next connectivity kick.
    Deferred,
    Failed,
    /// The request was gone or not dispatchable.
    Skipped,
}

pub struct ResilientDispatcher {
    transport: Arc<dyn Transport>,
    monitor: Arc<ConnectivityMonitor>,
    kv: Arc<dyn KeyValueStore>,
    events: EventBus<DispatchEvent>,
    policy: ArcSwap<DispatcherConfig>,
    queue: Mutex<QueueState>,
    wake: Arc<Notify>,
    scheduler: RetryScheduler,
    flight: SingleFlight,
    counters: Counters,
    waiters: DashMap<Uuid, Waiter>,
    worker: Mutex<Option<JoinHandle<()>>>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl ResilientDispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        monitor: Arc<ConnectivityMonitor>,
        kv: Arc<dyn KeyValueStore>,
        policy: DispatcherConfig,
    ) -> Self {
        let wake = Arc::new(Notify::new());
        Self {
            transport,
            monitor,
            kv,
            events: EventBus::new("dispatch"),
            policy: ArcSwap::from_pointee(policy),
            queue: Mutex::new(QueueState::default()),
            scheduler: RetryScheduler::new(Arc::clone(&wake)),
            wake,
            flight: SingleFlight::new(),
            counters: Counters::default(),
            waiters: DashMap::new(),
            worker: Mutex::new(None),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Restore the active set from durable storage.
    ///
    /// In-progress requests left by a crash go back to pending with their
    /// attempt count unchanged. Expired requests are purged immediately.
    pub fn load(&self) -> Result<usize, DispatchError> {
        let mut restored: Vec<PendingRequest> = match self.kv.get(QUEUE_KEY)? {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
                key: QUEUE_KEY.to_string(),
                message: e.to_string(),
            })?,
            None => Vec::new(),
        };

        let mut recovered = 0;
        for request in restored.iter_mut() {
            if request.status == RequestStatus::InProgress {
                request.status = RequestStatus::Pending;
                recovered += 1;
            }
        }
        restored.retain(|r| !r.status.is_terminal());
        sort_queue(&mut restored);

        {
            let mut queue = self.queue.lock().expect("queue mutex poisoned");
            queue.requests = restored;
            if recovered > 0 {
                self.persist_locked(&mut queue);
            }
        }
        self.purge_expired();

        let count = self.queue.lock().expect("queue mutex poisoned").requests.len();
        tracing::info!(count, recovered, "Loaded dispatch queue");
        Ok(count)
    }

    /// Spawn the worker and follow connectivity.
    pub fn start(self: &Arc<Self>) {
        let mut worker = self.worker.lock().expect("worker mutex poisoned");
        if worker.is_some() {
            return;
        }

        let wake = Arc::clone(&self.wake);
        let became_reachable = self.monitor.subscribe(ConnectivityEventKind::StateChanged, move |e| {
            if let ConnectivityEvent::StateChanged { current, previous } = e {
                if current.is_reachable() && !previous.is_reachable() {
                    wake.notify_one();
                }
            }
        });
        let wake = Arc::clone(&self.wake);
        let switched = self
            .monitor
            .subscribe(ConnectivityEventKind::SwitchSucceeded, move |_| wake.notify_one());
        self.subscriptions
            .lock()
            .expect("subscription mutex poisoned")
            .extend([became_reachable, switched]);

        let weak: Weak<Self> = Arc::downgrade(self);
        let wake = Arc::clone(&self.wake);
        let mut sweep = tokio::time::interval(self.policy.load().expiry_sweep());
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        *worker = Some(tokio::spawn(async move {
            // The first tick completes immediately.
            sweep.tick().await;
            loop {
                tokio::select! {
                    _ = wake.notified() => {
                        let Some(dispatcher) = weak.upgrade() else { break };
                        dispatcher.dispatch_loop().await;
                    }
                    _ = sweep.tick() => {
                        let Some(dispatcher) = weak.upgrade() else { break };
                        dispatcher.purge_expired();
                    }
                }
            }
        }));
        tracing::info!("Dispatch worker started");

        if self.monitor.is_reachable() {
            self.wake.notify_one();
        }
    }

    /// Stop the worker, cancel scheduled retries and flush a dirty snapshot.
    pub fn shutdown(&self) {
        if let Some(handle) = self.worker.lock().expect("worker mutex poisoned").take() {
            handle.abort();
        }
        for subscription in self
            .subscriptions
            .lock()
            .expect("subscription mutex poisoned")
            .drain(..)
        {
            subscription.cancel();
        }
        self.scheduler.cancel_all();

        let mut queue = self.queue.lock().expect("queue mutex poisoned");
        if queue.dirty {
            self.persist_locked(&mut queue);
        }
        tracing::info!(pending = queue.requests.len(), "Dispatch worker stopped");
    }

    /// Wake the worker.
    pub fn kick(&self) {
        self.wake.notify_one();
    }

    /// Queue `target` for delivery. Never fails: storage trouble is retried
    /// later and capacity overflow evicts other requests.
    pub fn enqueue(&self, target: CallTarget, priority: PriorityTier, metadata: RequestMetadata) -> Uuid {
        let id = Uuid::new_v4();
        self.enqueue_with_id(id, with_idempotency_key(target, &id), priority, metadata);
        id
    }

    fn enqueue_with_id(
        &self,
        id: Uuid,
        target: CallTarget,
        priority: PriorityTier,
        metadata: RequestMetadata,
    ) {
        let policy = self.policy.load();
        let request = PendingRequest::new(id, target, priority, policy.max_attempts, metadata, now_ms());

        let evicted = {
            let mut queue = self.queue.lock().expect("queue mutex poisoned");
            queue.requests.push(request.clone());
            sort_queue(&mut queue.requests);
            let evicted = evict_over_capacity(&mut queue.requests, policy.capacity);
            self.persist_locked(&mut queue);
            evicted
        };

        self.counters.total.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            request_id = %id,
            priority = %priority,
            url = %request.target.url,
            "Request queued"
        );
        self.events.emit(&DispatchEvent::RequestQueued { request });

        for victim in evicted {
            self.scheduler.cancel(&victim.id);
            self.counters.evicted.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                request_id = %victim.id,
                priority = %victim.priority,
                capacity = policy.capacity,
                "Queue at capacity, evicted request"
            );
            self.resolve(&victim.id, Err(DispatchError::Removed(victim.id)));
            self.events.emit(&DispatchEvent::CapacityWarning { evicted: victim });
        }

        if self.monitor.is_reachable() {
            self.wake.notify_one();
        }
    }

    /// Try a direct call when the link is good, otherwise (or on failure)
    /// queue the call and wait for its terminal outcome.
    pub async fn make_resilient_call(
        &self,
        target: CallTarget,
        priority: PriorityTier,
        metadata: RequestMetadata,
    ) -> Result<ResponseBody, DispatchError> {
        let id = Uuid::new_v4();
        let target = with_idempotency_key(target, &id);

        if self.monitor.is_reachable() && self.monitor.quality().allows_direct_call() {
            let limit = self.policy.load().request_timeout();
            let started = Instant::now();
            let outcome = with_deadline(limit, self.transport.call(&target, limit))
                .await
                .and_then(|response| response.ensure_success())
                .and_then(|response| response.parse_body());
            metrics::record_request_duration(started.elapsed());

            match outcome {
                Ok(body) => {
                    metrics::record_request_outcome("direct");
                    tracing::debug!(request_id = %id, "Direct call succeeded");
                    return Ok(body);
                }
                Err(e) if e.is_unrecoverable() => return Err(DispatchError::Call(e)),
                Err(e) => {
                    tracing::info!(request_id = %id, error = %e, "Direct call failed, queueing");
                }
            }
        }

        // Register before queueing so no terminal outcome can be missed.
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(id, tx);
        self.enqueue_with_id(id, target, priority, metadata);
        rx.await.unwrap_or(Err(DispatchError::Removed(id)))
    }

    /// Drain eligible requests while connectivity holds. Single-flight.
    pub async fn dispatch_loop(&self) {
        let Some(_guard) = self.flight.try_acquire() else {
            tracing::debug!("Dispatch loop already running");
            return;
        };
        if !self.monitor.is_reachable() || self.is_empty() {
            return;
        }

        tracing::debug!("Dispatch loop starting");
        self.events.emit(&DispatchEvent::ProcessingStarted);

        loop {
            if !self.monitor.is_reachable() {
                tracing::info!("Connectivity lost, pausing dispatch");
                break;
            }
            self.flush_if_dirty();
            self.purge_expired();

            let Some(id) = self.next_eligible() else { break };
            if self.process_one(id).await == Attempt::Deferred {
                break;
            }

            tokio::time::sleep(self.policy.load().inter_request_delay()).await;
        }

        self.events.emit(&DispatchEvent::ProcessingStopped);
        tracing::debug!("Dispatch loop stopped");
    }

    fn next_eligible(&self) -> Option<Uuid> {
        let retention_ms = self.policy.load().retention().as_millis() as u64;
        let now = now_ms();
        let queue = self.queue.lock().expect("queue mutex poisoned");
        queue
            .requests
            .iter()
            .find(|r| {
                r.status == RequestStatus::Pending
                    && !r.attempts_exhausted()
                    && !r.is_expired(now, retention_ms)
                    && !self.scheduler.is_waiting(&r.id)
            })
            .map(|r| r.id)
    }

    /// One attempt at request `id`.
    async fn process_one(&self, id: Uuid) -> Attempt {
        let request = {
            let mut queue = self.queue.lock().expect("queue mutex poisoned");
            let Some(request) = queue
                .requests
                .iter_mut()
                .find(|r| r.id == id && r.status == RequestStatus::Pending)
            else {
                return Attempt::Skipped;
            };
            request.status = RequestStatus::InProgress;
            request.attempt_count += 1;
            request.last_attempt_at = Some(now_ms());
            let snapshot = request.clone();
            self.persist_locked(&mut queue);
            snapshot
        };

        tracing::info!(
            request_id = %id,
            attempt = request.attempt_count,
            max_attempts = request.max_attempts,
            "Dispatching request"
        );
        self.events.emit(&DispatchEvent::RequestStarted {
            request: request.clone(),
        });

        let limit = self.policy.load().request_timeout();
        let started = Instant::now();
        let outcome = with_deadline(limit, self.transport.call(&request.target, limit))
            .await
            .and_then(|response| response.ensure_success())
            .and_then(|response| response.parse_body());
        metrics::record_request_duration(started.elapsed());

        match outcome {
            Ok(body) => self.complete(id, body),
            Err(e) => self.handle_failure(id, e),
        }
    }

    fn complete(&self, id: Uuid, body: ResponseBody) -> Attempt {
        let Some(request) = self.finish(id, RequestStatus::Completed, None) else {
            return Attempt::Skipped;
        };
        self.counters.successful.fetch_add(1, Ordering::Relaxed);
        metrics::record_request_outcome("completed");
        tracing::info!(request_id = %id, attempts = request.attempt_count, "Request completed");

        self.resolve(&id, Ok(body.clone()));
        self.events.emit(&DispatchEvent::RequestCompleted {
            request,
            response: body,
        });
        Attempt::Completed
    }

    fn handle_failure(&self, id: Uuid, error: CallError) -> Attempt {
        let message = error.to_string();
        let exhausted = {
            let queue = self.queue.lock().expect("queue mutex poisoned");
            match queue.requests.iter().find(|r| r.id == id) {
                Some(r) => r.attempts_exhausted(),
                None => return Attempt::Skipped,
            }
        };

        if exhausted || error.is_unrecoverable() {
            let Some(request) = self.finish(id, RequestStatus::Failed, Some(message.clone())) else {
                return Attempt::Skipped;
            };
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            metrics::record_request_outcome("failed");
            tracing::warn!(
                request_id = %id,
                attempts = request.attempt_count,
                error = %message,
                "Request failed"
            );
            self.resolve(
                &id,
                Err(DispatchError::Failed {
                    id,
                    last_error: message.clone(),
                }),
            );
            self.events.emit(&DispatchEvent::RequestFailed {
                request,
                last_error: message,
            });
            return Attempt::Failed;
        }

        let Some(request) = self.requeue(id, &message) else {
            return Attempt::Skipped;
        };
        self.counters.retried.fetch_add(1, Ordering::Relaxed);

        let policy = self.policy.load();
        if error.is_transport() {
            // Nothing else wakes the worker while the monitor keeps
            // reporting reachable, so the recheck is scheduled here.
            let recheck = policy.deferred_recheck();
            self.scheduler.schedule(id, recheck);
            metrics::record_request_outcome("deferred");
            tracing::info!(
                request_id = %id,
                attempt = request.attempt_count,
                recheck_ms = recheck.as_millis() as u64,
                error = %message,
                "Transport failure, deferring to next connectivity cycle"
            );
            return Attempt::Deferred;
        }

        let delay = BackoffPolicy::new(policy.base_delay_ms, policy.max_delay_ms).delay(request.attempt_count);
        self.scheduler.schedule(id, delay);
        metrics::record_request_outcome("retrying");
        tracing::info!(
            request_id = %id,
            attempt = request.attempt_count,
            delay_ms = delay.as_millis() as u64,
            error = %message,
            "Request will be retried"
        );
        self.events.emit(&DispatchEvent::RequestRetrying {
            request,
            delay_ms: delay.as_millis() as u64,
        });
        Attempt::Requeued
    }

    /// Back to pending. `None` if the request was removed meanwhile.
    fn requeue(&self, id: Uuid, message: &str) -> Option<PendingRequest> {
        let mut queue = self.queue.lock().expect("queue mutex poisoned");
        let request = queue
            .requests
            .iter_mut()
            .find(|r| r.id == id && r.status == RequestStatus::InProgress)?;
        request.status = RequestStatus::Pending;
        request.last_error = Some(message.to_string());
        let snapshot = request.clone();
        self.persist_locked(&mut queue);
        Some(snapshot)
    }

    /// Move an in-progress request to a terminal status and out of the
    /// active set. `None` if it was cancelled meanwhile.
    fn finish(&self, id: Uuid, status: RequestStatus, error: Option<String>) -> Option<PendingRequest> {
        let mut queue = self.queue.lock().expect("queue mutex poisoned");
        let index = queue
            .requests
            .iter()
            .position(|r| r.id == id && r.status == RequestStatus::InProgress)?;
        let mut request = queue.requests.remove(index);
        request.status = status;
        if error.is_some() {
            request.last_error = error;
        }
        queue.remember(request.clone());
        self.persist_locked(&mut queue);
        Some(request)
    }

    /// Drop pending requests older than the retention horizon.
    fn purge_expired(&self) {
        let retention_ms = self.policy.load().retention().as_millis() as u64;
        let now = now_ms();

        let expired: Vec<PendingRequest> = {
            let mut queue = self.queue.lock().expect("queue mutex poisoned");
            let (expired, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut queue.requests)
                .into_iter()
                .partition(|r| r.status == RequestStatus::Pending && r.is_expired(now, retention_ms));
            queue.requests = kept;
            if expired.is_empty() {
                return;
            }
            let expired: Vec<PendingRequest> = expired
                .into_iter()
                .map(|mut r| {
                    r.status = RequestStatus::Expired;
                    r
                })
                .collect();
            for request in &expired {
                queue.remember(request.clone());
            }
            self.persist_locked(&mut queue);
            expired
        };

        for request in expired {
            self.scheduler.cancel(&request.id);
            self.counters.expired.fetch_add(1, Ordering::Relaxed);
            metrics::record_request_outcome("expired");
            tracing::warn!(request_id = %request.id, created_at = request.created_at, "Request expired");
            self.resolve(&request.id, Err(DispatchError::Expired(request.id)));
            self.events.emit(&DispatchEvent::RequestExpired { request });
        }
    }

    /// Remove a request. An in-flight call is not interrupted; its result is
    /// discarded.
    pub fn cancel(&self, id: &Uuid) -> Option<PendingRequest> {
        let request = {
            let mut queue = self.queue.lock().expect("queue mutex poisoned");
            let index = queue.requests.iter().position(|r| r.id == *id)?;
            let request = queue.requests.remove(index);
            self.persist_locked(&mut queue);
            request
        };

        self.scheduler.cancel(id);
        tracing::info!(request_id = %id, status = ?request.status, "Request cancelled");
        self.resolve(id, Err(DispatchError::Removed(*id)));
        self.events.emit(&DispatchEvent::RequestCancelled {
            request: request.clone(),
        });
        Some(request)
    }

    /// Remove every request. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let removed = {
            let mut queue = self.queue.lock().expect("queue mutex poisoned");
            let removed = std::mem::take(&mut queue.requests);
            self.persist_locked(&mut queue);
            removed
        };

        self.scheduler.cancel_all();
        for request in &removed {
            self.resolve(&request.id, Err(DispatchError::Removed(request.id)));
        }
        let count = removed.len();
        tracing::info!(count, "Queue cleared");
        self.events.emit(&DispatchEvent::QueueCleared { count });
        count
    }

    /// Active or recently finished request.
    pub fn request_status(&self, id: &Uuid) -> Option<PendingRequest> {
        let queue = self.queue.lock().expect("queue mutex poisoned");
        queue
            .requests
            .iter()
            .find(|r| r.id == *id)
            .or_else(|| queue.recent.iter().rev().find(|r| r.id == *id))
            .cloned()
    }

    pub fn queue_status(&self) -> QueueStatus {
        let queue = self.queue.lock().expect("queue mutex poisoned");
        let count = |status: RequestStatus| queue.requests.iter().filter(|r| r.status == status).count();
        QueueStatus {
            total: queue.requests.len(),
            pending: count(RequestStatus::Pending),
            in_progress: count(RequestStatus::InProgress),
            waiting_retry: queue
                .requests
                .iter()
                .filter(|r| self.scheduler.is_waiting(&r.id))
                .count(),
            is_processing: self.flight.is_active(),
            oldest_created_at: queue.requests.iter().map(|r| r.created_at).min(),
            statistics: self.counters.snapshot(),
        }
    }

    /// Active set in dispatch order.
    pub fn list(&self) -> Vec<PendingRequest> {
        self.queue.lock().expect("queue mutex poisoned").requests.clone()
    }

    pub fn statistics(&self) -> QueueStatistics {
        self.counters.snapshot()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().expect("queue mutex poisoned").requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe<F>(&self, kind: DispatchEventKind, handler: F) -> Subscription
    where
        F: Fn(&DispatchEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(kind, handler)
    }

    pub fn events(&self) -> &EventBus<DispatchEvent> {
        &self.events
    }

    pub fn policy(&self) -> Arc<DispatcherConfig> {
        self.policy.load_full()
    }

    /// Swap in a new policy. Requests already queued keep their
    /// `max_attempts`.
    pub fn update_policy(&self, policy: DispatcherConfig) {
        self.policy.store(Arc::new(policy));
        tracing::info!("Dispatcher policy updated");
    }

    fn resolve(&self, id: &Uuid, outcome: Result<ResponseBody, DispatchError>) {
        if let Some((_, waiter)) = self.waiters.remove(id) {
            let _ = waiter.send(outcome);
        }
    }

    fn flush_if_dirty(&self) {
        let mut queue = self.queue.lock().expect("queue mutex poisoned");
        if queue.dirty {
            self.persist_locked(&mut queue);
        }
    }

    fn persist_locked(&self, queue: &mut QueueState) {
        metrics::set_queue_depth(queue.requests.len());
        let written = serde_json::to_vec(&queue.requests)
            .map_err(|e| StoreError::Corrupt {
                key: QUEUE_KEY.to_string(),
                message: e.to_string(),
            })
            .and_then(|bytes| self.kv.set(QUEUE_KEY, &bytes));

        match written {
            Ok(()) => {
                if queue.dirty {
                    tracing::info!("Dispatch queue persisted after earlier failure");
                }
                queue.dirty = false;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to persist dispatch queue, will retry");
                queue.dirty = true;
            }
        }
    }
}

impl std::fmt::Debug for ResilientDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientDispatcher")
            .field("queued", &self.len())
            .field("processing", &self.flight.is_active())
            .finish()
    }
}

impl Drop for ResilientDispatcher {
    fn drop(&mut self) {
        if let Ok(mut worker) = self.worker.lock() {
            if let Some(handle) = worker.take() {
                handle.abort();
            }
        }
        self.scheduler.cancel_all();
    }
}

fn with_idempotency_key(target: CallTarget, id: &Uuid) -> CallTarget {
    if target.has_header(IDEMPOTENCY_KEY) {
        target
    } else {
        target.with_header(IDEMPOTENCY_KEY, id.to_string())
    }
}
