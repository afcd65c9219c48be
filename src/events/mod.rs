//! Typed publish/subscribe.
//!
//! # Data Flow
//! ```text
//! emitter ──emit(&event)──▶ EventBus<E>
//!                              │ filter by event.kind()
//!                              ▼
//!                  handlers in registration order
//!                  (panics caught and logged)
//! ```
//!
//! # Design Decisions
//! - One bus per event family (connectivity, dispatch)
//! - Subscriptions are explicit tokens; dropping a token does NOT unsubscribe
//! - Handlers run synchronously on the emitting task and must not block

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// An event that can be routed by kind.
pub trait Event: Clone + Send + Sync + 'static {
    type Kind: Copy + Eq + fmt::Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;
}

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Listener<E: Event> {
    id: u64,
    kind: E::Kind,
    handler: Handler<E>,
}

struct BusInner<E: Event> {
    listeners: Mutex<Vec<Listener<E>>>,
    next_id: AtomicU64,
    name: &'static str,
}

/// Fan-out of events of one family to registered handlers.
pub struct EventBus<E: Event> {
    inner: Arc<BusInner<E>>,
}

impl<E: Event> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: Event> fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("name", &self.inner.name)
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl<E: Event> EventBus<E> {
    /// `name` shows up in logs when a handler panics.
    pub fn new(name: &'static str) -> Self {
        Self {
            inner: Arc::new(BusInner {
                listeners: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                name,
            }),
        }
    }

    /// Register `handler` for events of `kind`.
    pub fn subscribe<F>(&self, kind: E::Kind, handler: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .lock()
            .expect("event bus mutex poisoned")
            .push(Listener {
                id,
                kind,
                handler: Arc::new(handler),
            });

        let weak: Weak<BusInner<E>> = Arc::downgrade(&self.inner);
        Subscription {
            id,
            cancel: Some(Box::new(move |id| {
                if let Some(inner) = weak.upgrade() {
                    inner
                        .listeners
                        .lock()
                        .expect("event bus mutex poisoned")
                        .retain(|l| l.id != id);
                }
            })),
        }
    }

    /// Deliver `event` to every handler registered for its kind.
    pub fn emit(&self, event: &E) {
        let kind = event.kind();
        // Snapshot so handlers may subscribe/cancel without deadlocking.
        let handlers: Vec<Handler<E>> = self
            .inner
            .listeners
            .lock()
            .expect("event bus mutex poisoned")
            .iter()
            .filter(|l| l.kind == kind)
            .map(|l| Arc::clone(&l.handler))
            .collect();

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                tracing::error!(bus = self.inner.name, kind = ?kind, "Event handler panicked");
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner
            .listeners
            .lock()
            .expect("event bus mutex poisoned")
            .len()
    }
}

/// Cancel token returned by [`EventBus::subscribe`].
pub struct Subscription {
    id: u64,
    cancel: Option<Box<dyn FnOnce(u64) + Send + Sync>>,
}

impl Subscription {
    /// Remove the handler. Later emits no longer reach it.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel(self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
