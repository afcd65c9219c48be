//! Delay queue for scheduled retry re-entry.
//!
//! Each ordinary-failure retry or transport deferral registers
//! `(request_id, delay)`. While an entry is outstanding the request is not
//! eligible for dispatch. When the delay elapses the entry is removed and the
//! dispatch worker is notified.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Schedules delayed wake-ups of the dispatch worker, keyed by request.
#[derive(Debug, Clone)]
pub struct RetryScheduler {
    entries: Arc<DashMap<Uuid, (u64, JoinHandle<()>)>>,
    generation: Arc<AtomicU64>,
    wake: Arc<Notify>,
}

impl RetryScheduler {
    /// Create a scheduler that signals `wake` when an entry fires.
    pub fn new(wake: Arc<Notify>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            generation: Arc::new(AtomicU64::new(0)),
            wake,
        }
    }

    /// Register a re-entry for `id` after `delay`, replacing any existing one.
    pub fn schedule(&self, id: Uuid, delay: Duration) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let entries = Arc::clone(&self.entries);
        let wake = Arc::clone(&self.wake);

        // Holding the entry keeps the shard locked, so even a zero delay
        // cannot fire before the slot is filled.
        let slot = self.entries.entry(id);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // A newer schedule for the same id owns the slot now.
            if entries.remove_if(&id, |_, (g, _)| *g == generation).is_some() {
                tracing::debug!(request_id = %id, "Scheduled retry is due");
                wake.notify_one();
            }
        });

        match slot {
            Entry::Occupied(mut occupied) => {
                let (_, previous) = occupied.insert((generation, handle));
                previous.abort();
            }
            Entry::Vacant(vacant) => {
                vacant.insert((generation, handle));
            }
        }
    }

    /// Drop a pending re-entry. Returns true if one was outstanding.
    pub fn cancel(&self, id: &Uuid) -> bool {
        match self.entries.remove(id) {
            Some((_, (_, handle))) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Drop every pending re-entry.
    pub fn cancel_all(&self) {
        self.entries.retain(|_, (_, handle)| {
            handle.abort();
            false
        });
    }

    /// True while `id` is waiting out its backoff.
    pub fn is_waiting(&self, id: &Uuid) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
