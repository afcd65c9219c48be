//! Single-flight guard.
//!
//! At most one holder at a time; a second caller is turned away rather than
//! queued. The flag is released when the guard drops, including on early
//! return or panic.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared in-progress flag.
#[derive(Debug, Clone, Default)]
pub struct SingleFlight {
    active: Arc<AtomicBool>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to become the single runner. Returns `None` if a run is active.
    pub fn try_acquire(&self) -> Option<FlightGuard> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard {
                active: Arc::clone(&self.active),
            })
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// Clears the in-progress flag on drop.
#[derive(Debug)]
pub struct FlightGuard {
    active: Arc<AtomicBool>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_rejected() {
        let flight = SingleFlight::new();
        let guard = flight.try_acquire().expect("first acquire");
        assert!(flight.is_active());
        assert!(flight.try_acquire().is_none());

        drop(guard);
        assert!(!flight.is_active());
        assert!(flight.try_acquire().is_some());
    }

    #[test]
    fn test_released_on_panic() {
        let flight = SingleFlight::new();
        let f = flight.clone();
        let result = std::panic::catch_unwind(move || {
            let _guard = f.try_acquire().unwrap();
            panic!("boom");
        });
        assert!(result.is_err());
        assert!(!flight.is_active());
    }
}
