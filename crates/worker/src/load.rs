//! Worker load tracking
//!
//! Counts requests currently in progress and requests accepted over the process
//! lifetime. Both counters live behind one lock so a heartbeat always samples a
//! consistent pair.

use parking_lot::Mutex;

/// Point-in-time view of the worker's load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSnapshot {
    /// Requests accepted but not yet answered
    pub current_load: u32,

    /// Requests accepted since startup
    pub total_requests: u64,
}

/// In-process request counters shared by handlers and the heartbeat emitter
#[derive(Debug, Default)]
pub struct LoadTracker {
    counters: Mutex<LoadSnapshot>,
}

impl LoadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the start of a request; the load drops again when the guard is dropped
    pub fn begin(&self) -> LoadGuard<'_> {
        let mut counters = self.counters.lock();
        counters.current_load = counters.current_load.saturating_add(1);
        counters.total_requests = counters.total_requests.saturating_add(1);
        LoadGuard { tracker: self }
    }

    /// Sample both counters atomically
    pub fn snapshot(&self) -> LoadSnapshot {
        *self.counters.lock()
    }

    fn end(&self) {
        let mut counters = self.counters.lock();
        counters.current_load = counters.current_load.saturating_sub(1);
    }
}

/// Marks one request as in progress while alive
#[derive(Debug)]
pub struct LoadGuard<'a> {
    tracker: &'a LoadTracker,
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        self.tracker.end();
    }
}
