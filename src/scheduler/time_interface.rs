// src/scheduler/time_interface.rs - Local monotonic time source
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Local monotonic clock in whole milliseconds since an arbitrary origin.
pub trait TimeInterface: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Monotonic time backed by `tokio::time::Instant`, so paused test runtimes
/// drive it deterministically.
#[derive(Debug, Clone, Copy)]
pub struct TokioTimeSync {
    origin: tokio::time::Instant,
}

impl TokioTimeSync {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioTimeSync {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeInterface for TokioTimeSync {
    fn now_ms(&self) -> i64 {
        self.origin.elapsed().as_millis() as i64
    }
}

/// Hand-driven clock for tests and offline replays.
#[derive(Debug, Clone, Default)]
pub struct ManualTime {
    now: Arc<AtomicI64>,
}

impl ManualTime {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start_ms)),
        }
    }

    pub fn set(&self, ms: i64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: i64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl TimeInterface for ManualTime {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
