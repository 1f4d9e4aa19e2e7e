//! Batch progress counters

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;
use tracing::info;

#[derive(Debug, Default)]
pub struct ProgressTracker {
    total: AtomicUsize,
    completed: AtomicUsize,
    identified: AtomicUsize,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub completed: usize,
    pub identified: usize,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_total(&self, total: usize) {
        self.total.store(total, Ordering::Relaxed);
    }

    /// One target finished; `identified` when any engine named the service.
    pub fn record(&self, identified: bool) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        if identified {
            self.identified.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total: self.total.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            identified: self.identified.load(Ordering::Relaxed),
        }
    }

    pub fn print_summary(&self) {
        let snap = self.snapshot();
        info!("Detection Summary:");
        info!("  Total targets: {}", snap.total);
        info!("  Completed: {}", snap.completed);
        info!("  Identified: {}", snap.identified);
        if snap.total > 0 {
            info!(
                "  Identification rate: {:.1}%",
                (snap.identified as f64 / snap.total as f64) * 100.0
            );
        }
    }
}
