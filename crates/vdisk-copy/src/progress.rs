//! Shared progress and cancellation handle for a running copy.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Created by the caller and shared with whatever reports progress or wants
/// to cancel. The pipeline publishes the completion position after every
/// chunk and checks the cancel flag once per chunk boundary.
#[derive(Debug, Default)]
pub struct CopyProgress {
    position: AtomicU64,
    total: AtomicU64,
    cancelled: AtomicBool,
}

impl CopyProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes fully processed so far.
    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Acquire)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub(crate) fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Release);
    }

    pub(crate) fn set_position(&self, position: u64) {
        self.position.store(position, Ordering::Release);
    }
}
