//! Process-wide version counter
//!
//! A single monotonically non-decreasing integer advanced to the maximum of
//! its current value and any version a caller supplies with a write. It is a
//! coarse "data is at least this fresh" signal only: it gives no per-document
//! ordering, is not persisted, and is not shared between processes.

use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide, monotonically non-decreasing version
#[derive(Debug, Default)]
pub struct VersionCounter {
    current: AtomicU64,
}

impl VersionCounter {
    /// Counter starting at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a known version
    pub fn starting_at(version: u64) -> Self {
        Self {
            current: AtomicU64::new(version),
        }
    }

    /// Advance to at least `version`; returns the resulting value
    pub fn advance(&self, version: u64) -> u64 {
        let previous = self.current.fetch_max(version, Ordering::AcqRel);
        previous.max(version)
    }

    /// Current value
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }
}
