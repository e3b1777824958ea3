//! Memory accounting for an engine instance
//!
//! Tracks bytes owned by the engine heap plus external (native) bytes reported
//! by embedders, and answers the collector's memory-pressure question.

use crate::error::{EngineError, EngineResult};
use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};

/// Minimum pressure threshold (1MB)
const MIN_PRESSURE_THRESHOLD: usize = 1024 * 1024;

/// Manages memory limits and accounting for an engine instance
pub struct MemoryManager {
    /// Total engine-heap bytes currently allocated
    allocated: AtomicUsize,
    /// Native bytes reported by embedders (tracked allocators)
    external: AtomicIsize,
    /// Maximum engine-heap bytes allowed
    limit: usize,
    /// Live set size after the last collection (bytes)
    last_live_size: AtomicUsize,
}

impl MemoryManager {
    /// Create a new memory manager with the specified limit
    pub fn new(limit: usize) -> Self {
        Self {
            allocated: AtomicUsize::new(0),
            external: AtomicIsize::new(0),
            limit,
            last_live_size: AtomicUsize::new(0),
        }
    }

    /// Create a memory manager with a very large limit (for tests)
    pub fn test() -> Self {
        Self::new(usize::MAX / 2)
    }

    /// Try to book `size` bytes. Returns `Err(EngineError::OutOfMemory)` if the
    /// limit would be exceeded.
    pub fn alloc(&self, size: usize) -> EngineResult<()> {
        let current = self.allocated.load(Ordering::Relaxed);
        if current.saturating_add(size) > self.limit {
            return Err(EngineError::OutOfMemory);
        }
        self.allocated.fetch_add(size, Ordering::Relaxed);
        Ok(())
    }

    /// Record deallocation of `size` bytes
    pub fn free(&self, size: usize) {
        self.allocated.fetch_sub(size, Ordering::Relaxed);
    }

    /// Get current engine-heap allocated bytes
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Get the memory limit
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Adjust the externally-owned byte total by `delta`.
    ///
    /// This is the memory-pressure hook tracked allocators flush into; it may
    /// be called from threads other than the engine thread.
    pub fn adjust_external(&self, delta: isize) {
        self.external.fetch_add(delta, Ordering::Relaxed);
    }

    /// Native bytes currently reported by embedders
    pub fn external(&self) -> isize {
        self.external.load(Ordering::Relaxed)
    }

    /// Update live set size (called after a collection)
    pub fn set_last_live_size(&self, size: usize) {
        self.last_live_size.store(size, Ordering::Relaxed);
    }

    /// Adaptive pressure threshold: 2x the live set, with a 1MB floor
    pub fn pressure_threshold(&self) -> usize {
        let live_size = self.last_live_size.load(Ordering::Relaxed);
        usize::max(MIN_PRESSURE_THRESHOLD, live_size.saturating_mul(2))
    }

    /// Check whether heap plus reported external bytes exceed the threshold
    pub fn under_pressure(&self) -> bool {
        let external = self.external.load(Ordering::Relaxed).max(0) as usize;
        self.allocated
            .load(Ordering::Relaxed)
            .saturating_add(external)
            > self.pressure_threshold()
    }
}
