//! Allocation-tracking allocator
//!
//! Wraps a byte allocator and counts outstanding bytes so native memory
//! pressure can be reported to the engine's collector. The counter is atomic:
//! buffer fills may run on background I/O threads before control returns to
//! the engine thread, even though engine calls themselves never do.

use marten_vm_core::MemoryManager;
use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};
use tracing::trace;

/// Alignment for all byte allocations from this layer
const BYTE_ALIGN: usize = 8;

/// A plain byte allocator
pub trait ByteAllocator: Send + Sync {
    /// Allocate `size` zero-initialized bytes. Returns `None` on failure.
    fn alloc(&self, size: usize) -> Option<NonNull<u8>>;

    /// Grow or shrink an allocation.
    ///
    /// Bytes beyond `old_size` are not zeroed.
    ///
    /// # Safety
    /// `ptr` must have been returned by this allocator with size `old_size`.
    unsafe fn resize(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>>;

    /// Free an allocation.
    ///
    /// # Safety
    /// `ptr` must have been returned by this allocator with exactly `size`.
    unsafe fn free(&self, ptr: NonNull<u8>, size: usize);
}

/// The process heap, via `std::alloc`
pub struct SystemHeap;

impl ByteAllocator for SystemHeap {
    fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return Some(NonNull::dangling());
        }
        let layout = Layout::from_size_align(size, BYTE_ALIGN).ok()?;
        // SAFETY: layout has nonzero size
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        NonNull::new(ptr)
    }

    unsafe fn resize(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        if old_size == 0 {
            return self.alloc(new_size);
        }
        if new_size == 0 {
            // SAFETY: caller contract, ptr/old_size match a live allocation
            unsafe { self.free(ptr, old_size) };
            return Some(NonNull::dangling());
        }
        let layout = Layout::from_size_align(old_size, BYTE_ALIGN).ok()?;
        // SAFETY: ptr was allocated with this layout per caller contract
        let new_ptr = unsafe { std::alloc::realloc(ptr.as_ptr(), layout, new_size) };
        NonNull::new(new_ptr)
    }

    unsafe fn free(&self, ptr: NonNull<u8>, size: usize) {
        if size == 0 {
            return;
        }
        // The layout was valid at allocation time, so it is valid here
        let Ok(layout) = Layout::from_size_align(size, BYTE_ALIGN) else {
            return;
        };
        // SAFETY: ptr was allocated with this layout per caller contract
        unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) };
    }
}

/// Wraps a delegate allocator and tracks live bytes attributed to it.
///
/// The `Arc<TrackedAllocator>` identity doubles as the allocator identity for
/// ownership tags: bytes must be freed through the same allocator that
/// produced them, and violating that discipline is a fatal assertion, never a
/// recoverable error.
pub struct TrackedAllocator {
    delegate: Arc<dyn ByteAllocator>,
    /// Outstanding bytes attributed to this allocator
    live: AtomicUsize,
    /// Bytes already flushed to the engine's pressure heuristic
    reported: AtomicIsize,
}

impl TrackedAllocator {
    /// Wrap a delegate allocator
    pub fn new(delegate: Arc<dyn ByteAllocator>) -> Arc<Self> {
        Arc::new(Self {
            delegate,
            live: AtomicUsize::new(0),
            reported: AtomicIsize::new(0),
        })
    }

    /// A tracked allocator over the process heap
    pub fn system() -> Arc<Self> {
        Self::new(Arc::new(SystemHeap))
    }

    /// Allocate `size` zero-initialized bytes, counting them as live
    pub fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        let ptr = self.delegate.alloc(size)?;
        self.live.fetch_add(size, Ordering::Relaxed);
        Some(ptr)
    }

    /// Resize an allocation, adjusting the live total by the exact delta.
    ///
    /// # Safety
    /// `ptr`/`old_size` must match a live allocation from this allocator.
    pub unsafe fn resize(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        // SAFETY: forwarded caller contract
        let new_ptr = unsafe { self.delegate.resize(ptr, old_size, new_size) }?;
        if new_size >= old_size {
            self.live.fetch_add(new_size - old_size, Ordering::Relaxed);
        } else {
            self.sub_live(old_size - new_size);
        }
        Some(new_ptr)
    }

    /// Free an allocation, counting its bytes out.
    ///
    /// # Safety
    /// `ptr`/`size` must match a live allocation from this allocator.
    pub unsafe fn free(&self, ptr: NonNull<u8>, size: usize) {
        // SAFETY: forwarded caller contract
        unsafe { self.delegate.free(ptr, size) };
        self.sub_live(size);
    }

    /// Count out bytes whose ownership was transferred elsewhere (e.g. handed
    /// to the engine's own deallocator) without going through [`free`].
    ///
    /// [`free`]: TrackedAllocator::free
    pub fn discard(&self, size: usize) {
        self.sub_live(size);
    }

    /// Outstanding bytes attributed to this allocator
    pub fn live_bytes(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    /// Flush the change since the previous report to the engine's
    /// memory-pressure heuristic. Returns the flushed delta.
    pub fn report(&self, memory: &MemoryManager) -> isize {
        let live = self.live.load(Ordering::Relaxed) as isize;
        let previous = self.reported.swap(live, Ordering::Relaxed);
        let delta = live - previous;
        if delta != 0 {
            memory.adjust_external(delta);
            trace!(delta, live, "flushed tracked bytes to engine pressure");
        }
        delta
    }

    /// Assert that every tracked byte has been released. Call at teardown;
    /// a nonzero residual is a broken ownership invariant.
    pub fn assert_drained(&self) {
        let live = self.live.load(Ordering::Relaxed);
        assert!(live == 0, "tracked allocator leaked {live} bytes");
    }

    fn sub_live(&self, size: usize) {
        let prev = self.live.fetch_sub(size, Ordering::Relaxed);
        assert!(
            prev >= size,
            "tracked allocator underflow: released {size} bytes with {prev} live"
        );
    }
}

impl std::fmt::Debug for TrackedAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TrackedAllocator(live={})", self.live_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_free_balance() {
        let alloc = TrackedAllocator::system();
        let a = alloc.alloc(64).unwrap();
        let b = alloc.alloc(16).unwrap();
        assert_eq!(alloc.live_bytes(), 80);
        // SAFETY: a/b came from this allocator with these sizes
        unsafe {
            alloc.free(a, 64);
            alloc.free(b, 16);
        }
        assert_eq!(alloc.live_bytes(), 0);
        alloc.assert_drained();
    }

    #[test]
    fn test_resize_adjusts_by_delta() {
        let alloc = TrackedAllocator::system();
        let ptr = alloc.alloc(32).unwrap();
        // SAFETY: ptr is live with size 32
        let ptr = unsafe { alloc.resize(ptr, 32, 128) }.unwrap();
        assert_eq!(alloc.live_bytes(), 128);
        // SAFETY: ptr is live with size 128
        let ptr = unsafe { alloc.resize(ptr, 128, 8) }.unwrap();
        assert_eq!(alloc.live_bytes(), 8);
        // SAFETY: ptr is live with size 8
        unsafe { alloc.free(ptr, 8) };
        alloc.assert_drained();
    }

    #[test]
    fn test_discard_counts_out_without_freeing() {
        let alloc = TrackedAllocator::system();
        let ptr = alloc.alloc(24).unwrap();
        alloc.discard(24);
        assert_eq!(alloc.live_bytes(), 0);
        // Bytes are now owned elsewhere; free through the delegate directly.
        // SAFETY: ptr is a live 24-byte system-heap allocation
        unsafe { SystemHeap.free(ptr, 24) };
    }

    #[test]
    fn test_report_flushes_delta_once() {
        let alloc = TrackedAllocator::system();
        let mm = MemoryManager::test();
        let ptr = alloc.alloc(100).unwrap();
        assert_eq!(alloc.report(&mm), 100);
        assert_eq!(mm.external(), 100);
        // Second report with no change flushes nothing
        assert_eq!(alloc.report(&mm), 0);
        assert_eq!(mm.external(), 100);
        // SAFETY: ptr is live with size 100
        unsafe { alloc.free(ptr, 100) };
        assert_eq!(alloc.report(&mm), -100);
        assert_eq!(mm.external(), 0);
    }

    #[test]
    #[should_panic(expected = "leaked")]
    fn test_leak_is_fatal() {
        let alloc = TrackedAllocator::system();
        let _leaked = alloc.alloc(8).unwrap();
        alloc.assert_drained();
    }

    #[test]
    #[should_panic(expected = "underflow")]
    fn test_double_discard_is_fatal() {
        let alloc = TrackedAllocator::system();
        let ptr = alloc.alloc(8).unwrap();
        alloc.discard(8);
        alloc.discard(8);
        // not reached
        // SAFETY: unreachable
        unsafe { SystemHeap.free(ptr, 8) };
    }
}
