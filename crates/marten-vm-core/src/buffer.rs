//! Engine binary buffer objects
//!
//! A `JsBuffer` is the engine-side wrapper for a run of raw bytes. The bytes
//! either live on the engine heap (`Heap`) or are adopted from native code
//! (`External`) together with a deallocation callback the engine invokes
//! exactly once when the wrapper is collected.

use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, Ordering};

/// Deallocation callback supplied with externally-owned bytes.
///
/// Invoked exactly once with the byte pointer and the opaque context given at
/// construction. A `None` callback (with a null context) is the valid
/// "never free" marker for bytes known to outlive the wrapper.
pub type DeallocFn = unsafe fn(ptr: *mut u8, ctx: *mut c_void);

enum Store {
    /// Engine-heap bytes
    Heap(Box<[u8]>),
    /// Native bytes adopted by the engine; freed through the callback
    External {
        ptr: *mut u8,
        byte_len: usize,
        dealloc: Option<DeallocFn>,
        dealloc_ctx: *mut c_void,
    },
}

/// An engine buffer object
pub struct JsBuffer {
    store: Store,
    /// Backed by shared memory (visible to other processes)
    shared: bool,
    detached: AtomicBool,
}

// SAFETY: JsBuffer is only accessed from the single engine thread; thread
// confinement is an embedding discipline, matching the engine object model.
unsafe impl Send for JsBuffer {}
unsafe impl Sync for JsBuffer {}

impl JsBuffer {
    /// Create a zero-initialized engine-heap buffer.
    ///
    /// A zero `byte_len` yields a proper empty buffer, never a detached one.
    pub fn new_heap(byte_len: usize) -> Self {
        Self {
            store: Store::Heap(vec![0u8; byte_len].into_boxed_slice()),
            shared: false,
            detached: AtomicBool::new(false),
        }
    }

    /// Create an engine-heap buffer from existing bytes
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self {
            store: Store::Heap(bytes.into_boxed_slice()),
            shared: false,
            detached: AtomicBool::new(false),
        }
    }

    /// Adopt externally-owned bytes.
    ///
    /// # Safety
    /// `ptr` must be valid for reads of `byte_len` bytes for the lifetime of
    /// the buffer, and `dealloc`/`dealloc_ctx` must match how the bytes were
    /// obtained (or be `None`/null for bytes that outlive the wrapper).
    pub unsafe fn external(
        ptr: *mut u8,
        byte_len: usize,
        dealloc: Option<DeallocFn>,
        dealloc_ctx: *mut c_void,
        shared: bool,
    ) -> Self {
        Self {
            store: Store::External {
                ptr,
                byte_len,
                dealloc,
                dealloc_ctx,
            },
            shared,
            detached: AtomicBool::new(false),
        }
    }

    /// Get the byte length (0 if detached)
    pub fn byte_length(&self) -> usize {
        if self.is_detached() {
            return 0;
        }
        match &self.store {
            Store::Heap(data) => data.len(),
            Store::External { byte_len, .. } => *byte_len,
        }
    }

    /// Check if the buffer is detached
    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Relaxed)
    }

    /// Detach the buffer (for transfer operations). The bytes are still freed
    /// through the usual path when the wrapper drops.
    pub fn detach(&self) {
        self.detached.store(true, Ordering::Relaxed);
    }

    /// Backed by shared memory
    pub fn is_shared(&self) -> bool {
        self.shared
    }

    /// View the bytes (empty if detached)
    pub fn as_slice(&self) -> &[u8] {
        if self.is_detached() {
            return &[];
        }
        match &self.store {
            Store::Heap(data) => data,
            Store::External { ptr, byte_len, .. } => {
                if *byte_len == 0 {
                    &[]
                } else {
                    // SAFETY: ptr validity for byte_len bytes is the external()
                    // constructor contract.
                    unsafe { std::slice::from_raw_parts(*ptr, *byte_len) }
                }
            }
        }
    }

    /// Raw pointer to the first byte (null for empty heap buffers is avoided
    /// by pointing at the boxed slice)
    pub fn as_ptr(&self) -> *const u8 {
        match &self.store {
            Store::Heap(data) => data.as_ptr(),
            Store::External { ptr, .. } => *ptr,
        }
    }
}

impl Drop for JsBuffer {
    fn drop(&mut self) {
        if let Store::External {
            ptr,
            dealloc: Some(dealloc),
            dealloc_ctx,
            ..
        } = &self.store
        {
            // SAFETY: invoked exactly once, with the pointer and context the
            // external bytes were registered with.
            unsafe { dealloc(*ptr, *dealloc_ctx) };
        }
    }
}

impl std::fmt::Debug for JsBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "JsBuffer(byte_len={}, shared={}, detached={})",
            self.byte_length(),
            self.shared,
            self.is_detached()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_heap_buffer() {
        let buf = JsBuffer::new_heap(8);
        assert_eq!(buf.byte_length(), 8);
        assert!(buf.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_zero_length_not_detached() {
        let buf = JsBuffer::new_heap(0);
        assert!(!buf.is_detached());
        assert_eq!(buf.byte_length(), 0);
        assert_eq!(buf.as_slice(), &[] as &[u8]);
    }

    #[test]
    fn test_detach() {
        let buf = JsBuffer::from_vec(vec![1, 2, 3]);
        assert_eq!(buf.byte_length(), 3);
        buf.detach();
        assert!(buf.is_detached());
        assert_eq!(buf.byte_length(), 0);
        assert!(buf.as_slice().is_empty());
    }

    #[test]
    fn test_dealloc_called_exactly_once() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        unsafe fn count_dealloc(ptr: *mut u8, _ctx: *mut c_void) {
            CALLS.fetch_add(1, Ordering::SeqCst);
            // SAFETY: ptr was produced by Box::into_raw of a Box<[u8; 4]> below
            unsafe { drop(Box::from_raw(ptr as *mut [u8; 4])) };
        }

        let bytes: Box<[u8; 4]> = Box::new([9, 8, 7, 6]);
        let ptr = Box::into_raw(bytes) as *mut u8;
        {
            // SAFETY: ptr is valid for 4 bytes until the callback frees it
            let buf = unsafe {
                JsBuffer::external(ptr, 4, Some(count_dealloc), std::ptr::null_mut(), false)
            };
            assert_eq!(buf.as_slice(), &[9, 8, 7, 6]);
        }
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_never_free_marker() {
        static BYTES: [u8; 3] = [1, 2, 3];
        // SAFETY: static bytes outlive any wrapper; None/null is the valid
        // never-free marker.
        let buf = unsafe {
            JsBuffer::external(
                BYTES.as_ptr() as *mut u8,
                3,
                None,
                std::ptr::null_mut(),
                false,
            )
        };
        assert_eq!(buf.as_slice(), &[1, 2, 3]);
        drop(buf); // must not attempt to free static data
    }
}
