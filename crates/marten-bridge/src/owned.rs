//! Owned buffers
//!
//! An `OwnedBuffer` pairs a buffer descriptor with the allocator that is the
//! sole freeing authority for its bytes. `destroy` is idempotent: the first
//! call frees through the stored allocator and clears it, every later call
//! (including the one from `Drop`) is a no-op.

use crate::alloc::TrackedAllocator;
use crate::buffer::{BufferValue, ElementKind, Ownership};
use marten_vm_core::{EngineContext, EngineError, EngineResult, JsBuffer, Value};
use std::ptr::NonNull;
use std::sync::Arc;

/// A native-owned byte range with an explicit destruction point
pub struct OwnedBuffer {
    buffer: BufferValue,
    /// `Some` ⇒ this wrapper still owes the free; cleared by `destroy`
    allocator: Option<Arc<TrackedAllocator>>,
}

impl OwnedBuffer {
    /// Wrap an in-memory range without taking ownership. `destroy` on the
    /// result is a no-op.
    ///
    /// # Safety
    /// `ptr` must stay valid and unaliased for writes for the wrapper's
    /// lifetime (and the lifetime of any engine value produced from it).
    pub unsafe fn from_borrowed(
        ptr: *mut u8,
        kind: ElementKind,
        byte_len: usize,
    ) -> EngineResult<Self> {
        Ok(Self {
            buffer: BufferValue::native_owned(ptr, kind, byte_len)?,
            allocator: None,
        })
    }

    /// Allocate `contents.len()` bytes and fill them
    pub fn with_contents(
        alloc: &Arc<TrackedAllocator>,
        kind: ElementKind,
        contents: &[u8],
    ) -> EngineResult<Self> {
        if contents.is_empty() {
            return Ok(Self {
                buffer: BufferValue::empty(kind),
                allocator: None,
            });
        }
        let ptr = alloc
            .alloc(contents.len())
            .ok_or(EngineError::OutOfMemory)?;
        // SAFETY: fresh allocation of contents.len() bytes
        unsafe {
            std::ptr::copy_nonoverlapping(contents.as_ptr(), ptr.as_ptr(), contents.len());
        }
        let buffer = match BufferValue::native_owned(ptr.as_ptr(), kind, contents.len()) {
            Ok(buffer) => buffer,
            Err(err) => {
                // SAFETY: freeing the allocation made just above
                unsafe { alloc.free(ptr, contents.len()) };
                return Err(err);
            }
        };
        Ok(Self {
            buffer,
            allocator: Some(Arc::clone(alloc)),
        })
    }

    /// Copy the current bytes of an engine buffer into a fresh native-owned
    /// allocation. A value copy: later detachment or mutation of the engine
    /// buffer does not affect the result.
    pub fn copy_engine_bytes(
        alloc: &Arc<TrackedAllocator>,
        buf: &Arc<JsBuffer>,
        kind: ElementKind,
    ) -> EngineResult<Self> {
        Self::with_contents(alloc, kind, buf.as_slice())
    }

    /// The wrapped descriptor
    pub fn buffer(&self) -> &BufferValue {
        &self.buffer
    }

    /// The byte view
    pub fn as_slice(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    /// Mutable byte view
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.buffer.as_mut_slice()
    }

    /// Byte length
    pub fn byte_len(&self) -> usize {
        self.buffer.byte_len()
    }

    /// True once `destroy` has run (or the wrapper never owned bytes)
    pub fn is_destroyed(&self) -> bool {
        self.allocator.is_none()
    }

    /// Hand the bytes to the engine as a never-free wrapper. The engine value
    /// must not outlive this wrapper's destruction.
    pub fn to_value(&mut self, ctx: &EngineContext) -> EngineResult<Value> {
        self.buffer.into_value(ctx)
    }

    /// Free the bytes through the stored allocator. Idempotent: only the
    /// first call frees.
    pub fn destroy(&mut self) {
        let Some(alloc) = self.allocator.take() else {
            return;
        };
        debug_assert!(matches!(self.buffer.ownership(), Ownership::Native));
        let byte_len = self.buffer.byte_len();
        let ptr = self.buffer.as_mut_slice().as_mut_ptr();
        if let Some(ptr) = NonNull::new(ptr) {
            // SAFETY: ptr/byte_len are the allocation made by with_contents
            // through this same allocator, freed here exactly once.
            unsafe { alloc.free(ptr, byte_len) };
        }
        // Drop the stale view so nothing reads freed memory
        self.buffer = BufferValue::empty(self.buffer.kind());
    }
}

impl Drop for OwnedBuffer {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for OwnedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "OwnedBuffer({:?}, destroyed={})",
            self.buffer,
            self.is_destroyed()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destroy_is_idempotent() {
        let alloc = TrackedAllocator::system();
        let mut owned = OwnedBuffer::with_contents(&alloc, ElementKind::Uint8, b"data").unwrap();
        assert_eq!(owned.as_slice(), b"data");
        assert_eq!(alloc.live_bytes(), 4);

        owned.destroy();
        assert!(owned.is_destroyed());
        alloc.assert_drained();

        // Second call and the drop at end of scope are no-ops
        owned.destroy();
        alloc.assert_drained();
    }

    #[test]
    fn test_drop_destroys() {
        let alloc = TrackedAllocator::system();
        {
            let _owned =
                OwnedBuffer::with_contents(&alloc, ElementKind::Uint8, b"xyz").unwrap();
            assert_eq!(alloc.live_bytes(), 3);
        }
        alloc.assert_drained();
    }

    #[test]
    fn test_copy_engine_bytes_is_a_value_copy() {
        let alloc = TrackedAllocator::system();
        let engine_buf = Arc::new(JsBuffer::from_vec(vec![9, 8, 7]));
        let owned =
            OwnedBuffer::copy_engine_bytes(&alloc, &engine_buf, ElementKind::Uint8).unwrap();
        engine_buf.detach();
        assert_eq!(owned.as_slice(), &[9, 8, 7]);
        drop(owned);
        alloc.assert_drained();
    }

    #[test]
    fn test_borrowed_wrapper_never_frees() {
        let mut backing = [1u8, 2, 3];
        let owned = unsafe {
            OwnedBuffer::from_borrowed(backing.as_mut_ptr(), ElementKind::Uint8, 3).unwrap()
        };
        assert!(owned.is_destroyed());
        assert_eq!(owned.as_slice(), &[1, 2, 3]);
    }
}
