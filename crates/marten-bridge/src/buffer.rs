//! Buffer values
//!
//! A `BufferValue` is this layer's descriptor for a byte range crossing the
//! embedding boundary. Every descriptor carries exactly one ownership tag and
//! the deallocation behavior — both on drop and when the bytes are handed to
//! the engine — is a pure function of that tag.

use crate::alloc::TrackedAllocator;
use marten_vm_core::{EngineContext, EngineError, EngineResult, JsBuffer, Value};
use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::Arc;

/// Element interpretation of a buffer's bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    /// 8-bit unsigned integers (raw byte array)
    Uint8,
    /// 8-bit signed integers
    Int8,
    /// 16-bit unsigned integers
    Uint16,
    /// 16-bit signed integers
    Int16,
    /// 32-bit unsigned integers
    Uint32,
    /// 32-bit signed integers
    Int32,
    /// 32-bit floats
    Float32,
    /// 64-bit floats
    Float64,
    /// 64-bit signed integers
    BigInt64,
    /// 64-bit unsigned integers
    BigUint64,
    /// Opaque buffer with no element interpretation
    Opaque,
}

impl ElementKind {
    /// Byte width of one element, `None` for the opaque kind
    pub fn byte_width(&self) -> Option<usize> {
        match self {
            ElementKind::Uint8 | ElementKind::Int8 => Some(1),
            ElementKind::Uint16 | ElementKind::Int16 => Some(2),
            ElementKind::Uint32 | ElementKind::Int32 | ElementKind::Float32 => Some(4),
            ElementKind::Float64 | ElementKind::BigInt64 | ElementKind::BigUint64 => Some(8),
            ElementKind::Opaque => None,
        }
    }

    /// Diagnostic name
    pub fn name(&self) -> &'static str {
        match self {
            ElementKind::Uint8 => "Uint8",
            ElementKind::Int8 => "Int8",
            ElementKind::Uint16 => "Uint16",
            ElementKind::Int16 => "Int16",
            ElementKind::Uint32 => "Uint32",
            ElementKind::Int32 => "Int32",
            ElementKind::Float32 => "Float32",
            ElementKind::Float64 => "Float64",
            ElementKind::BigInt64 => "BigInt64",
            ElementKind::BigUint64 => "BigUint64",
            ElementKind::Opaque => "Opaque",
        }
    }
}

/// Who frees the bytes behind a [`BufferValue`]
pub enum Ownership {
    /// Engine-owned: freed through the tracked allocator that produced them,
    /// either on descriptor drop or by the engine's deallocation callback
    /// after hand-off
    Engine {
        /// The allocator that produced (and must free) the bytes
        alloc: Arc<TrackedAllocator>,
    },
    /// Native code is the authoritative owner (an [`crate::owned::OwnedBuffer`]
    /// wrapper); this descriptor never frees
    Native,
    /// An OS mapping, released by unmapping
    Mapped {
        /// Mapping base address
        addr: *mut u8,
        /// Total mapped length
        map_len: usize,
    },
    /// A borrow of bytes owned elsewhere; never freed here
    Borrowed,
}

impl std::fmt::Debug for Ownership {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Ownership::Engine { .. } => write!(f, "Engine"),
            Ownership::Native => write!(f, "Native"),
            Ownership::Mapped { map_len, .. } => write!(f, "Mapped({map_len})"),
            Ownership::Borrowed => write!(f, "Borrowed"),
        }
    }
}

/// Descriptor for a byte range destined for or sourced from the engine
pub struct BufferValue {
    ptr: *mut u8,
    offset: usize,
    /// Logical element count
    len: usize,
    byte_len: usize,
    kind: ElementKind,
    /// Already-constructed engine wrapper, `None` until first hand-off
    cell: Option<Value>,
    shared: bool,
    ownership: Ownership,
}

// SAFETY: buffer descriptors are confined to the engine thread by discipline,
// matching the engine object model; the tracked allocator inside the ownership
// tag is itself thread-safe.
unsafe impl Send for BufferValue {}

impl BufferValue {
    /// A proper empty buffer of the given kind. Never detached, always
    /// readable as an empty slice.
    pub fn empty(kind: ElementKind) -> Self {
        Self {
            ptr: NonNull::dangling().as_ptr(),
            offset: 0,
            len: 0,
            byte_len: 0,
            kind,
            cell: None,
            shared: false,
            ownership: Ownership::Borrowed,
        }
    }

    /// Copy external bytes into a fresh engine-owned allocation
    pub fn copy_from_slice(
        alloc: &Arc<TrackedAllocator>,
        kind: ElementKind,
        bytes: &[u8],
    ) -> EngineResult<Self> {
        if bytes.is_empty() {
            return Ok(Self::empty(kind));
        }
        let mut value = Self::engine_owned(alloc, kind, bytes.len())?;
        value.as_mut_slice().copy_from_slice(bytes);
        Ok(value)
    }

    /// A zero-initialized engine-owned allocation of `byte_len` bytes
    pub fn engine_owned(
        alloc: &Arc<TrackedAllocator>,
        kind: ElementKind,
        byte_len: usize,
    ) -> EngineResult<Self> {
        if byte_len == 0 {
            return Ok(Self::empty(kind));
        }
        let len = element_count(kind, byte_len)?;
        let ptr = alloc.alloc(byte_len).ok_or(EngineError::OutOfMemory)?;
        Ok(Self {
            ptr: ptr.as_ptr(),
            offset: 0,
            len,
            byte_len,
            kind,
            cell: None,
            shared: false,
            ownership: Ownership::Engine {
                alloc: Arc::clone(alloc),
            },
        })
    }

    /// Borrow the backing store of an existing engine buffer object. No
    /// ownership transfer; the engine wrapper stays the owner.
    pub fn from_engine(buf: &Arc<JsBuffer>, kind: ElementKind) -> EngineResult<Self> {
        let byte_len = buf.byte_length();
        let len = element_count(kind, byte_len)?;
        Ok(Self {
            ptr: buf.as_ptr() as *mut u8,
            offset: 0,
            len,
            byte_len,
            kind,
            cell: Some(Value::buffer(Arc::clone(buf))),
            shared: buf.is_shared(),
            ownership: Ownership::Borrowed,
        })
    }

    /// Wrap an OS mapping. The view is `[offset, offset + byte_len)` within
    /// the mapping; unmapping releases `map_len` bytes from `addr`.
    pub(crate) fn mapped(
        addr: *mut u8,
        map_len: usize,
        offset: usize,
        byte_len: usize,
        kind: ElementKind,
        shared: bool,
    ) -> EngineResult<Self> {
        let len = element_count(kind, byte_len)?;
        Ok(Self {
            ptr: addr,
            offset,
            len,
            byte_len,
            kind,
            cell: None,
            shared,
            ownership: Ownership::Mapped { addr, map_len },
        })
    }

    /// Wrap an in-memory range owned by native code. Used by the owned-buffer
    /// wrapper, which is the sole freeing authority.
    pub(crate) fn native_owned(
        ptr: *mut u8,
        kind: ElementKind,
        byte_len: usize,
    ) -> EngineResult<Self> {
        let len = element_count(kind, byte_len)?;
        Ok(Self {
            ptr,
            offset: 0,
            len,
            byte_len,
            kind,
            cell: None,
            shared: false,
            ownership: Ownership::Native,
        })
    }

    /// Element kind
    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    /// Logical element count
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when the buffer holds no bytes
    pub fn is_empty(&self) -> bool {
        self.byte_len == 0
    }

    /// Byte length of the view
    pub fn byte_len(&self) -> usize {
        self.byte_len
    }

    /// Byte offset of the view within the backing store
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Backed by shared memory
    pub fn is_shared(&self) -> bool {
        self.shared
    }

    /// The ownership tag
    pub fn ownership(&self) -> &Ownership {
        &self.ownership
    }

    /// The byte view `ptr[offset .. offset + byte_len]`
    pub fn as_slice(&self) -> &[u8] {
        if self.byte_len == 0 {
            return &[];
        }
        // SAFETY: constructors validate that ptr covers offset + byte_len
        unsafe { std::slice::from_raw_parts(self.ptr.add(self.offset), self.byte_len) }
    }

    /// Mutable byte view
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        if self.byte_len == 0 {
            return &mut [];
        }
        // SAFETY: constructors validate that ptr covers offset + byte_len
        unsafe { std::slice::from_raw_parts_mut(self.ptr.add(self.offset), self.byte_len) }
    }

    /// Hand the bytes to the engine, producing (and caching) the wrapper
    /// value. The first call transfers deallocation responsibility according
    /// to the ownership tag; later calls return the cached wrapper.
    pub fn into_value(&mut self, _ctx: &EngineContext) -> EngineResult<Value> {
        if let Some(cell) = &self.cell {
            return Ok(cell.clone());
        }
        if self.byte_len == 0 {
            // Engines may hand back a detached cell for the zero-length fast
            // path; always materialize a real empty buffer instead.
            let value = Value::buffer(Arc::new(JsBuffer::new_heap(0)));
            self.cell = Some(value.clone());
            return Ok(value);
        }

        let store_len = self.offset + self.byte_len;
        let value = match std::mem::replace(&mut self.ownership, Ownership::Borrowed) {
            Ownership::Engine { alloc } => {
                let ctx = Box::new(TrackedDeallocCtx {
                    alloc,
                    size: store_len,
                });
                // SAFETY: ptr is a live tracked allocation of store_len bytes;
                // the callback frees through the matching allocator.
                let buf = unsafe {
                    JsBuffer::external(
                        self.ptr,
                        store_len,
                        Some(dealloc_tracked),
                        Box::into_raw(ctx) as *mut c_void,
                        self.shared,
                    )
                };
                Value::buffer(Arc::new(buf))
            }
            Ownership::Mapped { addr, map_len } => {
                let ctx = Box::new(MapDeallocCtx { map_len });
                // SAFETY: addr is a live mapping of map_len bytes; the
                // callback unmaps it.
                let buf = unsafe {
                    JsBuffer::external(
                        addr,
                        store_len,
                        Some(dealloc_mapped),
                        Box::into_raw(ctx) as *mut c_void,
                        self.shared,
                    )
                };
                Value::buffer(Arc::new(buf))
            }
            tag @ (Ownership::Native | Ownership::Borrowed) => {
                // The authoritative owner lives elsewhere; hand the engine a
                // never-free wrapper and keep the tag.
                self.ownership = tag;
                // SAFETY: the owner must outlive the engine wrapper; that is
                // the never-free contract of this construction.
                let buf = unsafe {
                    JsBuffer::external(
                        self.ptr,
                        store_len,
                        None,
                        std::ptr::null_mut(),
                        self.shared,
                    )
                };
                Value::buffer(Arc::new(buf))
            }
        };
        self.cell = Some(value.clone());
        Ok(value)
    }
}

impl Drop for BufferValue {
    fn drop(&mut self) {
        match &self.ownership {
            Ownership::Engine { alloc } => {
                if let Some(ptr) = NonNull::new(self.ptr) {
                    // SAFETY: engine-owned descriptors always hold the full
                    // allocation (offset 0, size byte_len) until hand-off.
                    unsafe { alloc.free(ptr, self.byte_len) };
                }
            }
            Ownership::Mapped { addr, map_len } => unmap(*addr, *map_len),
            Ownership::Native | Ownership::Borrowed => {}
        }
    }
}

impl std::fmt::Debug for BufferValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "BufferValue({}, len={}, byte_len={}, {:?})",
            self.kind.name(),
            self.len,
            self.byte_len,
            self.ownership
        )
    }
}

/// Element count for `byte_len` bytes of `kind`, rejecting ragged lengths
fn element_count(kind: ElementKind, byte_len: usize) -> EngineResult<usize> {
    match kind.byte_width() {
        Some(width) => {
            if byte_len % width != 0 {
                return Err(EngineError::range_error(format!(
                    "byte length {} is not a multiple of {} element width {}",
                    byte_len,
                    kind.name(),
                    width
                )));
            }
            Ok(byte_len / width)
        }
        None => Ok(byte_len),
    }
}

struct TrackedDeallocCtx {
    alloc: Arc<TrackedAllocator>,
    size: usize,
}

unsafe fn dealloc_tracked(ptr: *mut u8, ctx: *mut c_void) {
    // SAFETY: ctx was produced by Box::into_raw in into_value
    let ctx = unsafe { Box::from_raw(ctx as *mut TrackedDeallocCtx) };
    if let Some(ptr) = NonNull::new(ptr) {
        // SAFETY: ptr/size match the tracked allocation handed to the engine
        unsafe { ctx.alloc.free(ptr, ctx.size) };
    }
}

struct MapDeallocCtx {
    map_len: usize,
}

unsafe fn dealloc_mapped(ptr: *mut u8, ctx: *mut c_void) {
    // SAFETY: ctx was produced by Box::into_raw in into_value
    let ctx = unsafe { Box::from_raw(ctx as *mut MapDeallocCtx) };
    unmap(ptr, ctx.map_len);
}

#[cfg(unix)]
fn unmap(addr: *mut u8, map_len: usize) {
    if map_len == 0 {
        return;
    }
    // SAFETY: addr/map_len came from a successful mmap with this length
    unsafe { libc::munmap(addr as *mut c_void, map_len) };
}

#[cfg(not(unix))]
fn unmap(_addr: *mut u8, _map_len: usize) {
    unreachable!("mapped buffers are only constructed on unix");
}
