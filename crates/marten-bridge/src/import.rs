//! Buffer import from file descriptors
//!
//! Small files are copied into an engine-owned allocation; large files are
//! mapped and alias the underlying object. The descriptor is consumed either
//! way: the copy path closes it after reading, the map path closes it right
//! after the mmap call whether or not the mapping succeeded.

use crate::alloc::TrackedAllocator;
use crate::buffer::{BufferValue, ElementKind};
use marten_vm_core::{EngineError, EngineResult};
use std::fs::File;
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd};
use std::os::unix::fs::FileExt;
use std::sync::Arc;

/// Files at or above this size are mapped instead of copied
pub const MMAP_THRESHOLD: u64 = 4 * 1024 * 1024;

/// Import a file's contents as a buffer, consuming the descriptor.
///
/// The file is stat'ed first; a stat failure closes the descriptor and
/// surfaces as `Io`. Zero-length files produce a proper empty buffer.
pub fn buffer_from_fd(alloc: &Arc<TrackedAllocator>, fd: OwnedFd) -> EngineResult<BufferValue> {
    let file = File::from(fd);
    let size = file.metadata()?.len();
    tracing::trace!(size, threshold = MMAP_THRESHOLD, "importing buffer from fd");

    if size == 0 {
        return Ok(BufferValue::empty(ElementKind::Uint8));
    }
    if size < MMAP_THRESHOLD {
        copy_from_file(alloc, &file, size as usize)
    } else {
        map_file(file, size as usize)
    }
}

/// Copy path: fill a zero-initialized engine-owned allocation by repeated
/// positional reads. A zero-byte read before the stat size is reached is
/// treated as EOF and leaves the remainder zero-filled.
fn copy_from_file(
    alloc: &Arc<TrackedAllocator>,
    file: &File,
    size: usize,
) -> EngineResult<BufferValue> {
    let mut buffer = BufferValue::engine_owned(alloc, ElementKind::Uint8, size)?;
    let dest = buffer.as_mut_slice();
    let mut total = 0usize;
    while total < size {
        match file.read_at(&mut dest[total..], total as u64) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(EngineError::Io(err)),
        }
    }
    Ok(buffer)
}

/// Map path: map the whole file read-write and shared, so the buffer aliases
/// the file. The descriptor is dropped immediately after the mmap call.
fn map_file(file: File, size: usize) -> EngineResult<BufferValue> {
    // SAFETY: fd is valid for the duration of the call; a shared file mapping
    // does not require the descriptor to stay open.
    let addr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            file.as_raw_fd(),
            0,
        )
    };
    drop(file);
    if addr == libc::MAP_FAILED {
        return Err(EngineError::Io(std::io::Error::last_os_error()));
    }
    BufferValue::mapped(addr as *mut u8, size, 0, size, ElementKind::Uint8, false)
}

/// Import a view of a shared-memory descriptor.
///
/// Maps `total_size` bytes and exposes `[byte_offset, byte_offset +
/// byte_len)` as a shared buffer, bypassing the size-threshold policy. The
/// descriptor stays with the caller.
pub fn buffer_from_shm(
    fd: BorrowedFd<'_>,
    byte_offset: usize,
    byte_len: usize,
    total_size: usize,
) -> EngineResult<BufferValue> {
    if byte_len == 0 && total_size == 0 {
        return Ok(BufferValue::empty(ElementKind::Uint8));
    }
    let end = byte_offset
        .checked_add(byte_len)
        .ok_or_else(|| EngineError::range_error("shared memory view overflows"))?;
    if end > total_size {
        return Err(EngineError::range_error(format!(
            "shared memory view [{byte_offset}, {end}) exceeds segment size {total_size}"
        )));
    }

    // SAFETY: fd is a valid descriptor borrowed for this call; the mapping
    // outlives it by design of shared memory objects.
    let addr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            total_size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd.as_raw_fd(),
            0,
        )
    };
    if addr == libc::MAP_FAILED {
        return Err(EngineError::Io(std::io::Error::last_os_error()));
    }
    BufferValue::mapped(
        addr as *mut u8,
        total_size,
        byte_offset,
        byte_len,
        ElementKind::Uint8,
        true,
    )
}
