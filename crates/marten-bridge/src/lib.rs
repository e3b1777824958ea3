//! # Marten Bridge
//!
//! Value marshalling and buffer-ownership bridge between native Rust code and
//! the Marten engine heap. The bridge converts typed native values to and
//! from engine values, moves byte buffers across the boundary without copies
//! where ownership allows it, and keeps external allocations visible to the
//! engine's memory accounting.
//!
//! ## Design principles
//!
//! - Every buffer carries exactly one ownership tag; who frees the bytes is a
//!   pure function of that tag.
//! - Conversion is a closed compile-time impl set. Shape mismatches fail with
//!   `TypeError`; nothing coerces.
//! - Allocator misuse (double free, count underflow, leaked bytes at
//!   teardown) is a fatal assertion, never a recoverable error.
//! - All value and object APIs are engine-thread-confined; only the tracked
//!   allocator's counter tolerates cross-thread use.

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod alloc;
pub mod bind;
pub mod buffer;
pub mod convert;
pub mod effect;
#[cfg(unix)]
pub mod import;
pub mod owned;
pub mod string;

pub use alloc::{ByteAllocator, SystemHeap, TrackedAllocator};
pub use bind::{BindingRegistry, BoundArg, CallFrame, NativeBinding, ParamSpec, PinScope};
pub use buffer::{BufferValue, ElementKind, Ownership};
pub use convert::{ByteString, FromEngine, OrdinalEnum, ToEngine};
pub use effect::{CallEffects, HeapRegion, RegionSet};
#[cfg(unix)]
pub use import::{MMAP_THRESHOLD, buffer_from_fd, buffer_from_shm};
pub use owned::OwnedBuffer;
pub use string::{RefString, RefStringStore, StringSliceGuard};
