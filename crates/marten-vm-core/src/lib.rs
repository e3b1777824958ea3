//! # Marten VM Core
//!
//! Engine-side value substrate for the Marten embedding bridge: the tagged
//! value representation, engine strings/arrays/buffers, memory-pressure
//! accounting, and the shared error taxonomy.
//!
//! ## Design Principles
//!
//! - **Single engine thread**: value and object APIs are thread-confined by
//!   discipline; only memory accounting uses atomics
//! - **Explicit ownership**: externally-owned buffer bytes always carry a
//!   deallocation callback (or the explicit never-free marker)
//! - **No coercion**: this layer maps between type systems, it does not
//!   implement engine coercion semantics

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod array;
pub mod buffer;
pub mod context;
pub mod error;
pub mod memory;
pub mod string;
pub mod value;

pub use array::JsArray;
pub use buffer::{DeallocFn, JsBuffer};
pub use context::EngineContext;
pub use error::{EngineError, EngineResult};
pub use memory::MemoryManager;
pub use string::JsString;
pub use value::Value;
