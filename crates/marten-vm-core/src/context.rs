//! Engine execution context
//!
//! The context owns the memory accounting for one engine instance and is the
//! construction point for engine cells: creating a string or array books its
//! bytes against the memory manager, and a failed booking surfaces as
//! `OutOfMemory` — the "engine could not materialize a value" failure that
//! converters must propagate unchanged.
//!
//! Bookings are one-way: there is no collector here to credit bytes back when
//! cells drop, so `allocated` is a cumulative high-water figure. Contexts are
//! sized for one embedding session; a long-lived context with a tight limit
//! will eventually refuse new cells.

use crate::array::{ELEMENT_SIZE, JsArray};
use crate::buffer::JsBuffer;
use crate::error::EngineResult;
use crate::memory::MemoryManager;
use crate::string::JsString;
use crate::value::Value;
use std::sync::Arc;

/// An engine execution context
pub struct EngineContext {
    memory: Arc<MemoryManager>,
}

impl EngineContext {
    /// Create a context with the given memory manager
    pub fn new(memory: Arc<MemoryManager>) -> Self {
        Self { memory }
    }

    /// Create a context with an effectively unlimited memory manager (tests)
    pub fn test() -> Self {
        Self::new(Arc::new(MemoryManager::test()))
    }

    /// The context's memory manager
    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.memory
    }

    /// Create an engine string from UTF-8 content
    pub fn new_string(&self, s: &str) -> EngineResult<Value> {
        self.memory.alloc(s.len())?;
        Ok(Value::string(Arc::new(JsString::new(s))))
    }

    /// Create an empty engine array with capacity for `len` elements
    pub fn new_array(&self, len: usize) -> EngineResult<Arc<JsArray>> {
        self.memory.alloc(len.saturating_mul(ELEMENT_SIZE))?;
        Ok(Arc::new(JsArray::with_capacity(len)))
    }

    /// Create a zero-initialized engine-heap buffer
    pub fn new_buffer(&self, byte_len: usize) -> EngineResult<Arc<JsBuffer>> {
        self.memory.alloc(byte_len)?;
        Ok(Arc::new(JsBuffer::new_heap(byte_len)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_string_books_memory() {
        let ctx = EngineContext::new(Arc::new(MemoryManager::new(1024)));
        let v = ctx.new_string("hello").unwrap();
        assert_eq!(v.as_string().unwrap().as_str(), "hello");
        assert_eq!(ctx.memory().allocated(), 5);
    }

    #[test]
    fn test_out_of_memory_surfaces() {
        let ctx = EngineContext::new(Arc::new(MemoryManager::new(4)));
        assert!(ctx.new_string("too long for the limit").is_err());
        assert!(ctx.new_buffer(1024).is_err());
    }
}
