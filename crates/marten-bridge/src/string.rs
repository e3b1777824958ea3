//! Reference-counted string handles
//!
//! A `RefString` carries an explicit logical reference count on top of the
//! engine's string representation. The count tracks outstanding native-side
//! borrows; when it reaches zero the handle's pre-destruction hook runs (store
//! entry removal) before the backing storage can be released.

use dashmap::DashMap;
use marten_vm_core::{JsString, Value};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

type DestroyHook = Box<dyn FnOnce() + Send>;

struct StringCell {
    backing: Arc<JsString>,
    count: AtomicUsize,
    hook: Mutex<Option<DestroyHook>>,
}

impl StringCell {
    fn release(&self) {
        let prev = self.count.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "string handle reference count underflow");
        if prev == 1
            && let Some(hook) = self.hook.lock().take()
        {
            hook();
        }
    }

    fn retain(&self) {
        let prev = self.count.fetch_add(1, Ordering::AcqRel);
        assert!(prev > 0, "string handle revived after release");
    }
}

/// A string handle with an explicit logical reference count
#[derive(Clone)]
pub struct RefString {
    cell: Arc<StringCell>,
}

impl RefString {
    /// A standalone handle (count 1, no pre-destruction hook)
    pub fn new(text: impl Into<Arc<str>>) -> Self {
        Self {
            cell: Arc::new(StringCell {
                backing: Arc::new(JsString::new(text)),
                count: AtomicUsize::new(1),
                hook: Mutex::new(None),
            }),
        }
    }

    /// Install (or replace) the hook that runs when the count reaches zero
    pub fn on_release(&self, hook: impl FnOnce() + Send + 'static) {
        *self.cell.hook.lock() = Some(Box::new(hook));
    }

    /// The string content
    pub fn as_str(&self) -> &str {
        self.cell.backing.as_str()
    }

    /// Content byte length
    pub fn len(&self) -> usize {
        self.cell.backing.len()
    }

    /// True for the empty string
    pub fn is_empty(&self) -> bool {
        self.cell.backing.is_empty()
    }

    /// Precomputed content hash
    pub fn content_hash(&self) -> u64 {
        self.cell.backing.hash_value()
    }

    /// Current logical reference count
    pub fn ref_count(&self) -> usize {
        self.cell.count.load(Ordering::Acquire)
    }

    /// Take one logical reference
    pub fn ref_(&self) {
        self.cell.retain();
    }

    /// Drop one logical reference; at zero the pre-destruction hook runs
    pub fn deref_(&self) {
        self.cell.release();
    }

    /// Take a reference and return a guard over the content. Guard drop is
    /// the paired deref.
    pub fn slice(&self) -> StringSliceGuard {
        self.cell.retain();
        StringSliceGuard {
            cell: Arc::clone(&self.cell),
        }
    }

    /// The engine value sharing this handle's backing storage
    pub fn to_value(&self) -> Value {
        Value::string(Arc::clone(&self.cell.backing))
    }

    /// The backing engine string
    pub fn backing(&self) -> &Arc<JsString> {
        &self.cell.backing
    }

    fn same_cell(&self, other: &RefString) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

impl std::fmt::Debug for RefString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RefString({:?}, count={})", self.as_str(), self.ref_count())
    }
}

impl PartialEq for RefString {
    fn eq(&self, other: &Self) -> bool {
        self.content_hash() == other.content_hash() && self.as_str() == other.as_str()
    }
}

impl Eq for RefString {}

/// RAII guard from [`RefString::slice`]; dropping it releases the reference
pub struct StringSliceGuard {
    cell: Arc<StringCell>,
}

impl Deref for StringSliceGuard {
    type Target = str;

    fn deref(&self) -> &str {
        self.cell.backing.as_str()
    }
}

impl Drop for StringSliceGuard {
    fn drop(&mut self) {
        self.cell.release();
    }
}

type Bucket = SmallVec<[RefString; 1]>;

/// Deduplicating store of string handles keyed by content hash.
///
/// Lookups verify content equality, so hash-colliding strings with distinct
/// contents land in the same bucket but never merge. Interned handles carry a
/// hook that removes their store entry when the last logical reference drops.
pub struct RefStringStore {
    table: Arc<DashMap<u64, Bucket>>,
}

impl RefStringStore {
    /// An empty store
    pub fn new() -> Self {
        Self {
            table: Arc::new(DashMap::new()),
        }
    }

    /// Get the handle for `text`, creating and registering one on miss.
    /// On hit the existing handle gains a logical reference.
    pub fn intern(&self, text: &str) -> RefString {
        let probe = Arc::new(JsString::new(text));
        let hash = probe.hash_value();

        let mut bucket = self.table.entry(hash).or_default();
        if let Some(existing) = bucket.iter().find(|s| s.as_str() == text) {
            existing.ref_();
            return existing.clone();
        }

        let handle = RefString {
            cell: Arc::new(StringCell {
                backing: probe,
                count: AtomicUsize::new(1),
                hook: Mutex::new(None),
            }),
        };
        let table = Arc::downgrade(&self.table);
        let entry = handle.clone();
        handle.on_release(move || Self::evict(&table, hash, &entry));
        bucket.push(handle.clone());
        handle
    }

    /// Number of distinct strings currently registered
    pub fn len(&self) -> usize {
        self.table.iter().map(|bucket| bucket.len()).sum()
    }

    /// True when no strings are registered
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    fn evict(
        table: &Weak<DashMap<u64, Bucket>>,
        hash: u64,
        entry: &RefString,
    ) {
        let Some(table) = table.upgrade() else {
            return;
        };
        table.remove_if_mut(&hash, |_, bucket| {
            bucket.retain(|s| !s.same_cell(entry));
            bucket.is_empty()
        });
    }
}

impl Default for RefStringStore {
    fn default() -> Self {
        Self::new()
    }
}
