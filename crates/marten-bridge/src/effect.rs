//! Call effect descriptors
//!
//! Bindings advertise which abstract heap regions they read and write so an
//! optimizing caller can reorder or elide calls. The descriptors are purely
//! declarative; correctness is a contract checked by comparing fast-path and
//! slow-path results for registered bindings.

/// Abstract heap locations a native call can touch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapRegion {
    /// Indexed array storage
    ArrayElements,
    /// String character data
    StringContents,
    /// Raw buffer bytes
    BufferBytes,
    /// Named object properties
    ObjectProperties,
    /// Engine-global state
    GlobalState,
    /// Native allocator bookkeeping
    AllocatorState,
}

/// A conservative set of heap regions: nothing, everything, or up to four
/// named regions. Sets that would exceed four regions widen to `Top`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionSet {
    /// Touches nothing
    None,
    /// May touch anything
    Top,
    /// Touches at most the listed regions
    Regions([Option<HeapRegion>; 4]),
}

impl RegionSet {
    /// The set of exactly the given regions, widened to `Top` past four
    pub fn of(regions: &[HeapRegion]) -> Self {
        if regions.is_empty() {
            return RegionSet::None;
        }
        if regions.len() > 4 {
            return RegionSet::Top;
        }
        let mut slots = [None; 4];
        for (slot, region) in slots.iter_mut().zip(regions) {
            *slot = Some(*region);
        }
        RegionSet::Regions(slots)
    }

    /// True when the set excludes everything
    pub fn is_none(&self) -> bool {
        matches!(self, RegionSet::None)
    }

    /// True when the set may include anything
    pub fn is_top(&self) -> bool {
        matches!(self, RegionSet::Top)
    }

    /// True when `region` may be in the set
    pub fn contains(&self, region: HeapRegion) -> bool {
        match self {
            RegionSet::None => false,
            RegionSet::Top => true,
            RegionSet::Regions(slots) => slots.iter().any(|slot| *slot == Some(region)),
        }
    }

    /// True when the two sets may share a region
    pub fn intersects(&self, other: &RegionSet) -> bool {
        match (self, other) {
            (RegionSet::None, _) | (_, RegionSet::None) => false,
            (RegionSet::Top, _) | (_, RegionSet::Top) => true,
            (RegionSet::Regions(slots), _) => slots
                .iter()
                .flatten()
                .any(|region| other.contains(*region)),
        }
    }
}

/// Read/write effect summary for one native binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallEffects {
    /// Regions the call may read
    pub reads: RegionSet,
    /// Regions the call may write
    pub writes: RegionSet,
}

impl CallEffects {
    /// Reads nothing, writes nothing
    pub fn pure() -> Self {
        Self {
            reads: RegionSet::None,
            writes: RegionSet::None,
        }
    }

    /// May read and write anything; the safe default
    pub fn top() -> Self {
        Self {
            reads: RegionSet::Top,
            writes: RegionSet::Top,
        }
    }

    /// Reads the given regions, writes nothing
    pub fn reading(regions: &[HeapRegion]) -> Self {
        Self {
            reads: RegionSet::of(regions),
            writes: RegionSet::None,
        }
    }

    /// Adds the given write regions
    pub fn writing(mut self, regions: &[HeapRegion]) -> Self {
        self.writes = RegionSet::of(regions);
        self
    }

    /// True when the call touches no heap region at all
    pub fn is_pure(&self) -> bool {
        self.reads.is_none() && self.writes.is_none()
    }

    /// True when this call's writes may clobber the given reads
    pub fn writes_overlap(&self, reads: &RegionSet) -> bool {
        self.writes.intersects(reads)
    }

    /// True when a caller may drop the call if its result is unused
    pub fn allows_elision(&self) -> bool {
        self.writes.is_none()
    }
}

impl Default for CallEffects {
    fn default() -> Self {
        Self::top()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overflow_widens_to_top() {
        let all = RegionSet::of(&[
            HeapRegion::ArrayElements,
            HeapRegion::StringContents,
            HeapRegion::BufferBytes,
            HeapRegion::ObjectProperties,
            HeapRegion::GlobalState,
        ]);
        assert!(all.is_top());
        assert!(all.contains(HeapRegion::AllocatorState));
    }

    #[test]
    fn test_intersection() {
        let a = RegionSet::of(&[HeapRegion::BufferBytes, HeapRegion::AllocatorState]);
        let b = RegionSet::of(&[HeapRegion::BufferBytes]);
        let c = RegionSet::of(&[HeapRegion::GlobalState]);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        assert!(!a.intersects(&RegionSet::None));
        assert!(a.intersects(&RegionSet::Top));
    }

    #[test]
    fn test_elision_and_purity() {
        assert!(CallEffects::pure().is_pure());
        assert!(CallEffects::pure().allows_elision());

        let read_only = CallEffects::reading(&[HeapRegion::ArrayElements]);
        assert!(!read_only.is_pure());
        assert!(read_only.allows_elision());

        let writer = CallEffects::pure().writing(&[HeapRegion::BufferBytes]);
        assert!(!writer.allows_elision());
        assert!(writer.writes_overlap(&RegionSet::of(&[HeapRegion::BufferBytes])));
        assert!(!writer.writes_overlap(&RegionSet::of(&[HeapRegion::GlobalState])));
    }
}
