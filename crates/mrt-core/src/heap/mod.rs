//! Size-classed object heap: routes allocations to the small, medium or
//! large sub-heap and provides the cross-cutting operations the collector
//! needs (mark, sweep, object discovery from a raw address).

pub mod large;
pub mod medium;
pub mod small;

use core::mem::size_of;
use core::ptr::NonNull;

use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::object::{object_size, MethodTable, MethodTableFlags};
use crate::page::{PageAllocator, PageKind};

pub use large::LargeHeap;
pub use medium::MediumHeap;
pub use small::SmallHeap;

/// Which sub-heap currently owns an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectClass {
    Small,
    Medium,
    Large,
}

/// The whole managed heap: page allocator plus the three size classes.
pub struct Heap {
    pages: PageAllocator,
    small: SmallHeap,
    medium: MediumHeap,
    large: LargeHeap,
    region_base: usize,
    region_len: usize,
    config: CoreConfig,
}

impl Heap {
    /// Creates a heap over the managed region `[base, base+len)`.
    ///
    /// # Safety
    /// `base..base+len` must be valid, exclusively-owned, writable memory
    /// for the lifetime of this heap.
    pub unsafe fn new(base: usize, len: usize, config: CoreConfig) -> Result<Self, CoreError> {
        // First heap built on this core publishes its configuration
        // ambiently, for consumers with no `CoreConfig` of their own to
        // take as a parameter (the exception dispatcher). Idempotent: a
        // second `Heap::new` call is a no-op here and still uses its own
        // `config` regardless of what got installed.
        crate::config::install(config);
        let pages = PageAllocator::new();
        // SAFETY: caller upholds the same contract this function documents.
        unsafe { pages.init(base, len, config.page_size)? };
        Ok(Self {
            pages,
            small: SmallHeap::new(),
            medium: MediumHeap::new(),
            large: LargeHeap::new(),
            region_base: base,
            region_len: len,
            config,
        })
    }

    #[must_use]
    pub fn page_allocator(&self) -> &PageAllocator {
        &self.pages
    }

    /// Allocates and initializes storage for an instance of `mt` with
    /// `length` elements (ignored unless `mt` has a component size).
    /// Returns `None` on exhaustion.
    pub fn alloc(&self, mt: NonNull<MethodTable>, length: u32) -> Option<NonNull<u8>> {
        // SAFETY: method tables are immutable, frozen descriptors; caller
        // guarantees `mt` is valid for the runtime's lifetime.
        let mt_ref = unsafe { mt.as_ref() };
        let size = object_size(mt_ref, length);
        let ptr = self.alloc_raw(size)?;
        // SAFETY: `ptr` is freshly allocated storage at least `size`
        // bytes, zeroed.
        unsafe {
            ptr.as_ptr().cast::<usize>().write_unaligned(mt.as_ptr() as usize);
            if mt_ref.flags.contains(MethodTableFlags::HAS_COMPONENT_SIZE) {
                ptr.as_ptr().add(size_of::<usize>()).cast::<u32>().write_unaligned(length);
            }
        }
        Some(ptr)
    }

    fn alloc_raw(&self, size: usize) -> Option<NonNull<u8>> {
        if size <= self.config.max_small_item_size && size <= small::max_item_size() {
            self.small.alloc(&self.pages, size)
        } else if MediumHeap::fits(size, self.config.page_size) {
            self.medium.alloc(&self.pages, size, self.config.page_size)
        } else {
            self.large.alloc(&self.pages, size, self.config.page_size)
        }
    }

    /// Reads the method table of the object at `obj_start`.
    #[must_use]
    pub fn method_table_of(&self, obj_start: NonNull<u8>) -> Option<NonNull<MethodTable>> {
        // SAFETY: `obj_start` is a live object's content pointer, whose
        // first word is its method-table pointer.
        let raw = unsafe { obj_start.as_ptr().cast::<usize>().read_unaligned() };
        NonNull::new(raw as *mut MethodTable)
    }

    /// Reads the element count of the object at `obj_start`, given its
    /// method table.
    #[must_use]
    pub fn length_of(&self, obj_start: NonNull<u8>, mt: &MethodTable) -> u32 {
        if !mt.flags.contains(MethodTableFlags::HAS_COMPONENT_SIZE) {
            return 0;
        }
        // SAFETY: type has a component size, so the length field exists
        // right after the method-table pointer.
        unsafe {
            obj_start
                .as_ptr()
                .add(size_of::<usize>())
                .cast::<u32>()
                .read_unaligned()
        }
    }

    fn classify(&self, page_start: usize) -> Option<(ObjectClass, PageKind)> {
        let kind = self.pages.page_kind(NonNull::new(page_start as *mut u8)?)?;
        match kind {
            PageKind::HeapSmall => Some((ObjectClass::Small, kind)),
            PageKind::HeapMedium => Some((ObjectClass::Medium, kind)),
            PageKind::HeapLarge => Some((ObjectClass::Large, kind)),
            _ => None,
        }
    }

    /// Resolves a conservative root candidate: if `addr` lies within the
    /// managed region on a page owned by one of the three heaps, returns
    /// the object-content pointer of the object that page (or slot)
    /// belongs to, provided that slot is currently live and its header
    /// looks like a real method-table pointer (outside the managed
    /// region). Returns `None` for anything that doesn't check out —
    /// conservative scanning tolerates false negatives on garbage values,
    /// never false positives that would corrupt live data.
    #[must_use]
    pub fn object_at(&self, addr: usize) -> Option<NonNull<u8>> {
        if addr % size_of::<usize>() != 0 {
            return None;
        }
        let page_start = self.pages.owning_page_start(addr)?;
        let (class, _) = self.classify(page_start)?;
        let obj = match class {
            // SAFETY: `page_start` was just classified `HeapSmall`.
            ObjectClass::Small => unsafe { small::resolve(page_start, addr) }?,
            // SAFETY: `page_start` was just classified `HeapMedium`.
            ObjectClass::Medium => unsafe { medium::resolve(page_start) }?,
            // SAFETY: `page_start` was just classified `HeapLarge`.
            ObjectClass::Large => unsafe { large::resolve(page_start) }?,
        };
        let raw_mt = unsafe { obj.as_ptr().cast::<usize>().read_unaligned() };
        if raw_mt == 0 || raw_mt % size_of::<usize>() != 0 || self.pages.contains(raw_mt) {
            return None;
        }
        Some(obj)
    }

    /// `true` if the object at `obj_start` is currently marked.
    #[must_use]
    pub fn is_marked(&self, obj_start: NonNull<u8>) -> bool {
        let addr = obj_start.as_ptr() as usize;
        match self.classify_by_addr(addr) {
            Some(ObjectClass::Small) => SmallHeap::is_marked(addr),
            Some(ObjectClass::Medium) => MediumHeap::is_marked(obj_start),
            Some(ObjectClass::Large) => LargeHeap::is_marked(obj_start),
            None => false,
        }
    }

    /// Marks the object at `obj_start`.
    pub fn mark(&self, obj_start: NonNull<u8>) {
        let addr = obj_start.as_ptr() as usize;
        match self.classify_by_addr(addr) {
            Some(ObjectClass::Small) => SmallHeap::mark(addr),
            Some(ObjectClass::Medium) => MediumHeap::mark(obj_start),
            Some(ObjectClass::Large) => LargeHeap::mark(obj_start),
            None => {}
        }
    }

    fn classify_by_addr(&self, addr: usize) -> Option<ObjectClass> {
        let page_start = self.pages.owning_page_start(addr)?;
        self.classify(page_start).map(|(c, _)| c)
    }

    /// Sweeps every size class. Returns the number of objects reclaimed.
    pub fn sweep(&self) -> usize {
        self.small.sweep(&self.pages)
            + self.medium.sweep(&self.pages, self.region_base, self.region_len, self.config.page_size)
            + self.large.sweep(&self.pages, self.region_base, self.region_len, self.config.page_size)
    }

    /// Bounds of the managed region, for root-scanning range checks.
    #[must_use]
    pub fn region(&self) -> (usize, usize) {
        (self.region_base, self.region_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{GcDescSeries, MethodTableFlags};

    fn region(pages: usize) -> (std::vec::Vec<u8>, Heap) {
        let page_size = crate::config::PAGE_SIZE;
        let len = pages * page_size;
        let mut buf = std::vec![0u8; len + page_size];
        let base = buf.as_mut_ptr() as usize;
        let aligned = (base + page_size - 1) & !(page_size - 1);
        let heap = unsafe { Heap::new(aligned, len, CoreConfig::default()).unwrap() };
        (buf, heap)
    }

    #[repr(C)]
    struct Fixture {
        _series: [GcDescSeries; 0],
        num_series: isize,
        mt: MethodTable,
    }

    #[test]
    fn alloc_small_medium_large_round_trip() {
        let (_buf, heap) = region(64);
        let fixture = std::boxed::Box::new(Fixture {
            _series: [],
            num_series: 0,
            mt: MethodTable {
                base_size: 32,
                component_size: 0,
                flags: MethodTableFlags::empty(),
                related_parameter_type: None,
                base_type: None,
            },
        });
        let mt = NonNull::from(&fixture.mt);
        let small = heap.alloc(mt, 0).unwrap();
        assert_eq!(heap.method_table_of(small), Some(mt));

        let fixture_medium = std::boxed::Box::new(Fixture {
            _series: [],
            num_series: 0,
            mt: MethodTable {
                base_size: 3000,
                component_size: 0,
                flags: MethodTableFlags::empty(),
                related_parameter_type: None,
                base_type: None,
            },
        });
        let mt_medium = NonNull::from(&fixture_medium.mt);
        let medium = heap.alloc(mt_medium, 0).unwrap();
        assert_eq!(heap.method_table_of(medium), Some(mt_medium));

        let fixture_large = std::boxed::Box::new(Fixture {
            _series: [],
            num_series: 0,
            mt: MethodTable {
                base_size: 20_000,
                component_size: 0,
                flags: MethodTableFlags::empty(),
                related_parameter_type: None,
                base_type: None,
            },
        });
        let mt_large = NonNull::from(&fixture_large.mt);
        let large = heap.alloc(mt_large, 0).unwrap();
        assert_eq!(heap.method_table_of(large), Some(mt_large));
    }

    #[test]
    fn object_at_rejects_garbage_addresses() {
        let (_buf, heap) = region(8);
        assert!(heap.object_at(0xdead_beef).is_none());
    }
}
