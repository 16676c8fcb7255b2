//! Frozen-segment registry.
//!
//! Frozen segments are pre-initialized regions (typically holding boxed
//! constants emitted by the ahead-of-time compiler) that are always-live
//! roots and are never swept. The registry itself is a singly-linked list
//! of metadata records, bump-allocated from an unmanaged page.

use core::ptr::NonNull;

use crate::error::{CoreError, SegmentCapacitySnafu};
use crate::page::{PageAllocator, PageKind};
use crate::sync::IrqLock;
use snafu::ensure;

struct SegmentRecord {
    start: usize,
    allocated: usize,
    committed: usize,
    reserved: usize,
    next: Option<NonNull<SegmentRecord>>,
}

struct Bump {
    page: NonNull<u8>,
    used: usize,
    capacity: usize,
}

/// Registry of frozen segments.
pub struct FrozenSegments {
    head: IrqLock<Option<NonNull<SegmentRecord>>>,
    bump: IrqLock<Option<Bump>>,
}

// SAFETY: all access to the raw linked list and bump arena happens
// through their respective `IrqLock`s.
unsafe impl Sync for FrozenSegments {}

impl FrozenSegments {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            head: IrqLock::new(None),
            bump: IrqLock::new(None),
        }
    }

    /// Registers a new frozen segment `[start, start+allocated)`.
    pub fn register(
        &self,
        pages: &PageAllocator,
        start: usize,
        allocated: usize,
        committed: usize,
        reserved: usize,
    ) -> Result<(), CoreError> {
        let record_size = core::mem::size_of::<SegmentRecord>();
        let record_ptr = self.bump.lock(|bump| -> Result<NonNull<SegmentRecord>, CoreError> {
            if bump.as_ref().is_none_or(|b| b.used + record_size > b.capacity) {
                let page_size = crate::config::PAGE_SIZE;
                let new_page = pages
                    .alloc_pages(PageKind::Unmanaged, 1, true)
                    .ok_or(CoreError::SegmentCapacity { capacity: 0 })?;
                *bump = Some(Bump {
                    page: new_page,
                    used: 0,
                    capacity: page_size,
                });
            }
            let b = bump.as_mut().expect("just populated above");
            ensure!(
                b.used + record_size <= b.capacity,
                SegmentCapacitySnafu {
                    capacity: b.capacity / record_size,
                }
            );
            // SAFETY: `b.used..b.used+record_size` is within the bump
            // page's reserved bytes.
            let ptr = unsafe { b.page.as_ptr().add(b.used) }.cast::<SegmentRecord>();
            b.used += record_size;
            Ok(unsafe { NonNull::new_unchecked(ptr) })
        })?;

        self.head.lock(|head| {
            // SAFETY: `record_ptr` was just bump-allocated, uninitialized
            // and exclusively owned.
            unsafe {
                record_ptr.as_ptr().write(SegmentRecord {
                    start,
                    allocated,
                    committed,
                    reserved,
                    next: *head,
                });
            }
            *head = Some(record_ptr);
        });
        Ok(())
    }

    /// Updates an existing segment's `allocated`/`committed` sizes,
    /// located by `start`. No-op if no such segment is registered.
    pub fn update(&self, start: usize, allocated: usize, committed: usize) {
        self.head.lock(|head| {
            let mut cursor = *head;
            while let Some(record) = cursor {
                // SAFETY: every record in this list was written by
                // `register` and never freed.
                let r = unsafe { &mut *record.as_ptr() };
                if r.start == start {
                    r.allocated = allocated;
                    r.committed = committed;
                    return;
                }
                cursor = r.next;
            }
        });
    }

    /// `true` if `addr` falls within any registered segment's allocated
    /// extent.
    #[must_use]
    pub fn contains(&self, addr: usize) -> bool {
        self.head.lock(|head| {
            let mut cursor = *head;
            while let Some(record) = cursor {
                // SAFETY: see `update`.
                let r = unsafe { &*record.as_ptr() };
                if addr >= r.start && addr < r.start + r.allocated {
                    return true;
                }
                cursor = r.next;
            }
            false
        })
    }
}

impl Default for FrozenSegments {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region() -> (std::vec::Vec<u8>, PageAllocator) {
        let page_size = crate::config::PAGE_SIZE;
        let len = 8 * page_size;
        let mut buf = std::vec![0u8; len + page_size];
        let base = buf.as_mut_ptr() as usize;
        let aligned = (base + page_size - 1) & !(page_size - 1);
        let alloc = PageAllocator::new();
        unsafe { alloc.init(aligned, len, page_size).unwrap() };
        (buf, alloc)
    }

    #[test]
    fn register_then_contains_then_update() {
        let (_buf, pages) = region();
        let registry = FrozenSegments::new();
        registry.register(&pages, 0x1000, 0x100, 0x100, 0x1000).unwrap();
        assert!(registry.contains(0x1050));
        assert!(!registry.contains(0x2000));
        registry.update(0x1000, 0x200, 0x200);
        assert!(registry.contains(0x1180));
    }
}
