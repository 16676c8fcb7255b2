//! Fixed-capacity handle table.
//!
//! Handles are scan-to-allocate: there is no free list, just a linear scan
//! for the first null slot. A handle's identity is the address of its
//! slot, so handles remain valid to compare and dereference as long as the
//! table itself is alive.

use core::ptr::NonNull;

use crate::config::CoreConfig;
use crate::error::{CoreError, HandleTableCapacitySnafu};
use crate::page::{PageAllocator, PageKind};
use crate::sync::IrqLock;
use snafu::ensure;

/// The kind of root strength a handle represents. The collector in this
/// runtime treats every non-null handle as a strong root (see the design
/// notes on handle-kind semantics); `kind` is still recorded so a future
/// collector can discriminate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HandleKind {
    Normal = 0,
    Weak = 1,
    Pinned = 2,
    Dependent = 3,
}

#[repr(C)]
struct HandleSlot {
    object: *mut u8,
    kind: HandleKind,
    extra: usize,
}

/// A fixed-capacity, scan-to-allocate table of GC handles backed by raw
/// pages rather than any Rust collection.
pub struct HandleTable {
    slots: IrqLock<Option<(NonNull<HandleSlot>, usize)>>,
}

// SAFETY: all access to the raw slot array happens through `IrqLock`.
unsafe impl Sync for HandleTable {}

impl HandleTable {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: IrqLock::new(None),
        }
    }

    /// Reserves backing storage for `capacity` handles from `pages`.
    pub fn init(&self, pages: &PageAllocator, config: &CoreConfig) -> Result<(), CoreError> {
        let capacity = config.handle_table_capacity;
        let slot_bytes = core::mem::size_of::<HandleSlot>();
        let needed_bytes = capacity * slot_bytes;
        let page_count = needed_bytes.div_ceil(config.page_size);
        let available = (page_count * config.page_size) / slot_bytes;
        ensure!(
            available >= capacity,
            HandleTableCapacitySnafu {
                requested: capacity,
                available,
            }
        );
        let run = pages
            .alloc_pages(PageKind::Unmanaged, page_count.max(1), true)
            .ok_or(CoreError::HandleTableCapacity {
                requested: capacity,
                available: 0,
            })?;
        self.slots.lock(|slot| {
            *slot = Some((run.cast(), capacity));
        });
        Ok(())
    }

    /// Allocates a handle for `object`. Returns `None` if the table is
    /// full.
    pub fn alloc(&self, object: NonNull<u8>, kind: HandleKind) -> Option<usize> {
        self.slots.lock(|slot| {
            let (base, capacity) = (*slot)?;
            for i in 0..capacity {
                // SAFETY: `i < capacity`, within the reserved backing run.
                let entry = unsafe { &mut *base.as_ptr().add(i) };
                if entry.object.is_null() {
                    entry.object = object.as_ptr();
                    entry.kind = kind;
                    entry.extra = 0;
                    return Some(base.as_ptr().add(i) as usize);
                }
            }
            None
        })
    }

    /// Frees the handle identified by `handle` (as returned by
    /// [`HandleTable::alloc`]).
    pub fn free(&self, handle: usize) {
        self.slots.lock(|slot| {
            let Some((base, capacity)) = *slot else { return };
            let (start, end) = (base.as_ptr() as usize, base.as_ptr() as usize + capacity * core::mem::size_of::<HandleSlot>());
            if handle < start || handle >= end {
                return;
            }
            // SAFETY: `handle` is within the reserved backing run.
            unsafe { &mut *(handle as *mut HandleSlot) }.object = core::ptr::null_mut();
        });
    }

    /// Calls `f` with every live handle's target object and kind. Used by
    /// the collector to treat the handle table as a root source.
    pub fn for_each_root(&self, mut f: impl FnMut(NonNull<u8>, HandleKind)) {
        self.slots.lock(|slot| {
            let Some((base, capacity)) = *slot else { return };
            for i in 0..capacity {
                // SAFETY: `i < capacity`.
                let entry = unsafe { &*base.as_ptr().add(i) };
                if let Some(obj) = NonNull::new(entry.object) {
                    f(obj, entry.kind);
                }
            }
        });
    }
}

impl Default for HandleTable {
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
    fn alloc_free_and_reuse() {
        let (_buf, pages) = region();
        let table = HandleTable::new();
        table.init(&pages, &CoreConfig::default()).unwrap();
        let mut dummy = 0u8;
        let obj = NonNull::new(&raw mut dummy).unwrap();
        let h = table.alloc(obj, HandleKind::Normal).unwrap();
        let mut count = 0;
        table.for_each_root(|_, _| count += 1);
        assert_eq!(count, 1);
        table.free(h);
        count = 0;
        table.for_each_root(|_, _| count += 1);
        assert_eq!(count, 0);
    }
}
