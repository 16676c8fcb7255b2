//! Precise mark-and-sweep collector.
//!
//! Collection is single-threaded stop-the-world: by the time [`Collector::collect`]
//! is called, the host kernel has already masked interrupts on the
//! initiating CPU and is not running any other mutator. Mark completes in
//! full before sweep begins.

mod condition;
mod mark_stack;
mod metrics;
mod roots;

pub use condition::{CollectCondition, CollectInfo, default_collect_condition};
pub use metrics::{CollectionKind, GcMetrics};
pub use roots::{RootProvider, StaticRegion};

use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::config::CoreConfig;
use crate::frozen::FrozenSegments;
use crate::handles::HandleTable;
use crate::heap::Heap;
use crate::object::enumerate_references;
use crate::page::{PageAllocator, PageKind};
use crate::sync::IrqLock;

use mark_stack::MarkStack;

/// Drives mark-and-sweep collections over a [`Heap`].
pub struct Collector {
    mark_stack: MarkStack,
    metrics: metrics::MetricsCell,
    condition: IrqLock<CollectCondition>,
    in_collect: AtomicBool,
}

impl Collector {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            mark_stack: MarkStack::new(),
            metrics: metrics::MetricsCell::new(),
            condition: IrqLock::new(default_collect_condition as CollectCondition),
            in_collect: AtomicBool::new(false),
        }
    }

    /// Most recent collection's statistics.
    #[must_use]
    pub fn last_metrics(&self) -> GcMetrics {
        self.metrics.get()
    }

    /// `true` while a collection driven by this collector is in progress.
    #[must_use]
    pub fn is_collecting(&self) -> bool {
        self.in_collect.load(Ordering::Acquire)
    }

    /// Installs the policy [`Self::maybe_collect`] consults. Lets a host
    /// kernel plug in its own heuristic instead of the page-occupancy
    /// default.
    pub fn set_collect_condition(&self, condition: CollectCondition) {
        self.condition.lock(|c| *c = condition);
    }

    /// Unconditionally runs a full collection. The explicit, forced
    /// counterpart to [`Self::maybe_collect`]'s threshold-triggered one.
    pub fn collect_full(
        &self,
        heap: &Heap,
        handles: &HandleTable,
        frozen: &FrozenSegments,
        pages: &PageAllocator,
        config: &CoreConfig,
        roots: &dyn RootProvider,
    ) -> usize {
        self.collect(heap, handles, frozen, pages, config, roots)
    }

    /// Runs a collection only if the installed [`CollectCondition`] says
    /// current page occupancy warrants it. Meant to be consulted from an
    /// allocation fast path rather than called unconditionally. Returns
    /// `None` if no collection ran (either the condition declined, or one
    /// was already in progress).
    pub fn maybe_collect(
        &self,
        heap: &Heap,
        handles: &HandleTable,
        frozen: &FrozenSegments,
        pages: &PageAllocator,
        config: &CoreConfig,
        roots: &dyn RootProvider,
    ) -> Option<usize> {
        if self.is_collecting() {
            return None;
        }
        let info = CollectInfo::new(pages.free_pages(), pages.total_pages());
        let condition = self.condition.lock(|c| *c);
        if condition(&info) {
            Some(self.collect(heap, handles, frozen, pages, config, roots))
        } else {
            None
        }
    }

    /// Runs one full mark-and-sweep collection. The caller must already
    /// hold exclusive access to the managed region (interrupts masked on
    /// the initiating CPU). Returns the number of objects reclaimed.
    pub fn collect(
        &self,
        heap: &Heap,
        handles: &HandleTable,
        frozen: &FrozenSegments,
        pages: &PageAllocator,
        config: &CoreConfig,
        roots: &dyn RootProvider,
    ) -> usize {
        #[cfg(feature = "diagnostics")]
        tracing::debug!("collection_start");

        self.in_collect.store(true, Ordering::Release);
        self.mark_phase(heap, handles, frozen, pages, config, roots);
        let freed = heap.sweep();
        self.in_collect.store(false, Ordering::Release);

        self.metrics.record(freed);

        #[cfg(feature = "diagnostics")]
        tracing::debug!(objects_freed = freed, "collection_end");

        freed
    }

    fn mark_phase(
        &self,
        heap: &Heap,
        handles: &HandleTable,
        frozen: &FrozenSegments,
        pages: &PageAllocator,
        config: &CoreConfig,
        roots: &dyn RootProvider,
    ) {
        let mut push = |candidate: usize| {
            if frozen.contains(candidate) {
                return;
            }
            if let Some(obj) = heap.object_at(candidate) {
                self.mark_stack.push(pages, config, obj.as_ptr() as usize);
            }
        };

        roots.for_each_thread(&mut |registers, (stack_base, stack_top)| {
            for &reg in registers {
                push(reg);
            }
            scan_region_conservatively(stack_top, stack_base, &mut push);
        });

        roots.for_each_static_region(&mut |region: StaticRegion| {
            if region.relative_pointers {
                let mut addr = region.start;
                while addr + 4 <= region.start + region.len {
                    // SAFETY: the host kernel guarantees `region` is valid,
                    // readable memory for its declared length.
                    let rel = unsafe { (addr as *const i32).read_unaligned() };
                    // Low bit marks the entry "uninitialised"; the compiler
                    // hasn't filled it in yet, so it isn't a pointer at all.
                    if rel & 1 == 0 && rel != 0 {
                        let target = (addr as isize + rel as isize) as usize;
                        push(target);
                    }
                    addr += 4;
                }
            } else {
                let mut addr = region.start;
                while addr + core::mem::size_of::<usize>() <= region.start + region.len {
                    // SAFETY: see above.
                    let candidate = unsafe { core::ptr::read_volatile(addr as *const usize) };
                    if candidate & 1 == 0 {
                        push(candidate);
                    }
                    addr += core::mem::size_of::<usize>();
                }
            }
        });

        handles.for_each_root(|obj, _kind| {
            if !heap.is_marked(obj) {
                self.mark_stack.push(pages, config, obj.as_ptr() as usize);
            }
        });

        while let Some(addr) = self.mark_stack.pop() {
            let Some(obj) = NonNull::new(addr as *mut u8) else {
                continue;
            };
            if heap.is_marked(obj) {
                continue;
            }
            heap.mark(obj);
            let Some(mt) = heap.method_table_of(obj) else {
                continue;
            };
            // SAFETY: method tables are immutable frozen descriptors.
            let mt_ref = unsafe { mt.as_ref() };
            // SAFETY: `obj` is a live, fully initialized instance of
            // `mt_ref`, guaranteed by the allocator that produced it.
            unsafe {
                enumerate_references(obj.as_ptr(), mt_ref, |raw_ref| push(raw_ref));
            }
        }
    }
}

impl Default for Collector {
    fn default() -> Self {
        Self::new()
    }
}

/// Scans `[start, end)` for pointer-aligned, pointer-sized words whose
/// value might be a managed reference, calling `push` with each candidate
/// word's value. Used both for thread-stack roots and, here, for static
/// regions that use the direct-pointer representation.
pub fn scan_region_conservatively(start: usize, end: usize, push: &mut dyn FnMut(usize)) {
    let align = core::mem::align_of::<usize>();
    let mut addr = (start + align - 1) & !(align - 1);
    while addr + core::mem::size_of::<usize>() <= end {
        // SAFETY: caller-provided range is valid, readable memory; this
        // module is only ever called with stack or static-region bounds
        // supplied by the host kernel's `RootProvider`.
        let candidate = unsafe { core::ptr::read_volatile(addr as *const usize) };
        push(candidate);
        addr += core::mem::size_of::<usize>();
    }
}
