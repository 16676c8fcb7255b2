//! Boot-time tunables.
//!
//! One [`CoreConfig`] is built once, early in boot, and stored in
//! [`GLOBAL_CONFIG`]. Everything below it is a named constant instead of a
//! magic number scattered through the allocator and collector.

use once_cell::unsync::OnceCell;

use crate::sync::IrqLock;

/// Size of a page in bytes. Fixed by the architecture's MMU granularity;
/// kept as a named constant rather than inlined everywhere.
pub const PAGE_SIZE: usize = 4096;

/// Largest object size routed to the small-object heap. Matches the
/// historical `mMaxItemSize` tunable.
pub const DEFAULT_MAX_SMALL_ITEM_SIZE: usize = 2048;

/// Default fixed capacity of the handle table.
pub const DEFAULT_HANDLE_TABLE_CAPACITY: usize = 1024;

/// Default initial capacity (in entries) of the mark stack.
pub const DEFAULT_MARK_STACK_CAPACITY: usize = 256;

/// Growth factor applied to the mark stack when it fills up.
pub const MARK_STACK_GROWTH_FACTOR: usize = 2;

/// Hard cap on frames walked by the exception dispatcher before it gives
/// up and treats the exception as unhandled.
pub const MAX_STACK_FRAMES: usize = 64;

/// Smallest address the exception dispatcher will accept as a return
/// address while unwinding. Real code never starts in the zero page;
/// anything below this is a corrupt CFI table or a stack that bottomed
/// out, not a real caller.
pub const RETURN_ADDRESS_SANITY_THRESHOLD: usize = PAGE_SIZE;

/// Boot-time tunables for every subsystem in this crate.
#[derive(Debug, Clone, Copy)]
pub struct CoreConfig {
    /// Page size in bytes. Always [`PAGE_SIZE`] on real hardware; kept
    /// configurable so tests can shrink it.
    pub page_size: usize,
    /// Largest allocation routed to the small-object heap.
    pub max_small_item_size: usize,
    /// Fixed capacity of the handle table.
    pub handle_table_capacity: usize,
    /// Initial capacity of the mark stack, in entries.
    pub mark_stack_initial_capacity: usize,
    /// Growth factor applied when the mark stack fills up.
    pub mark_stack_growth_factor: usize,
    /// Maximum number of frames the exception dispatcher will walk.
    pub max_stack_frames: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            page_size: PAGE_SIZE,
            max_small_item_size: DEFAULT_MAX_SMALL_ITEM_SIZE,
            handle_table_capacity: DEFAULT_HANDLE_TABLE_CAPACITY,
            mark_stack_initial_capacity: DEFAULT_MARK_STACK_CAPACITY,
            mark_stack_growth_factor: MARK_STACK_GROWTH_FACTOR,
            max_stack_frames: MAX_STACK_FRAMES,
        }
    }
}

struct ConfigCell(OnceCell<CoreConfig>);

// SAFETY: all mutation happens through `GLOBAL_CONFIG`'s `IrqLock`, which
// serialises access on the single core this runtime targets.
unsafe impl Sync for ConfigCell {}

static GLOBAL_CONFIG: IrqLock<ConfigCell> = IrqLock::new(ConfigCell(OnceCell::new()));

/// Installs the boot-time configuration. Idempotent: a second call is a
/// no-op and returns `false`.
pub fn install(config: CoreConfig) -> bool {
    GLOBAL_CONFIG.lock(|cell| cell.0.set(config).is_ok())
}

/// Returns the installed configuration, or the default if none has been
/// installed yet (the case for every test in this crate).
#[must_use]
pub fn get() -> CoreConfig {
    GLOBAL_CONFIG.lock(|cell| *cell.0.get_or_init(CoreConfig::default))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_named_constants() {
        let cfg = CoreConfig::default();
        assert_eq!(cfg.page_size, PAGE_SIZE);
        assert_eq!(cfg.max_stack_frames, MAX_STACK_FRAMES);
    }
}
