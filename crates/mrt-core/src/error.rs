//! Error taxonomy for construction-time failures.
//!
//! Steady-state hot paths keep the shapes the runtime design calls for:
//! allocation returns `Option<NonNull<u8>>`, the collector returns a plain
//! `usize`, and the dispatcher never returns at all on its halting paths.
//! Only bootstrap APIs that a host kernel calls once, and can meaningfully
//! react to, return [`CoreError`].

use snafu::Snafu;

/// Errors raised while bootstrapping a subsystem. Never returned from a
/// hot path.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CoreError {
    /// The region handed to the page allocator cannot hold even the RAT
    /// that describes it plus one usable page.
    #[snafu(display(
        "managed region of {region_len} bytes is too small to host a RAT ({rat_bytes} bytes) and any usable page"
    ))]
    RegionTooSmall { region_len: usize, rat_bytes: usize },

    /// The region base address is not page-aligned.
    #[snafu(display("region base {base:#x} is not aligned to the page size ({page_size})"))]
    MisalignedBase { base: usize, page_size: usize },

    /// A frozen segment was registered after the registry's fixed backing
    /// storage was exhausted.
    #[snafu(display("frozen-segment registry has no capacity for a new entry (capacity {capacity})"))]
    SegmentCapacity { capacity: usize },

    /// A handle table was asked for more capacity than its backing page
    /// run can provide.
    #[snafu(display("handle table capacity {requested} exceeds backing storage of {available} slots"))]
    HandleTableCapacity { requested: usize, available: usize },
}
