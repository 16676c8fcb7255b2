//! Collection statistics, read-only except for the collector itself.

use crate::sync::IrqLock;

/// What kind of collection last ran. This runtime only ever performs full
/// collections, but the type is kept distinct from a bare `bool` so a
/// richer collector could extend it without an API break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum CollectionKind {
    #[default]
    None,
    Full,
}

/// Snapshot of the collector's running statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct GcMetrics {
    pub last_kind: CollectionKind,
    pub last_objects_freed: usize,
    pub total_collections: u64,
    pub total_objects_freed: u64,
}

pub(super) struct MetricsCell(IrqLock<GcMetrics>);

impl MetricsCell {
    pub const fn new() -> Self {
        Self(IrqLock::new(GcMetrics {
            last_kind: CollectionKind::None,
            last_objects_freed: 0,
            total_collections: 0,
            total_objects_freed: 0,
        }))
    }

    pub fn get(&self) -> GcMetrics {
        self.0.lock(|m| *m)
    }

    pub fn record(&self, freed: usize) {
        self.0.lock(|m| {
            m.last_kind = CollectionKind::Full;
            m.last_objects_freed = freed;
            m.total_collections += 1;
            m.total_objects_freed += freed as u64;
        });
    }
}
