//! The managed object model: method tables, GC descriptors, and the mark
//! bit carried in every object's method-table pointer.
//!
//! Managed objects here are not Rust values — they are laid out by an
//! ahead-of-time compiler for foreign managed code, so there is no `Trace`
//! trait to dispatch through. A type's reference layout is data: a series
//! table stored immediately before its [`MethodTable`] in the image, read
//! generically by [`enumerate_references`].

use bitflags::bitflags;
use core::mem::size_of;
use core::ptr::NonNull;

bitflags! {
    /// Flag bits carried on every [`MethodTable`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethodTableFlags: u32 {
        /// Type has a variable-length component (string, array).
        const HAS_COMPONENT_SIZE   = 1 << 0;
        /// Instances of this type may hold references that the collector
        /// must trace.
        const CONTAINS_GC_POINTERS = 1 << 1;
        const IS_INTERFACE         = 1 << 2;
        const IS_VALUE_TYPE        = 1 << 3;
        const IS_NULLABLE          = 1 << 4;
        const HAS_GENERIC_VARIANCE = 1 << 5;
        const IS_ARRAY             = 1 << 6;
        const IS_GENERIC           = 1 << 7;
    }
}

/// An immutable, frozen-storage type descriptor.
///
/// Method tables are never allocated on the managed heap and are never
/// swept; they live in the code/rodata image or a frozen segment.
#[repr(C)]
#[derive(Debug)]
pub struct MethodTable {
    /// Size of a fixed-size instance, or the size of an array/string with
    /// zero elements.
    pub base_size: u32,
    /// Size of one element, for types with [`MethodTableFlags::HAS_COMPONENT_SIZE`].
    pub component_size: u32,
    pub flags: MethodTableFlags,
    /// Element type, for array/string-shaped types.
    pub related_parameter_type: Option<NonNull<MethodTable>>,
    pub base_type: Option<NonNull<MethodTable>>,
}

/// One reference-series record: `size_delta` plus the live object size
/// gives the byte length of the series; `start_offset` is relative to the
/// object's first byte.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct GcDescSeries {
    pub size_delta: isize,
    pub start_offset: isize,
}

/// One value-type-array series item: `num_pointers` consecutive reference
/// slots followed by `skip` bytes of non-reference payload, applied once
/// per array element.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct GcDescValueItem {
    pub num_pointers: u32,
    pub skip: u32,
}

/// The decoded form of a method table's trailing GC descriptor.
pub enum GcDesc<'a> {
    /// Type carries no references; descriptor is absent.
    None,
    /// Ordinary object or reference array.
    ReferenceSeries(&'a [GcDescSeries]),
    /// Value-type array with embedded references.
    ValueSeries(&'a [GcDescValueItem]),
}

impl MethodTable {
    /// Reads the GC descriptor stored immediately before this method
    /// table in memory.
    ///
    /// # Safety
    /// `self` must be a method table whose preceding bytes were laid out
    /// by the series-table convention above (a `NumSeries: isize` word,
    /// preceded by that many series records).
    pub unsafe fn gc_desc(&self) -> GcDesc<'_> {
        let mt_bytes = (self as *const Self).cast::<u8>();
        // SAFETY: caller guarantees a NumSeries word precedes this table.
        let count_ptr = unsafe { mt_bytes.sub(size_of::<isize>()) }.cast::<isize>();
        // SAFETY: see above.
        let count = unsafe { count_ptr.read_unaligned() };
        if count == 0 {
            return GcDesc::None;
        }
        if count > 0 {
            let n = count as usize;
            let bytes = n * size_of::<GcDescSeries>();
            // SAFETY: caller guarantees `n` series records precede the
            // count word.
            let start = unsafe { count_ptr.cast::<u8>().sub(bytes) }.cast::<GcDescSeries>();
            GcDesc::ReferenceSeries(unsafe { core::slice::from_raw_parts(start, n) })
        } else {
            let n = (-count) as usize;
            let bytes = n * size_of::<GcDescValueItem>();
            // SAFETY: see above, for the value-series variant.
            let start = unsafe { count_ptr.cast::<u8>().sub(bytes) }.cast::<GcDescValueItem>();
            GcDesc::ValueSeries(unsafe { core::slice::from_raw_parts(start, n) })
        }
    }
}

/// Total instance size, accounting for the variable-length component if
/// this type has one.
#[must_use]
pub fn object_size(mt: &MethodTable, length: u32) -> usize {
    if mt.flags.contains(MethodTableFlags::HAS_COMPONENT_SIZE) {
        mt.base_size as usize + mt.component_size as usize * length as usize
    } else {
        mt.base_size as usize
    }
}

/// Reads the element count stored just after the method-table pointer, for
/// variable-length types.
///
/// # Safety
/// `obj_start` must point at a live object whose type has
/// [`MethodTableFlags::HAS_COMPONENT_SIZE`] set.
pub unsafe fn array_length(obj_start: *const u8) -> u32 {
    // SAFETY: caller guarantees this slot holds a valid length field.
    unsafe { obj_start.add(size_of::<usize>()).cast::<u32>().read_unaligned() }
}

/// Calls `visit` with every non-null reference embedded in the object
/// starting at `obj_start`, per its method table's GC descriptor.
///
/// # Safety
/// `obj_start` must point at a live, fully-initialized instance of `mt`,
/// with enough trailing bytes for `object_size(mt, length)`.
pub unsafe fn enumerate_references(obj_start: *const u8, mt: &MethodTable, mut visit: impl FnMut(usize)) {
    if !mt.flags.contains(MethodTableFlags::CONTAINS_GC_POINTERS) {
        return;
    }
    let length = if mt.flags.contains(MethodTableFlags::HAS_COMPONENT_SIZE) {
        // SAFETY: type has a component size, so the length field exists.
        unsafe { array_length(obj_start) }
    } else {
        0
    };
    let size = object_size(mt, length);

    // SAFETY: caller guarantees a valid descriptor precedes `mt`.
    match unsafe { mt.gc_desc() } {
        GcDesc::None => {}
        GcDesc::ReferenceSeries(series) => {
            for s in series {
                let Ok(len) = usize::try_from(s.size_delta + size as isize) else {
                    continue;
                };
                // SAFETY: series offsets are defined relative to a live
                // object of the size computed above.
                let start = unsafe { obj_start.offset(s.start_offset) };
                let mut cursor = start as usize;
                let end = start as usize + len;
                while cursor + size_of::<usize>() <= end {
                    // SAFETY: `cursor` is within `[start, end)` which lies
                    // inside the live object per the descriptor contract.
                    let val = unsafe { (cursor as *const usize).read_unaligned() };
                    if val != 0 {
                        visit(val);
                    }
                    cursor += size_of::<usize>();
                }
            }
        }
        GcDesc::ValueSeries(items) => {
            let component_size = mt.component_size as usize;
            if component_size == 0 {
                return;
            }
            let elem_base_root = size as isize - (length as isize) * component_size as isize;
            for index in 0..length as usize {
                let mut cursor = (obj_start as isize + elem_base_root + (index * component_size) as isize) as usize;
                for item in items {
                    for _ in 0..item.num_pointers {
                        // SAFETY: within the element's committed extent
                        // per the descriptor contract.
                        let val = unsafe { (cursor as *const usize).read_unaligned() };
                        if val != 0 {
                            visit(val);
                        }
                        cursor += size_of::<usize>();
                    }
                    cursor += item.skip as usize;
                }
            }
        }
    }
}

/// Returns `true` if the low (mark) bit of a raw method-table-pointer word
/// is set.
#[must_use]
pub const fn is_marked(raw: usize) -> bool {
    raw & 1 != 0
}

/// Sets or clears the mark bit of a raw method-table-pointer word.
#[must_use]
pub const fn with_mark(raw: usize, marked: bool) -> usize {
    if marked {
        raw | 1
    } else {
        raw & !1
    }
}

/// Strips the mark bit, recovering the real method-table address.
#[must_use]
pub const fn strip_mark(raw: usize) -> usize {
    raw & !1
}
