//! Raw memory intrinsics used throughout the allocator and collector.
//!
//! These exist so every byte-moving operation in this crate goes through
//! one audited implementation instead of ad hoc loops, and so `memmove`'s
//! overlap handling lives in exactly one place.

/// Fills `dest[0..n]` with `value`.
///
/// # Safety
/// `dest` must be valid for writes of `n` bytes.
pub unsafe fn mrt_memset(dest: *mut u8, value: u8, n: usize) {
    // SAFETY: caller guarantees `dest` is valid for `n` bytes.
    unsafe {
        core::ptr::write_bytes(dest, value, n);
    }
}

/// Copies `n` bytes from `src` to `dest`. The ranges must not overlap; use
/// [`mrt_memmove`] when they might.
///
/// # Safety
/// `dest` and `src` must each be valid for `n` bytes and must not overlap.
pub unsafe fn mrt_memcpy(dest: *mut u8, src: *const u8, n: usize) {
    // SAFETY: caller guarantees non-overlapping, valid ranges.
    unsafe {
        core::ptr::copy_nonoverlapping(src, dest, n);
    }
}

/// Copies `n` bytes from `src` to `dest`, correct even when the ranges
/// overlap: copies forward when `dest < src` (or `dest >= src + n`, i.e.
/// no overlap), backward otherwise.
///
/// # Safety
/// `dest` and `src` must each be valid for `n` bytes.
pub unsafe fn mrt_memmove(dest: *mut u8, src: *const u8, n: usize) {
    if n == 0 {
        return;
    }
    let d = dest as usize;
    let s = src as usize;
    if d < s || d >= s + n {
        // SAFETY: no overlap in the forward direction (or no overlap at
        // all), so a plain forward byte copy is correct.
        for i in 0..n {
            unsafe {
                *dest.add(i) = *src.add(i);
            }
        }
    } else {
        // SAFETY: overlapping with `dest > src`; copying back-to-front
        // ensures every source byte is read before it is overwritten.
        for i in (0..n).rev() {
            unsafe {
                *dest.add(i) = *src.add(i);
            }
        }
    }
}

/// Lexicographic byte comparison of `a` and `b`, returning `<0`, `0`, or
/// `>0` like C's `memcmp`.
///
/// # Safety
/// `a` and `b` must each be valid for reads of `n` bytes.
pub unsafe fn mrt_memcmp(a: *const u8, b: *const u8, n: usize) -> i32 {
    for i in 0..n {
        // SAFETY: caller guarantees both ranges are valid for `n` bytes.
        let (av, bv) = unsafe { (*a.add(i), *b.add(i)) };
        if av != bv {
            return i32::from(av) - i32::from(bv);
        }
    }
    0
}
