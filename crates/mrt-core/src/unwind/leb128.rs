//! Minimal ULEB128/SLEB128 decoding, used by the CIE/FDE and LSDA parsers.
//!
//! Hand-rolled rather than pulled from a generic DWARF crate: the format
//! this runtime's LSDA uses is a narrow, bespoke subset (see
//! [`crate::unwind::lsda`]), and a full-blown DWARF expression evaluator
//! would bring far more surface than these two decoders need.

/// Reads a ULEB128 value starting at `*cursor`, advancing `cursor` past it.
///
/// # Safety
/// `*cursor` must point into a buffer with enough trailing bytes to
/// terminate the encoding (a byte with its high bit clear).
pub unsafe fn read_uleb128(cursor: &mut *const u8) -> u64 {
    let mut result: u64 = 0;
    let mut shift = 0u32;
    loop {
        // SAFETY: caller guarantees the buffer terminates before running
        // out of room.
        let byte = unsafe { **cursor };
        *cursor = unsafe { cursor.add(1) };
        result |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return result;
        }
        shift += 7;
    }
}

/// Reads a SLEB128 value starting at `*cursor`, advancing `cursor` past it.
///
/// # Safety
/// Same contract as [`read_uleb128`].
pub unsafe fn read_sleb128(cursor: &mut *const u8) -> i64 {
    let mut result: i64 = 0;
    let mut shift = 0u32;
    let mut byte;
    loop {
        // SAFETY: see `read_uleb128`.
        byte = unsafe { **cursor };
        *cursor = unsafe { cursor.add(1) };
        result |= i64::from(byte & 0x7F) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            break;
        }
    }
    if shift < i64::BITS && byte & 0x40 != 0 {
        result |= -(1i64 << shift);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uleb128_roundtrip_small_values() {
        let buf = [0x02u8];
        let mut cursor = buf.as_ptr();
        assert_eq!(unsafe { read_uleb128(&mut cursor) }, 2);
    }

    #[test]
    fn uleb128_multi_byte() {
        // 624485 = 0x98765 -> LEB128: e5 8e 26
        let buf = [0xE5u8, 0x8E, 0x26];
        let mut cursor = buf.as_ptr();
        assert_eq!(unsafe { read_uleb128(&mut cursor) }, 624_485);
    }

    #[test]
    fn sleb128_negative_value() {
        // -2 -> LEB128: 0x7e
        let buf = [0x7Eu8];
        let mut cursor = buf.as_ptr();
        assert_eq!(unsafe { read_sleb128(&mut cursor) }, -2);
    }
}
