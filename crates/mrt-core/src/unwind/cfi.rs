//! Call Frame Information opcode interpreter.
//!
//! Replays a CIE's initial instructions followed by an FDE's instructions
//! up to (not past) a target program counter, producing the CFA rule and
//! per-register restore rules in effect at that point. This is the state
//! [`crate::unwind::dispatch`] needs to pop one frame during unwinding.

use super::eh_frame::{Cie, Fde};
use super::leb128::{read_sleb128, read_uleb128};

/// How to recover a callee-saved register's value in the caller's frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegisterRule {
    /// Not saved by this frame; the caller's own value is unknown.
    #[default]
    Undefined,
    /// Unchanged from the caller's frame.
    SameValue,
    /// Stored at `cfa + offset`.
    AtCfaOffset(i64),
    /// Its value is currently held in a different register.
    InRegister(u8),
}

/// Canonical Frame Address rule: `register`'s value plus `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CfaRule {
    pub register: u8,
    pub offset: i64,
}

/// The unwind state (CFA rule plus register-restore rules) in effect at
/// one program counter within a function.
#[derive(Debug, Clone, Copy)]
pub struct UnwindTable {
    pub cfa: CfaRule,
    registers: [RegisterRule; Self::MAX_REGISTERS],
}

impl UnwindTable {
    const MAX_REGISTERS: usize = 34;

    const fn new() -> Self {
        Self {
            cfa: CfaRule { register: 0, offset: 0 },
            registers: [RegisterRule::Undefined; Self::MAX_REGISTERS],
        }
    }

    /// The rule for DWARF register number `reg`, or `Undefined` if out of
    /// the table's tracked range.
    #[must_use]
    pub fn register(&self, reg: u8) -> RegisterRule {
        self.registers
            .get(reg as usize)
            .copied()
            .unwrap_or(RegisterRule::Undefined)
    }

    fn set_register(&mut self, reg: u8, rule: RegisterRule) {
        if let Some(slot) = self.registers.get_mut(reg as usize) {
            *slot = rule;
        }
    }
}

/// Replays `cie`'s initial instructions and then `fde`'s instructions,
/// stopping once the synthesized location would pass `target_pc`.
/// Returns the table as of the last instruction processed.
#[must_use]
pub fn unwind_table_at(cie: &Cie, fde: &Fde, target_pc: usize) -> UnwindTable {
    let mut interp = Interpreter {
        location: fde.pc_begin as u64,
        target: target_pc as u64,
        code_alignment_factor: cie.code_alignment_factor,
        data_alignment_factor: cie.data_alignment_factor,
        table: UnwindTable::new(),
        saved: [None, None, None, None],
        saved_len: 0,
        stop: false,
    };
    // SAFETY: `initial_instructions` bounds are derived from a CIE record
    // already validated by `EhFrameIndex::lookup`.
    unsafe { interp.run(cie.initial_instructions.0, cie.initial_instructions.1) };
    if !interp.stop {
        // SAFETY: `instructions` bounds are derived from an FDE record
        // already validated by `EhFrameIndex::lookup`.
        unsafe { interp.run(fde.instructions.0, fde.instructions.1) };
    }
    interp.table
}

struct Interpreter {
    location: u64,
    target: u64,
    code_alignment_factor: u64,
    data_alignment_factor: i64,
    table: UnwindTable,
    saved: [Option<UnwindTable>; 4],
    saved_len: usize,
    stop: bool,
}

impl Interpreter {
    /// # Safety
    /// `[start, end)` must be a readable byte range containing a valid
    /// CFA instruction stream.
    unsafe fn run(&mut self, start: usize, end: usize) {
        let mut cursor = start as *const u8;
        let end = end as *const u8;
        while (cursor as usize) < (end as usize) && !self.stop {
            // SAFETY: `cursor < end`, caller guarantees the range is
            // readable.
            let opcode = unsafe { *cursor };
            cursor = unsafe { cursor.add(1) };
            let primary = opcode >> 6;
            let operand = opcode & 0x3f;
            match primary {
                0x1 => self.advance_loc(u64::from(operand)),
                0x2 => {
                    // SAFETY: within range, checked by the loop condition
                    // and the instruction stream's own well-formedness.
                    let offset = unsafe { read_uleb128(&mut cursor) } as i64;
                    self.set_offset(operand, offset);
                }
                0x3 => self.restore(operand),
                _ => unsafe { self.run_extended(opcode, &mut cursor, end) },
            }
        }
    }

    /// # Safety
    /// `*cursor` must point into the same readable range passed to `run`.
    unsafe fn run_extended(&mut self, opcode: u8, cursor: &mut *const u8, end: *const u8) {
        match opcode {
            0x00 => {} // nop
            0x01 => {
                // set_loc: address-sized operand.
                // SAFETY: caller contract.
                let addr = unsafe { (*cursor as *const usize).read_unaligned() };
                *cursor = unsafe { cursor.add(core::mem::size_of::<usize>()) };
                self.location = addr as u64;
            }
            0x02 => {
                // SAFETY: caller contract.
                let delta = unsafe { **cursor };
                *cursor = unsafe { cursor.add(1) };
                self.advance_loc(u64::from(delta));
            }
            0x03 => {
                // SAFETY: caller contract.
                let delta = unsafe { (*cursor as *const u16).read_unaligned() };
                *cursor = unsafe { cursor.add(2) };
                self.advance_loc(u64::from(delta));
            }
            0x04 => {
                // SAFETY: caller contract.
                let delta = unsafe { (*cursor as *const u32).read_unaligned() };
                *cursor = unsafe { cursor.add(4) };
                self.advance_loc(u64::from(delta));
            }
            0x05 => {
                // SAFETY: caller contract.
                let reg = unsafe { read_uleb128(cursor) } as u8;
                // SAFETY: caller contract.
                let offset = unsafe { read_uleb128(cursor) } as i64;
                self.set_offset(reg, offset);
            }
            0x06 => {
                // SAFETY: caller contract.
                let reg = unsafe { read_uleb128(cursor) } as u8;
                self.restore(reg);
            }
            0x07 => {
                // SAFETY: caller contract.
                let reg = unsafe { read_uleb128(cursor) } as u8;
                self.table.set_register(reg, RegisterRule::Undefined);
            }
            0x08 => {
                // SAFETY: caller contract.
                let reg = unsafe { read_uleb128(cursor) } as u8;
                self.table.set_register(reg, RegisterRule::SameValue);
            }
            0x09 => {
                // SAFETY: caller contract.
                let reg = unsafe { read_uleb128(cursor) } as u8;
                // SAFETY: caller contract.
                let other = unsafe { read_uleb128(cursor) } as u8;
                self.table.set_register(reg, RegisterRule::InRegister(other));
            }
            0x0a => {
                if self.saved_len < self.saved.len() {
                    self.saved[self.saved_len] = Some(self.table);
                    self.saved_len += 1;
                }
            }
            0x0b => {
                if self.saved_len > 0 {
                    self.saved_len -= 1;
                    if let Some(snapshot) = self.saved[self.saved_len].take() {
                        self.table = snapshot;
                    }
                }
            }
            0x0c => {
                // SAFETY: caller contract.
                let reg = unsafe { read_uleb128(cursor) } as u8;
                // SAFETY: caller contract.
                let offset = unsafe { read_uleb128(cursor) } as i64;
                self.table.cfa = CfaRule { register: reg, offset };
            }
            0x0d => {
                // SAFETY: caller contract.
                let reg = unsafe { read_uleb128(cursor) } as u8;
                self.table.cfa.register = reg;
            }
            0x0e => {
                // SAFETY: caller contract.
                let offset = unsafe { read_uleb128(cursor) } as i64;
                self.table.cfa.offset = offset;
            }
            0x0f | 0x10 | 0x16 => {
                // def_cfa_expression / expression / val_expression: this
                // runtime's compiler never emits DWARF expressions, but
                // skip the operand correctly rather than misparse the
                // rest of the stream.
                if opcode == 0x10 || opcode == 0x16 {
                    // SAFETY: caller contract.
                    unsafe { read_uleb128(cursor) };
                }
                // SAFETY: caller contract.
                let len = unsafe { read_uleb128(cursor) } as usize;
                *cursor = unsafe { cursor.add(len) };
            }
            0x11 => {
                // SAFETY: caller contract.
                let reg = unsafe { read_uleb128(cursor) } as u8;
                // SAFETY: caller contract.
                let offset = unsafe { read_sleb128(cursor) };
                self.set_offset(reg, offset);
            }
            0x12 => {
                // SAFETY: caller contract.
                let reg = unsafe { read_uleb128(cursor) } as u8;
                // SAFETY: caller contract.
                let offset = unsafe { read_sleb128(cursor) };
                self.table.cfa = CfaRule { register: reg, offset };
            }
            0x13 => {
                // SAFETY: caller contract.
                let offset = unsafe { read_sleb128(cursor) };
                self.table.cfa.offset = offset;
            }
            0x14 | 0x15 => {
                // val_offset / val_offset_sf: this runtime's CFI never
                // emits these (no by-value frame-base locals to unwind),
                // consumed for stream well-formedness only.
                // SAFETY: caller contract.
                unsafe { read_uleb128(cursor) };
                if opcode == 0x14 {
                    // SAFETY: caller contract.
                    unsafe { read_uleb128(cursor) };
                } else {
                    // SAFETY: caller contract.
                    unsafe { read_sleb128(cursor) };
                }
            }
            0x2e => {
                // GNU_args_size: informational only for call-site cleanup.
                // SAFETY: caller contract.
                unsafe { read_uleb128(cursor) };
            }
            _ => {
                // Unknown opcode: nothing safe to do but stop, since we
                // don't know its operand length.
                self.stop = true;
            }
        }
        let _ = end;
    }

    fn advance_loc(&mut self, delta: u64) {
        let new_location = self.location + delta * self.code_alignment_factor;
        if new_location > self.target {
            self.stop = true;
            return;
        }
        self.location = new_location;
    }

    fn set_offset(&mut self, reg: u8, factored_offset: i64) {
        let offset = factored_offset * self.data_alignment_factor;
        self.table.set_register(reg, RegisterRule::AtCfaOffset(offset));
    }

    fn restore(&mut self, reg: u8) {
        self.table.set_register(reg, RegisterRule::Undefined);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unwind::eh_frame::EhFrameIndex;
    use crate::unwind::test_support::{baseline_cfi_program, build_eh_frame};

    #[test]
    fn def_cfa_and_offset_are_visible_after_target_pc() {
        let (mut buf, pc_begin, _pc_range) = build_eh_frame();
        // Append the baseline CFI program to the CIE's initial
        // instructions by rebuilding with a longer CIE length field.
        // Simpler: interpret directly against a synthetic CIE/FDE pair
        // whose instruction ranges point at a standalone buffer.
        let _ = &mut buf;
        let program = baseline_cfi_program(16);
        let base = program.as_ptr() as usize;
        let cie = Cie {
            code_alignment_factor: 1,
            data_alignment_factor: -8,
            return_address_register: 16,
            initial_instructions: (base, base + program.len()),
        };
        let fde = Fde {
            pc_begin,
            pc_end: pc_begin + 64,
            instructions: (base + program.len(), base + program.len()),
            lsda: None,
        };
        let table = unwind_table_at(&cie, &fde, pc_begin + 1);
        assert_eq!(table.cfa, CfaRule { register: 6, offset: 16 });
        assert_eq!(table.register(16), RegisterRule::AtCfaOffset(-16));
    }

    #[test]
    fn eh_frame_lookup_round_trips_into_cfi() {
        let (buf, pc_begin, _) = build_eh_frame();
        let base = buf.as_ptr() as usize;
        let index = EhFrameIndex::new(base, base + buf.len());
        let (cie, fde) = index.lookup(pc_begin + 1).unwrap();
        // No CFI instructions in this fixture; the table should just
        // reflect the implicit default state.
        let table = unwind_table_at(&cie, &fde, pc_begin + 1);
        assert_eq!(table.register(0), RegisterRule::Undefined);
    }
}
