//! The literal worked example for `def_cfa rsp, 8` at entry, then
//! `def_cfa_offset 16` and `offset callee_X, -16` after the prologue.

use mrt_core::unwind::{unwind_table_at, CfaRule, Cie, Fde, RegisterRule};

const RSP: u8 = 7; // DWARF register number for rsp on x86_64.
const CALLEE_X: u8 = 3; // an arbitrary callee-saved register (rbx).

#[test]
fn cfi_reports_cfa_and_callee_saved_slot_after_prologue() {
    // CIE initial instructions: DW_CFA_def_cfa(rsp, 8).
    let cie_program: std::vec::Vec<u8> = vec![0x0c, RSP, 8];

    // FDE instructions: advance 4 code units past the prologue, then
    // DW_CFA_def_cfa_offset(16), then DW_CFA_offset(callee_X, 2) (factored
    // by data_alignment_factor -8, giving an actual offset of -16).
    let fde_program: std::vec::Vec<u8> = vec![0x44, 0x0e, 16, 0x80 | CALLEE_X, 2];

    let cie_base = cie_program.as_ptr() as usize;
    let fde_base = fde_program.as_ptr() as usize;

    let pc_begin = 0x4000_0000usize;
    let cie = Cie {
        code_alignment_factor: 1,
        data_alignment_factor: -8,
        return_address_register: 16,
        initial_instructions: (cie_base, cie_base + cie_program.len()),
    };
    let fde = Fde {
        pc_begin,
        pc_end: pc_begin + 64,
        instructions: (fde_base, fde_base + fde_program.len()),
        lsda: None,
    };

    // Post-prologue PC: exactly where the advance_loc(4) step lands.
    let table = unwind_table_at(&cie, &fde, pc_begin + 4);

    assert_eq!(table.cfa, CfaRule { register: RSP, offset: 16 });
    assert_eq!(table.register(CALLEE_X), RegisterRule::AtCfaOffset(-16));
}
