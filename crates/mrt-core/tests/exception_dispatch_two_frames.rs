//! An exception thrown in an inner function with no local handler must be
//! discovered in the outer function's `Typed` clause, after genuinely
//! unwinding one frame via the CFI-derived CFA and return address.
//!
//! Builds register display state via [`RegisterDisplay::set_location`],
//! which only exists on x86_64 (aarch64's display stores resolved values
//! rather than spill addresses).
#![cfg(target_arch = "x86_64")]

use core::cell::RefCell;

use mrt_core::unwind::dispatch::{Dispatcher, ExceptionInfo, FilterOutcome, FuncletOutcome, FuncletTable};
use mrt_core::unwind::eh_frame::EhFrameIndex;
use mrt_core::unwind::register_display::{RegisterDisplay, RETURN_ADDRESS_REGISTER};

const CFA_REGISTER: u8 = 7; // rsp

fn push_uleb(buf: &mut std::vec::Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            break;
        }
        buf.push(byte | 0x80);
    }
}

/// Builds a root unwind block (no funclet header, no associated data,
/// has EH-info) whose EH-info holds one `Typed` clause covering
/// `[0, 64)` with `handler_offset`. Returns the bytes and the resolved
/// `type_token` (the type RVA is a fixed small offset from its own
/// field, the only range the wire format's 4-byte relative form can
/// address).
fn typed_clause_table(handler_offset: u32) -> (std::vec::Vec<u8>, u64) {
    let mut buf = std::vec::Vec::new();
    buf.push(0x04); // root, no associated data, has EH-info
    let rel_field = buf.len();
    buf.extend_from_slice(&0i32.to_ne_bytes()); // relative offset to EH-info, patched below

    let eh_info_field = buf.len();
    push_uleb(&mut buf, 1); // clause count
    push_uleb(&mut buf, 0); // try_start
    push_uleb(&mut buf, 64 << 2); // (try_end_delta << 2) | Typed(0)
    push_uleb(&mut buf, u64::from(handler_offset));
    let type_rva_field = buf.len();
    buf.extend_from_slice(&0i32.to_ne_bytes()); // type RVA, patched below

    let base = buf.as_ptr() as usize;
    let eh_info_rel = (base + eh_info_field) as i64 - (base + rel_field) as i64;
    buf[rel_field..rel_field + 4].copy_from_slice(&(eh_info_rel as i32).to_ne_bytes());

    const TYPE_OFFSET: i32 = 0x10;
    buf[type_rva_field..type_rva_field + 4].copy_from_slice(&TYPE_OFFSET.to_ne_bytes());
    let type_token = (base + type_rva_field) as u64 + TYPE_OFFSET as u64;

    (buf, type_token)
}

/// Builds one `.eh_frame` image holding a single CIE (establishing
/// `def_cfa rsp, 8`) and two FDEs: `inner` with no LSDA, `outer` with
/// `lsda` as its clause table.
fn build_two_frame_eh_frame(lsda: &[u8]) -> (std::vec::Vec<u8>, usize, usize) {
    let mut buf = std::vec::Vec::new();

    let cie_start = buf.len();
    let cie_length_field = buf.len();
    buf.extend_from_slice(&0u32.to_ne_bytes()); // length placeholder
    buf.extend_from_slice(&0u32.to_ne_bytes()); // CIE id
    buf.push(1); // version
    buf.push(0); // augmentation string terminator
    buf.push(0x01); // code_alignment_factor = 1
    buf.push(0x78); // data_alignment_factor = -8
    buf.push(0x10); // return_address_register = 16
    buf.push(0x0c); // DW_CFA_def_cfa
    buf.push(CFA_REGISTER);
    buf.push(8);
    let cie_content_len = (buf.len() - cie_length_field - 4) as u32;
    buf[cie_length_field..cie_length_field + 4].copy_from_slice(&cie_content_len.to_ne_bytes());

    let inner_record_start = buf.len();
    let inner_length_field = buf.len();
    buf.extend_from_slice(&0u32.to_ne_bytes()); // length placeholder
    let inner_cie_pointer_field = buf.len();
    buf.extend_from_slice(&0u32.to_ne_bytes()); // cie_pointer placeholder
    let inner_pc_begin_field = buf.len();
    buf.extend_from_slice(&0i32.to_ne_bytes()); // pc_begin placeholder
    buf.extend_from_slice(&64u32.to_ne_bytes()); // pc_range
    buf.push(0); // augmentation length: no LSDA
    let inner_content_len = (buf.len() - inner_length_field - 4) as u32;
    buf[inner_length_field..inner_length_field + 4].copy_from_slice(&inner_content_len.to_ne_bytes());

    let outer_record_start = buf.len();
    let outer_length_field = buf.len();
    buf.extend_from_slice(&0u32.to_ne_bytes()); // length placeholder
    let outer_cie_pointer_field = buf.len();
    buf.extend_from_slice(&0u32.to_ne_bytes()); // cie_pointer placeholder
    let outer_pc_begin_field = buf.len();
    buf.extend_from_slice(&0i32.to_ne_bytes()); // pc_begin placeholder
    buf.extend_from_slice(&64u32.to_ne_bytes()); // pc_range
    buf.push(4); // augmentation length: one sdata4 LSDA pointer
    let outer_lsda_field = buf.len();
    buf.extend_from_slice(&0i32.to_ne_bytes()); // LSDA pointer placeholder
    let outer_content_len = (buf.len() - outer_length_field - 4) as u32;
    buf[outer_length_field..outer_length_field + 4].copy_from_slice(&outer_content_len.to_ne_bytes());

    let base = buf.as_ptr() as usize;

    let inner_cie_ptr_addr = base + inner_cie_pointer_field;
    let inner_cie_pointer = (inner_cie_ptr_addr - (base + cie_start)) as u32;
    buf[inner_cie_pointer_field..inner_cie_pointer_field + 4].copy_from_slice(&inner_cie_pointer.to_ne_bytes());

    let outer_cie_ptr_addr = base + outer_cie_pointer_field;
    let outer_cie_pointer = (outer_cie_ptr_addr - (base + cie_start)) as u32;
    buf[outer_cie_pointer_field..outer_cie_pointer_field + 4].copy_from_slice(&outer_cie_pointer.to_ne_bytes());

    let pc_begin_inner = base + 0x2000;
    let inner_field_addr = base + inner_pc_begin_field;
    let inner_rel = (pc_begin_inner as i64 - inner_field_addr as i64) as i32;
    buf[inner_pc_begin_field..inner_pc_begin_field + 4].copy_from_slice(&inner_rel.to_ne_bytes());

    let pc_begin_outer = base + 0x1000;
    let outer_field_addr = base + outer_pc_begin_field;
    let outer_rel = (pc_begin_outer as i64 - outer_field_addr as i64) as i32;
    buf[outer_pc_begin_field..outer_pc_begin_field + 4].copy_from_slice(&outer_rel.to_ne_bytes());

    let lsda_addr = lsda.as_ptr() as usize;
    let lsda_field_addr = base + outer_lsda_field;
    let lsda_rel = (lsda_addr as i64 - lsda_field_addr as i64) as i32;
    buf[outer_lsda_field..outer_lsda_field + 4].copy_from_slice(&lsda_rel.to_ne_bytes());

    let _ = (inner_record_start, outer_record_start);
    (buf, pc_begin_inner, pc_begin_outer)
}

struct RecordingFuncletTable {
    catch_calls: RefCell<std::vec::Vec<(usize, u32)>>,
}

impl FuncletTable for RecordingFuncletTable {
    unsafe fn call_filter_funclet(
        &self,
        _function_base: usize,
        _filter_offset: u32,
        _exception: &ExceptionInfo,
    ) -> FilterOutcome {
        FilterOutcome::Skip
    }

    unsafe fn call_catch_funclet(
        &self,
        function_base: usize,
        handler_offset: u32,
        _display: &RegisterDisplay,
        _exception: &ExceptionInfo,
    ) {
        self.catch_calls.borrow_mut().push((function_base, handler_offset));
    }
}

#[test]
fn dispatch_unwinds_from_inner_throw_to_outer_handler() {
    let (clause_table, type_token) = typed_clause_table(0x55);
    let (buf, pc_begin_inner, pc_begin_outer) = build_two_frame_eh_frame(&clause_table);
    let index = EhFrameIndex::new(buf.as_ptr() as usize, buf.as_ptr() as usize + buf.len());
    let funclets = RecordingFuncletTable { catch_calls: RefCell::new(std::vec::Vec::new()) };
    let dispatcher = Dispatcher::new(&index, &funclets);

    // The inner frame's return address lands 10 bytes into the outer
    // function, inside its try range; the CFA register's value is
    // unconstrained here since stepping never needs to dereference it to
    // reach a clause match.
    let return_address: usize = pc_begin_outer + 10;
    let cfa_base: usize = 0x7000_0000;

    let mut display = RegisterDisplay::empty();
    display.set_location(CFA_REGISTER, core::ptr::addr_of!(cfa_base));
    display.set_location(RETURN_ADDRESS_REGISTER, core::ptr::addr_of!(return_address));

    let exception = ExceptionInfo { type_token };
    let outcome = dispatcher.dispatch(pc_begin_inner + 1, display, &exception);

    assert_eq!(outcome, FuncletOutcome::Handled);
    assert_eq!(funclets.catch_calls.borrow().as_slice(), &[(pc_begin_outer, 0x55)]);
}
