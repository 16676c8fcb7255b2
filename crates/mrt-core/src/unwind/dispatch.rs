//! Two-pass exception dispatch.
//!
//! Discovery walks frames outward from the throw site, matching each
//! frame's clause table against the in-flight exception without
//! transferring control anywhere except into filter funclets (which are
//! pure predicates, not handlers). The first `Typed` match, or the first
//! `Filter` funclet that answers yes, ends Discovery. Invoke is folded
//! into the same walk here rather than run as a separate pass: once a
//! handler clause is found, its catch funclet is called immediately
//! with the frame display built for that point, instead of re-walking
//! the stack a second time. Real two-pass unwinders separate the passes
//! so cleanup (`Fault`) funclets below the handler run during Invoke;
//! since this runtime doesn't execute `Fault` funclets at all yet (see
//! the `Fault` arm below), there is nothing a second pass would still
//! need to do.

use core::sync::atomic::{AtomicBool, Ordering};

use super::cfi::{unwind_table_at, RegisterRule, UnwindTable};
use super::eh_frame::EhFrameIndex;
use super::lsda::{ClauseKind, FunctionClauses};
use super::register_display::{RegisterDisplay, RETURN_ADDRESS_REGISTER};

const RETURN_ADDRESS_SANITY_THRESHOLD: usize = crate::config::RETURN_ADDRESS_SANITY_THRESHOLD;
const REGISTER_SWEEP_COUNT: usize = 34;

/// Identifies the exception currently being dispatched.
#[derive(Debug, Clone, Copy)]
pub struct ExceptionInfo {
    pub type_token: u64,
}

/// What a `Filter` clause's funclet decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOutcome {
    Handle,
    Skip,
    /// The filter funclet itself faulted. A filter whose own guard code
    /// is broken can't be retried or skipped safely, so this ends
    /// dispatch rather than falling through to the next clause.
    Fatal,
}

/// Host-supplied access to the funclets AOT-compiled for each function.
pub trait FuncletTable {
    /// Invokes the filter funclet at `function_base + filter_offset`.
    ///
    /// # Safety
    /// `function_base + filter_offset` must be the entry point of a
    /// filter funclet the compiler generated for this exact function and
    /// clause.
    unsafe fn call_filter_funclet(
        &self,
        function_base: usize,
        filter_offset: u32,
        exception: &ExceptionInfo,
    ) -> FilterOutcome;

    /// Transfers control into the catch funclet at
    /// `function_base + handler_offset`, resuming execution there with
    /// `display` describing the frame's restored registers. A correct
    /// host implementation does not return from this call; the return
    /// type exists only so test doubles can record the call instead of
    /// actually transferring control.
    ///
    /// # Safety
    /// Same contract as `call_filter_funclet`, plus `display` must
    /// describe a frame state valid for resuming execution at the
    /// handler.
    unsafe fn call_catch_funclet(
        &self,
        function_base: usize,
        handler_offset: u32,
        display: &RegisterDisplay,
        exception: &ExceptionInfo,
    );
}

/// How dispatch for one exception ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuncletOutcome {
    /// A catch funclet was invoked.
    Handled,
    /// Walked off the top of the managed call stack without a match.
    Unhandled,
    /// [`crate::config::CoreConfig::max_stack_frames`] were walked without
    /// resolving the exception.
    FrameLimitExceeded,
    /// A `Filter` clause's funclet faulted.
    FilterFaulted,
    /// `dispatch` was re-entered while already running on this CPU.
    Reentrant,
}

static DISPATCH_IN_PROGRESS: AtomicBool = AtomicBool::new(false);

/// Drives dispatch over one `.eh_frame` index and its funclet table.
pub struct Dispatcher<'a> {
    eh_frame: &'a EhFrameIndex,
    funclets: &'a dyn FuncletTable,
}

impl<'a> Dispatcher<'a> {
    #[must_use]
    pub const fn new(eh_frame: &'a EhFrameIndex, funclets: &'a dyn FuncletTable) -> Self {
        Self { eh_frame, funclets }
    }

    /// Dispatches `exception`, starting the walk at `pc` with `display`
    /// describing the throw site's register values. `display` must have
    /// [`RETURN_ADDRESS_REGISTER`] populated with the throw site's
    /// return address.
    pub fn dispatch(&self, pc: usize, display: RegisterDisplay, exception: &ExceptionInfo) -> FuncletOutcome {
        if DISPATCH_IN_PROGRESS.swap(true, Ordering::AcqRel) {
            return FuncletOutcome::Reentrant;
        }
        let outcome = self.walk(pc, display, exception);
        DISPATCH_IN_PROGRESS.store(false, Ordering::Release);
        outcome
    }

    fn walk(&self, mut pc: usize, mut display: RegisterDisplay, exception: &ExceptionInfo) -> FuncletOutcome {
        // No `CoreConfig` is threaded through `Dispatcher`, so the frame
        // limit comes from whatever the host installed via
        // `crate::config::install` (or the default if nothing has).
        let max_frames = crate::config::get().max_stack_frames;
        for _ in 0..max_frames {
            let Some((cie, fde)) = self.eh_frame.lookup(pc) else {
                return FuncletOutcome::Unhandled;
            };
            let table = unwind_table_at(&cie, &fde, pc);

            if let Some(lsda) = fde.lsda {
                // SAFETY: a non-`None` `fde.lsda` always points at a
                // clause table this runtime's compiler emitted for this
                // exact function.
                let clauses = unsafe { FunctionClauses::new(lsda) };
                let pc_offset = (pc - fde.pc_begin) as u32;
                match self.resolve_clauses(&clauses, pc_offset, fde.pc_begin, exception) {
                    ClauseResolution::Fatal => return FuncletOutcome::FilterFaulted,
                    ClauseResolution::Handler(handler_offset) => {
                        // SAFETY: `handler_offset` and `display` both
                        // describe the frame the clause table was
                        // matched against.
                        unsafe {
                            self.funclets.call_catch_funclet(fde.pc_begin, handler_offset, &display, exception);
                        }
                        return FuncletOutcome::Handled;
                    }
                    ClauseResolution::NoMatch => {}
                }
            }

            let Some(next_pc) = display.get(RETURN_ADDRESS_REGISTER) else {
                return FuncletOutcome::Unhandled;
            };
            if next_pc < RETURN_ADDRESS_SANITY_THRESHOLD {
                return FuncletOutcome::Unhandled;
            }
            let Some(base) = display.get(table.cfa.register) else {
                return FuncletOutcome::Unhandled;
            };
            if base == 0 {
                return FuncletOutcome::Unhandled;
            }
            let cfa = (base as isize + table.cfa.offset as isize) as usize;
            display = step_to_caller(&table, &display, cfa);
            pc = next_pc;
        }
        FuncletOutcome::FrameLimitExceeded
    }

    fn resolve_clauses(
        &self,
        clauses: &FunctionClauses,
        pc_offset: u32,
        function_base: usize,
        exception: &ExceptionInfo,
    ) -> ClauseResolution {
        let mut resolution = ClauseResolution::NoMatch;
        clauses.covering(pc_offset, |clause| {
            if !matches!(resolution, ClauseResolution::NoMatch) {
                return;
            }
            match clause.kind {
                ClauseKind::Typed { type_token, handler_offset } if type_token == exception.type_token => {
                    resolution = ClauseResolution::Handler(handler_offset);
                }
                ClauseKind::Typed { .. } => {}
                ClauseKind::Filter { filter_offset, handler_offset } => {
                    // SAFETY: `filter_offset` came from this function's
                    // own clause table.
                    resolution = match unsafe {
                        self.funclets.call_filter_funclet(function_base, filter_offset, exception)
                    } {
                        FilterOutcome::Handle => ClauseResolution::Handler(handler_offset),
                        FilterOutcome::Skip => ClauseResolution::NoMatch,
                        FilterOutcome::Fatal => ClauseResolution::Fatal,
                    };
                }
                ClauseKind::Fault { .. } => {
                    // TODO: run this cleanup funclet. Needs a genuine
                    // second (Invoke) pass that also revisits frames
                    // below the chosen handler, which this dispatcher
                    // doesn't implement yet.
                }
            }
        });
        resolution
    }
}

enum ClauseResolution {
    NoMatch,
    Handler(u32),
    Fatal,
}

#[cfg(target_arch = "x86_64")]
fn step_to_caller(table: &UnwindTable, current: &RegisterDisplay, cfa: usize) -> RegisterDisplay {
    let mut caller = RegisterDisplay::empty();
    for reg in 0..REGISTER_SWEEP_COUNT {
        match table.register(reg as u8) {
            RegisterRule::Undefined => {}
            RegisterRule::SameValue => {
                if let Some(loc) = current.location(reg as u8) {
                    caller.set_location(reg as u8, loc);
                }
            }
            RegisterRule::AtCfaOffset(offset) => {
                let addr = (cfa as isize + offset as isize) as usize;
                caller.set_location(reg as u8, addr as *const usize);
            }
            RegisterRule::InRegister(other) => {
                if let Some(loc) = current.location(other) {
                    caller.set_location(reg as u8, loc);
                }
            }
        }
    }
    caller
}

#[cfg(target_arch = "aarch64")]
fn step_to_caller(table: &UnwindTable, current: &RegisterDisplay, cfa: usize) -> RegisterDisplay {
    let mut caller = RegisterDisplay::empty();
    for reg in 0..REGISTER_SWEEP_COUNT {
        match table.register(reg as u8) {
            RegisterRule::Undefined => {}
            RegisterRule::SameValue => {
                if let Some(value) = current.get(reg as u8) {
                    caller.set_value(reg as u8, value);
                }
            }
            RegisterRule::AtCfaOffset(offset) => {
                let addr = (cfa as isize + offset as isize) as usize;
                // SAFETY: `addr` is a stack slot in a still-live caller
                // frame; `EhFrameIndex::lookup` returning `None` is what
                // signals the bottom of the managed stack, so the walk
                // never reaches here past it.
                let value = unsafe { (addr as *const usize).read_unaligned() };
                caller.set_value(reg as u8, value);
            }
            RegisterRule::InRegister(other) => {
                if let Some(value) = current.get(other) {
                    caller.set_value(reg as u8, value);
                }
            }
        }
    }
    caller
}
