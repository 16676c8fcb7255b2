//! Two-pass DWARF-based exception unwinding.
//!
//! This mirrors the Itanium C++ ABI's split between a *search* phase
//! (walk frames outward looking for a handler, without running any
//! cleanup) and a *cleanup* phase (walk the same frames again, this time
//! actually transferring control into catch/finally funclets). The
//! managed-AOT compiler emits a bespoke, compact variant of the usual
//! LSDA clause table rather than the generic Itanium one, so [`lsda`]
//! parses that format directly instead of reusing a generic C++
//! exception-table reader.
//!
//! Submodules:
//! - [`leb128`]: ULEB128/SLEB128 primitives shared by [`eh_frame`] and
//!   [`lsda`].
//! - [`eh_frame`]: CIE/FDE lookup by program counter.
//! - [`cfi`]: Call Frame Information opcode interpreter, producing the
//!   register-restore rules needed to unwind one frame.
//! - [`lsda`]: per-function clause table (try ranges, catch types,
//!   filter/fault funclets).
//! - [`register_display`]: architecture-specific view over a frame's
//!   saved registers.
//! - [`dispatch`]: ties the above into the two-pass dispatcher.

pub mod cfi;
pub mod dispatch;
pub mod eh_frame;
pub mod leb128;
pub mod lsda;
pub mod register_display;

pub use cfi::{unwind_table_at, CfaRule, RegisterRule, UnwindTable};
pub use dispatch::{Dispatcher, ExceptionInfo, FilterOutcome, FuncletOutcome, FuncletTable};
pub use eh_frame::{Cie, Fde, EhFrameIndex};
pub use lsda::{ClauseKind, FunctionClauses};
pub use register_display::RegisterDisplay;
