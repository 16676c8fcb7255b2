//! Architecture-specific view over a frame's saved registers.
//!
//! x86_64 and aarch64 disagree on what the unwinder has in hand once it's
//! evaluated a CFI table: on x86_64 a `RegisterRule::AtCfaOffset` points
//! at a stack slot the value was spilled *to*, so recovering a register
//! means dereferencing an address; on aarch64 — a 64-bit RISC
//! architecture — this runtime's CFI evaluator resolves that
//! indirection eagerly and stores the value itself. Keeping that
//! difference in the type means [`crate::unwind::dispatch`] never has to
//! branch on target architecture directly.

use cfg_if::cfg_if;

cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        /// Register 0 is unused; the table is just large enough to cover
        /// DWARF numbers 0 through 16 (`rax`..`r15`, return address).
        #[derive(Debug, Clone, Copy)]
        pub struct RegisterDisplay {
            slots: [*const usize; Self::COUNT],
        }

        impl RegisterDisplay {
            const COUNT: usize = 17;

            #[must_use]
            pub const fn empty() -> Self {
                Self { slots: [core::ptr::null(); Self::COUNT] }
            }

            /// Records that register `reg` was spilled to `addr`.
            pub fn set_location(&mut self, reg: u8, addr: *const usize) {
                if let Some(slot) = self.slots.get_mut(reg as usize) {
                    *slot = addr;
                }
            }

            /// Reads the value currently spilled for `reg`, if known.
            #[must_use]
            pub fn get(&self, reg: u8) -> Option<usize> {
                let ptr = self.location(reg)?;
                // SAFETY: slots are only ever populated with addresses
                // computed from a live, currently-executing stack frame.
                Some(unsafe { ptr.read_unaligned() })
            }

            /// The raw spill address recorded for `reg`, without
            /// dereferencing it. Lets the dispatcher forward an
            /// unmodified register's location to the caller's frame
            /// without reading through it first.
            #[must_use]
            pub(crate) fn location(&self, reg: u8) -> Option<*const usize> {
                let ptr = *self.slots.get(reg as usize)?;
                if ptr.is_null() {
                    None
                } else {
                    Some(ptr)
                }
            }
        }
    } else if #[cfg(target_arch = "aarch64")] {
        /// Large enough to cover DWARF numbers 0 through 33 (`x0`..`x30`,
        /// stack pointer, and the pseudo return-address register).
        #[derive(Debug, Clone, Copy)]
        pub struct RegisterDisplay {
            values: [Option<usize>; Self::COUNT],
        }

        impl RegisterDisplay {
            const COUNT: usize = 34;

            #[must_use]
            pub const fn empty() -> Self {
                Self { values: [None; Self::COUNT] }
            }

            /// Records that register `reg` holds `value` in this frame.
            pub fn set_value(&mut self, reg: u8, value: usize) {
                if let Some(slot) = self.values.get_mut(reg as usize) {
                    *slot = Some(value);
                }
            }

            /// Reads the value recorded for `reg`, if known.
            #[must_use]
            pub fn get(&self, reg: u8) -> Option<usize> {
                self.values.get(reg as usize).copied().flatten()
            }
        }
    } else {
        compile_error!("mrt-core's unwinder supports only x86_64 and aarch64");
    }
}

/// DWARF register number holding the return address.
#[cfg(target_arch = "x86_64")]
pub const RETURN_ADDRESS_REGISTER: u8 = 16;
#[cfg(target_arch = "aarch64")]
pub const RETURN_ADDRESS_REGISTER: u8 = 30;

/// DWARF register number CFI tables use as the frame base (`rbp` on
/// x86_64, the frame pointer `x29` on aarch64).
#[cfg(target_arch = "x86_64")]
pub const FRAME_BASE_REGISTER: u8 = 6;
#[cfg(target_arch = "aarch64")]
pub const FRAME_BASE_REGISTER: u8 = 29;
