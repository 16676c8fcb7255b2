//! Single-core interrupt-masking lock.
//!
//! The collector's concurrency model is stop-the-world on a single
//! initiating CPU: a collection runs with interrupts disabled for its
//! entire duration, so there is never any contention to arbitrate. The lock
//! below reflects that directly instead of pretending we need a spinlock.

use core::cell::UnsafeCell;

/// Disables and restores interrupts around a critical section.
///
/// A host kernel registers its own implementation once at boot. Under
/// `#[cfg(test)]`, [`NoopGuard`] is used instead, which is correct because
/// tests are single-threaded and never run with interrupts enabled in the
/// first place.
pub trait InterruptGuard {
    /// Mask interrupts on the current CPU, returning an opaque token
    /// describing the prior state.
    fn mask(&self) -> usize;
    /// Restore interrupts to the state described by `token`.
    fn restore(&self, token: usize);
}

/// An [`InterruptGuard`] that does nothing. Used when no host guard has
/// been registered, which is only sound in single-threaded contexts.
pub struct NoopGuard;

impl InterruptGuard for NoopGuard {
    fn mask(&self) -> usize {
        0
    }
    fn restore(&self, _token: usize) {}
}

static mut HOST_GUARD: &'static dyn InterruptGuard = &NoopGuard;

/// Registers the host kernel's interrupt guard. Must be called at most
/// once, before any [`IrqLock`] is locked from more than one execution
/// context.
///
/// # Safety
/// The caller must ensure this runs before any concurrent use of any
/// `IrqLock` and is not called concurrently with itself.
pub unsafe fn register_interrupt_guard(guard: &'static dyn InterruptGuard) {
    // SAFETY: caller upholds single-writer-before-any-reader ordering.
    unsafe {
        HOST_GUARD = guard;
    }
}

fn host_guard() -> &'static dyn InterruptGuard {
    // SAFETY: only ever written once, before concurrent use, per the
    // contract of `register_interrupt_guard`.
    unsafe { HOST_GUARD }
}

/// A lock whose only job is to mask interrupts on the current CPU for the
/// duration of the closure. There is no queueing and no spinning: on a
/// single core with interrupts disabled, mutual exclusion is free.
pub struct IrqLock<T> {
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is only ever granted from within `lock`, which
// masks interrupts on the current (only) core for the duration of the
// borrow.
unsafe impl<T> Sync for IrqLock<T> {}

impl<T> IrqLock<T> {
    /// Creates a new lock. `const fn` so this can back `static` globals
    /// (the RAT, the handle table, the frozen-segment list).
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self {
            data: UnsafeCell::new(value),
        }
    }

    /// Runs `f` with exclusive access to the protected value, with
    /// interrupts masked on the current CPU for the duration.
    pub fn lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let guard = host_guard();
        let token = guard.mask();
        // SAFETY: interrupts are masked, and this is the only core, so no
        // other execution context can observe or mutate `data` for the
        // duration of this borrow.
        let result = f(unsafe { &mut *self.data.get() });
        guard.restore(token);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_grants_exclusive_access() {
        let lock = IrqLock::new(0u32);
        lock.lock(|v| *v += 1);
        lock.lock(|v| *v += 1);
        assert_eq!(lock.lock(|v| *v), 2);
    }
}
