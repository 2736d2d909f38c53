//! Synchronization primitives.
//!
//! Interrupt control follows the push_off/pop_off discipline: disabling
//! nests, and the outermost pop restores the state captured by the first
//! push. Multi-word state shared with the tick interrupt handler lives
//! behind `IrqSpinlock`, which couples lock acquisition with interrupt
//! disable so the handler can never observe a torn update.

mod waiter;

pub use spin::{Mutex, Once};
pub use waiter::{AllocError, CondVar, MultiWaiter, WakeSource};

use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};

#[cfg(feature = "baremetal")]
mod intr {
    #[inline]
    pub fn enabled() -> bool {
        let flags: u64;
        unsafe {
            core::arch::asm!("pushfq; pop {}", out(reg) flags);
        }
        (flags & 0x200) != 0 // IF flag
    }

    #[inline]
    pub fn disable() {
        unsafe { core::arch::asm!("cli", options(nomem, nostack)) };
    }

    #[inline]
    pub fn enable() {
        unsafe { core::arch::asm!("sti", options(nomem, nostack)) };
    }
}

// Hosted builds model the interrupt flag so the push/pop nesting discipline
// is exercised exactly as on hardware. The flag is per-CPU on hardware, so
// the test build keeps it per-thread.
#[cfg(all(not(feature = "baremetal"), test))]
mod intr {
    use core::cell::Cell;

    std::thread_local! {
        static IRQ_ENABLED: Cell<bool> = const { Cell::new(true) };
    }

    #[inline]
    pub fn enabled() -> bool {
        IRQ_ENABLED.with(|f| f.get())
    }

    #[inline]
    pub fn disable() {
        IRQ_ENABLED.with(|f| f.set(false));
    }

    #[inline]
    pub fn enable() {
        IRQ_ENABLED.with(|f| f.set(true));
    }
}

#[cfg(all(not(feature = "baremetal"), not(test)))]
mod intr {
    use core::sync::atomic::{AtomicBool, Ordering};

    static IRQ_ENABLED: AtomicBool = AtomicBool::new(true);

    #[inline]
    pub fn enabled() -> bool {
        IRQ_ENABLED.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn disable() {
        IRQ_ENABLED.store(false, Ordering::SeqCst);
    }

    #[inline]
    pub fn enable() {
        IRQ_ENABLED.store(true, Ordering::SeqCst);
    }
}

/// Disable interrupts and return the previous interrupt state.
#[inline]
pub fn push_off() -> bool {
    let was_enabled = intr::enabled();
    intr::disable();
    was_enabled
}

/// Restore the interrupt state captured by the matching `push_off`.
#[inline]
pub fn pop_off(was_enabled: bool) {
    if was_enabled {
        intr::enable();
    }
}

/// Whether interrupts are currently enabled.
#[inline]
pub fn interrupts_enabled() -> bool {
    intr::enabled()
}

/// Spinlock whose critical sections run with interrupts disabled.
///
/// The guard restores the interrupt state only after the lock is released,
/// on every exit path.
pub struct IrqSpinlock<T> {
    inner: Mutex<T>,
}

impl<T> IrqSpinlock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    pub fn lock(&self) -> IrqGuard<'_, T> {
        let was_enabled = push_off();
        IrqGuard {
            guard: ManuallyDrop::new(self.inner.lock()),
            was_enabled,
        }
    }
}

pub struct IrqGuard<'a, T> {
    guard: ManuallyDrop<spin::MutexGuard<'a, T>>,
    was_enabled: bool,
}

impl<T> Deref for IrqGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for IrqGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for IrqGuard<'_, T> {
    fn drop(&mut self) {
        // Release the lock before interrupts come back on.
        unsafe { ManuallyDrop::drop(&mut self.guard) };
        pop_off(self.was_enabled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn irq_guard_restores_interrupt_state() {
        let lock = IrqSpinlock::new(7u32);
        assert!(interrupts_enabled());
        {
            let mut g = lock.lock();
            assert!(!interrupts_enabled());
            *g += 1;
        }
        assert!(interrupts_enabled());
        assert_eq!(*lock.lock(), 8);
    }

    #[test]
    fn push_off_nests() {
        let outer = push_off();
        assert!(outer);
        let inner = push_off();
        assert!(!inner);
        pop_off(inner);
        assert!(!interrupts_enabled());
        pop_off(outer);
        assert!(interrupts_enabled());
    }
}
