//! User-memory copy helpers.
//!
//! The syscall layer never dereferences user pointers directly; it copies
//! values in and out through these helpers, which are the single place
//! where a user-memory fault can surface. The hosted build runs flat
//! (user addresses are host addresses); the baremetal trap layer is
//! responsible for having validated and mapped the range before syscall
//! dispatch runs.

use core::mem::{size_of, MaybeUninit};

/// A user-memory access failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fault;

// Fault-injection hook: fail the next N user copies. Per-thread in the
// test build so injections cannot leak between tests.
#[cfg(test)]
mod fault_hook {
    use core::cell::Cell;

    std::thread_local! {
        static FAIL_COPIES: Cell<u32> = const { Cell::new(0) };
    }

    pub fn arm(count: u32) {
        FAIL_COPIES.with(|n| n.set(count));
    }

    pub fn take() -> bool {
        FAIL_COPIES.with(|n| {
            let left = n.get();
            if left > 0 {
                n.set(left - 1);
                true
            } else {
                false
            }
        })
    }
}

#[cfg(not(test))]
mod fault_hook {
    use core::sync::atomic::{AtomicU32, Ordering};

    static FAIL_COPIES: AtomicU32 = AtomicU32::new(0);

    pub fn arm(count: u32) {
        FAIL_COPIES.store(count, Ordering::SeqCst);
    }

    pub fn take() -> bool {
        FAIL_COPIES
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Arrange for the next `count` user copies to fault.
pub fn inject_fault(count: u32) {
    fault_hook::arm(count);
}

fn take_injected_fault() -> bool {
    fault_hook::take()
}

/// Copy `dst.len()` bytes in from user address `uaddr`.
pub fn copy_from_user(dst: &mut [u8], uaddr: usize) -> Result<(), Fault> {
    if uaddr == 0 || take_injected_fault() {
        return Err(Fault);
    }
    unsafe {
        core::ptr::copy_nonoverlapping(uaddr as *const u8, dst.as_mut_ptr(), dst.len());
    }
    Ok(())
}

/// Copy `src` out to user address `uaddr`.
pub fn copy_to_user(uaddr: usize, src: &[u8]) -> Result<(), Fault> {
    if uaddr == 0 || take_injected_fault() {
        return Err(Fault);
    }
    unsafe {
        core::ptr::copy_nonoverlapping(src.as_ptr(), uaddr as *mut u8, src.len());
    }
    Ok(())
}

/// Copy a `T` in from user memory.
pub fn copy_in<T: Copy>(uaddr: usize) -> Result<T, Fault> {
    let mut value = MaybeUninit::<T>::uninit();
    let bytes = unsafe {
        core::slice::from_raw_parts_mut(value.as_mut_ptr() as *mut u8, size_of::<T>())
    };
    copy_from_user(bytes, uaddr)?;
    Ok(unsafe { value.assume_init() })
}

/// Copy a `T` out to user memory.
pub fn copy_out<T: Copy>(uaddr: usize, value: &T) -> Result<(), Fault> {
    let bytes = unsafe {
        core::slice::from_raw_parts(value as *const T as *const u8, size_of::<T>())
    };
    copy_to_user(uaddr, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_value() {
        let mut slot: u64 = 0;
        let addr = &mut slot as *mut u64 as usize;
        copy_out(addr, &0xDEAD_BEEFu64).unwrap();
        assert_eq!(slot, 0xDEAD_BEEF);
        let back: u64 = copy_in(addr).unwrap();
        assert_eq!(back, 0xDEAD_BEEF);
    }

    #[test]
    fn null_address_faults() {
        assert_eq!(copy_in::<u32>(0), Err(Fault));
        assert_eq!(copy_out(0, &1u32), Err(Fault));
    }

    #[test]
    fn injected_faults_fire_then_clear() {
        let mut slot: u32 = 7;
        let addr = &mut slot as *mut u32 as usize;
        inject_fault(1);
        assert_eq!(copy_in::<u32>(addr), Err(Fault));
        assert_eq!(copy_in::<u32>(addr), Ok(7));
    }
}
