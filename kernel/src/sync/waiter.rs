//! Condition variables and the multi-object waiter.
//!
//! A `CondVar` keeps a list of subscribed wait flags; signaling fires every
//! subscriber and kicks the scheduler. A `MultiWaiter` owns a fixed set of
//! slots, each optionally bound to one condition variable, and can block
//! until any bound condition fires or an absolute tick deadline passes.
//! Signals are allowed to be spurious: a wakeup carries no guarantee that
//! the state the waiter cares about actually changed.

extern crate alloc;

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::sched::{self, Scheduler};
use crate::sync::Mutex;

/// One waiter's membership on a condition's wait-list.
struct WaitFlag {
    fired: AtomicBool,
}

impl WaitFlag {
    fn new() -> Self {
        Self {
            fired: AtomicBool::new(false),
        }
    }
}

/// A kernel condition variable: a wait-list of subscribed waiter slots.
pub struct CondVar {
    waiters: Mutex<Vec<Arc<WaitFlag>>>,
}

impl CondVar {
    pub const fn new() -> Self {
        Self {
            waiters: Mutex::new(Vec::new()),
        }
    }

    /// Fire every currently subscribed waiter and kick the scheduler.
    ///
    /// Subscriptions survive the signal; a waiter that goes back to sleep
    /// on the same slot will see the next signal too.
    pub fn signal(&self) {
        for flag in self.waiters.lock().iter() {
            flag.fired.store(true, Ordering::SeqCst);
        }
        sched::kick();
    }

    /// Number of subscribed waiters (diagnostic).
    pub fn waiter_count(&self) -> usize {
        self.waiters.lock().len()
    }

    fn subscribe(&self, flag: &Arc<WaitFlag>) {
        self.waiters.lock().push(flag.clone());
    }

    fn unsubscribe(&self, flag: &Arc<WaitFlag>) {
        self.waiters.lock().retain(|w| !Arc::ptr_eq(w, flag));
    }
}

impl Default for CondVar {
    fn default() -> Self {
        Self::new()
    }
}

/// Why `MultiWaiter::sleep` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeSource {
    /// The condition bound to slot `.0` was signaled.
    Signal(usize),
    /// The deadline passed before any condition fired.
    Timeout,
}

/// Slot-storage allocation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocError;

struct WaiterSlot {
    flag: Arc<WaitFlag>,
    cond: Option<Arc<CondVar>>,
}

/// A fixed set of slots, each bindable to one condition variable, that one
/// task sleeps on as a unit. Dropping the waiter removes every
/// subscription.
pub struct MultiWaiter {
    slots: Vec<WaiterSlot>,
}

impl MultiWaiter {
    /// Allocate `count` unbound slots.
    pub fn try_new(count: usize) -> Result<Self, AllocError> {
        let mut slots = Vec::new();
        slots.try_reserve_exact(count).map_err(|_| AllocError)?;
        for _ in 0..count {
            slots.push(WaiterSlot {
                flag: Arc::new(WaitFlag::new()),
                cond: None,
            });
        }
        Ok(Self { slots })
    }

    /// Bind slot `idx` to `cond`, enqueueing on its wait-list.
    pub fn bind(&mut self, idx: usize, cond: Arc<CondVar>) {
        let slot = &mut self.slots[idx];
        if let Some(old) = slot.cond.take() {
            old.unsubscribe(&slot.flag);
        }
        cond.subscribe(&slot.flag);
        slot.cond = Some(cond);
    }

    /// Consume and return the lowest fired slot, if any.
    fn take_fired(&self) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.flag.fired.swap(false, Ordering::SeqCst))
    }

    /// Block until a bound condition fires or `deadline` (absolute ticks)
    /// passes. With no deadline, sleeps until a signal arrives.
    pub fn sleep(&self, sched: &dyn Scheduler, deadline: Option<u64>) -> WakeSource {
        loop {
            if let Some(idx) = self.take_fired() {
                return WakeSource::Signal(idx);
            }
            if let Some(d) = deadline {
                if sched.now_ticks() >= d {
                    return WakeSource::Timeout;
                }
            }
            sched.yield_now();
        }
    }
}

impl Drop for MultiWaiter {
    fn drop(&mut self) {
        for slot in &self.slots {
            if let Some(cond) = &slot.cond {
                cond.unsubscribe(&slot.flag);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::sim::SimMachine;
    use crate::time::SystemClock;

    fn rig() -> SimMachine {
        SimMachine::new(Arc::new(SystemClock::new()))
    }

    #[test]
    fn signal_fires_bound_slot() {
        let cond = Arc::new(CondVar::new());
        let mut waiter = MultiWaiter::try_new(2).unwrap();
        waiter.bind(1, cond.clone());
        assert_eq!(cond.waiter_count(), 1);
        cond.signal();
        assert_eq!(waiter.take_fired(), Some(1));
        // consumed
        assert_eq!(waiter.take_fired(), None);
    }

    #[test]
    fn sleep_returns_timeout_at_deadline() {
        let sim = rig();
        let cond = Arc::new(CondVar::new());
        let mut waiter = MultiWaiter::try_new(1).unwrap();
        waiter.bind(0, cond);
        let wake = waiter.sleep(&sim, Some(10));
        assert_eq!(wake, WakeSource::Timeout);
        assert!(sim.now_ticks() >= 10);
    }

    #[test]
    fn sleep_wakes_on_scripted_signal() {
        let sim = rig();
        let cond = Arc::new(CondVar::new());
        let mut waiter = MultiWaiter::try_new(1).unwrap();
        waiter.bind(0, cond.clone());
        let sig = cond.clone();
        sim.at_tick(5, move || sig.signal());
        let wake = waiter.sleep(&sim, Some(100));
        assert_eq!(wake, WakeSource::Signal(0));
        assert!(sim.now_ticks() < 100);
    }

    #[test]
    fn drop_unsubscribes() {
        let cond = Arc::new(CondVar::new());
        {
            let mut waiter = MultiWaiter::try_new(1).unwrap();
            waiter.bind(0, cond.clone());
            assert_eq!(cond.waiter_count(), 1);
        }
        assert_eq!(cond.waiter_count(), 0);
    }

    #[test]
    fn rebind_replaces_subscription() {
        let a = Arc::new(CondVar::new());
        let b = Arc::new(CondVar::new());
        let mut waiter = MultiWaiter::try_new(1).unwrap();
        waiter.bind(0, a.clone());
        waiter.bind(0, b.clone());
        assert_eq!(a.waiter_count(), 0);
        assert_eq!(b.waiter_count(), 1);
    }
}
