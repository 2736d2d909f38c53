//! Scheduling interface.
//!
//! The real dispatcher lives outside this core; what the time, select and
//! drift machinery need from it is narrow: tick queries, tick-granular
//! sleep, a yield that reports preemption, and per-task tick accounting.
//! That contract is the `Scheduler` trait. Hosted builds are backed by the
//! simulation machine, which advances the tick engine deterministically;
//! baremetal builds spin on the interrupt-driven tick counter.

extern crate alloc;

use core::sync::atomic::{AtomicBool, Ordering};

use crate::sync::Mutex;

/// Blocking and accounting services a kernel task may rely on.
///
/// `sleep_ticks` and `yield_now` are the only suspension points in this
/// core besides `MultiWaiter::sleep`; interrupt-disable and
/// preemption-disable sections must never cross them.
#[cfg_attr(test, mockall::automock)]
pub trait Scheduler: Send + Sync {
    /// Ticks elapsed since boot.
    fn now_ticks(&self) -> u64;

    /// Block the calling task for at least `ticks` ticks.
    fn sleep_ticks(&self, ticks: u64);

    /// Give up the CPU once. Returns true if the task was preempted while
    /// yielded (another task ran for an unknown amount of time).
    fn yield_now(&self) -> bool;

    /// Ticks charged to the current task.
    fn current_task_ticks(&self) -> u64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    TooManyThreads,
}

// ============================================================================
// Preemption control
// ============================================================================

// Preemption depth is per-CPU state; the test build keeps it per-thread.
#[cfg(test)]
mod preempt_depth_cell {
    use core::cell::Cell;

    std::thread_local! {
        static DEPTH: Cell<u32> = const { Cell::new(0) };
    }

    pub fn add(delta: i32) {
        DEPTH.with(|d| d.set(d.get().wrapping_add_signed(delta)));
    }

    pub fn get() -> u32 {
        DEPTH.with(|d| d.get())
    }
}

#[cfg(not(test))]
mod preempt_depth_cell {
    use core::sync::atomic::{AtomicU32, Ordering};

    static DEPTH: AtomicU32 = AtomicU32::new(0);

    pub fn add(delta: i32) {
        if delta >= 0 {
            DEPTH.fetch_add(delta as u32, Ordering::SeqCst);
        } else {
            DEPTH.fetch_sub(delta.unsigned_abs(), Ordering::SeqCst);
        }
    }

    pub fn get() -> u32 {
        DEPTH.load(Ordering::SeqCst)
    }
}

/// Scoped preemption-disable. Pairs of reads that must observe a consistent
/// view (e.g. hardware clock + system timestamp) take one of these.
pub struct PreemptGuard(());

impl PreemptGuard {
    fn acquire() -> Self {
        preempt_depth_cell::add(1);
        PreemptGuard(())
    }
}

impl Drop for PreemptGuard {
    fn drop(&mut self) {
        preempt_depth_cell::add(-1);
    }
}

pub fn preempt_disable() -> PreemptGuard {
    PreemptGuard::acquire()
}

pub fn preempt_depth() -> u32 {
    preempt_depth_cell::get()
}

// ============================================================================
// Wakeup plumbing
// ============================================================================

static PREEMPTED: AtomicBool = AtomicBool::new(false);

/// Called by the interrupt glue when it preempts the current task, so the
/// next `yield_now` can report it.
pub fn note_preemption() {
    PREEMPTED.store(true, Ordering::SeqCst);
}

pub(crate) fn take_preempted() -> bool {
    PREEMPTED.swap(false, Ordering::SeqCst)
}

/// Nudge an idle CPU out of its wait loop after a condition signal.
/// The hosted machine polls, so this is a no-op there.
pub fn kick() {
    #[cfg(feature = "baremetal")]
    {
        // The tick interrupt already wakes the hlt loop; nothing extra.
    }
}

// ============================================================================
// Kernel thread registry
// ============================================================================

const MAX_KTHREADS: usize = 8;

pub type TaskId = usize;

struct KthreadEntry {
    name: &'static str,
    entry: fn(),
}

static KTHREADS: Mutex<heapless::Vec<KthreadEntry, MAX_KTHREADS>> =
    Mutex::new(heapless::Vec::new());

/// Register a kernel thread. The dispatcher (external) launches registered
/// threads once scheduling starts; hosted tests drive their bodies
/// directly.
pub fn kthread_create(name: &'static str, entry: fn()) -> Result<TaskId, SchedError> {
    let mut table = KTHREADS.lock();
    let id = table.len();
    table
        .push(KthreadEntry { name, entry })
        .map_err(|_| SchedError::TooManyThreads)?;
    log::debug!("sched: registered kthread '{}' as task {}", name, id);
    Ok(id)
}

/// Look up a registered kernel thread's entry point by name.
pub fn kthread_entry(name: &str) -> Option<fn()> {
    KTHREADS
        .lock()
        .iter()
        .find(|k| k.name == name)
        .map(|k| k.entry)
}

// ============================================================================
// Ambient scheduler
// ============================================================================

#[cfg(feature = "baremetal")]
mod tick_sched {
    use super::Scheduler;

    /// Scheduler over the interrupt-driven tick counter. Sleep is a
    /// wait-for-tick spin; the dispatcher replaces this once real task
    /// switching is wired up.
    pub struct TickSched;

    pub static TICK_SCHED: TickSched = TickSched;

    impl Scheduler for TickSched {
        fn now_ticks(&self) -> u64 {
            crate::time::get_ticks()
        }

        fn sleep_ticks(&self, ticks: u64) {
            let target = self.now_ticks().saturating_add(ticks);
            while self.now_ticks() < target {
                core::hint::spin_loop();
            }
        }

        fn yield_now(&self) -> bool {
            let seen = self.now_ticks();
            while self.now_ticks() == seen {
                core::hint::spin_loop();
            }
            super::take_preempted()
        }

        fn current_task_ticks(&self) -> u64 {
            crate::time::get_ticks()
        }
    }
}

/// The process-wide scheduler instance.
pub fn kernel_scheduler() -> &'static dyn Scheduler {
    #[cfg(feature = "baremetal")]
    {
        &tick_sched::TICK_SCHED
    }
    #[cfg(not(feature = "baremetal"))]
    {
        crate::platform::sim::machine()
    }
}

/// Block the current task for `ticks` ticks.
pub fn kernel_sleep(ticks: u64) {
    kernel_scheduler().sleep_ticks(ticks);
}

/// Yield once; returns whether the task was preempted while yielded.
pub fn kernel_yield() -> bool {
    kernel_scheduler().yield_now()
}
