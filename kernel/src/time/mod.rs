//! System timekeeping.
//!
//! The clock is a nanosecond counter advanced by the periodic tick
//! interrupt. Each tick adds `tick_duration` units plus, while an
//! adjustment is armed, a signed per-tick perturbation; the drift
//! compensator (`time::drift`) steers those knobs against the hardware
//! RTC. All multi-word clock state is read and written under the same
//! interrupt-disabling lock the tick handler takes, so readers and the
//! compensator observe whole updates only.

pub mod drift;

extern crate alloc;

use alloc::sync::Arc;
use core::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use static_assertions::const_assert;

use crate::error::KernelError;
use crate::posix::{
    Timespec, CLOCK_MONOTONIC, CLOCK_MONOTONIC_COARSE, CLOCK_MONOTONIC_RAW,
    CLOCK_PROCESS_CPUTIME_ID, CLOCK_REALTIME, CLOCK_REALTIME_COARSE, CLOCK_THREAD_CPUTIME_ID,
};
use crate::sched::{self, Scheduler};
use crate::sync::IrqSpinlock;

/// Tick interrupt rate.
pub const TIMER_HZ: u32 = 100;

/// Units of `time_ns` per second. Nanoseconds here; anything coarser must
/// still divide one second.
pub const TS_SCALE: u64 = 1_000_000_000;

pub const BILLION: u64 = 1_000_000_000;

/// Nominal units added per tick.
pub const TICK_DURATION_NS: u32 = (TS_SCALE / TIMER_HZ as u64) as u32;

const_assert!(TS_SCALE <= BILLION);
const_assert!(BILLION % TIMER_HZ as u64 == 0);
// The drift compensator perturbs by a tenth of a tick; that step must be
// exact in TS_SCALE units.
const_assert!(TS_SCALE % (TIMER_HZ as u64 * 10) == 0);

/// Earliest plausible RTC reading at boot (2000-01-01T00:00:00Z).
const MIN_BOOT_TIMESTAMP: i64 = 946_684_800;

struct ClockState {
    /// Monotonic TS_SCALE units since boot.
    time_ns: u64,
    /// Units added per tick.
    tick_duration: u32,
    /// Signed per-tick perturbation while `tick_adj_ticks_rem > 0`.
    tick_adj_val: i32,
    /// Ticks the perturbation still applies for.
    tick_adj_ticks_rem: i32,
}

/// The system clock: tick-advanced nanosecond time plus the wall-clock
/// anchor captured from the hardware RTC at boot.
pub struct SystemClock {
    state: IrqSpinlock<ClockState>,
    boot_timestamp: AtomicI64,
}

impl SystemClock {
    pub const fn new() -> Self {
        Self {
            state: IrqSpinlock::new(ClockState {
                time_ns: 0,
                tick_duration: TICK_DURATION_NS,
                tick_adj_val: 0,
                tick_adj_ticks_rem: 0,
            }),
            boot_timestamp: AtomicI64::new(0),
        }
    }

    /// Tick interrupt body: advance the clock by one tick.
    pub fn tick(&self) {
        let mut s = self.state.lock();
        let mut step = s.tick_duration as i64;
        if s.tick_adj_ticks_rem > 0 {
            step += s.tick_adj_val as i64;
            s.tick_adj_ticks_rem -= 1;
        }
        debug_assert!(step >= 0);
        s.time_ns += step as u64;
    }

    /// Monotonic time in TS_SCALE units since boot.
    pub fn get_sys_time(&self) -> u64 {
        self.state.lock().time_ns
    }

    /// Wall-clock seconds since the UNIX epoch.
    pub fn get_timestamp(&self) -> i64 {
        self.boot_timestamp() + (self.get_sys_time() / TS_SCALE) as i64
    }

    pub fn boot_timestamp(&self) -> i64 {
        self.boot_timestamp.load(Ordering::SeqCst)
    }

    pub fn set_boot_timestamp(&self, ts: i64) {
        self.boot_timestamp.store(ts, Ordering::SeqCst);
    }

    /// Wall-clock time with sub-second precision.
    pub fn real_time_timespec(&self) -> Timespec {
        let t = self.get_sys_time();
        Timespec {
            tv_sec: self.boot_timestamp() + (t / TS_SCALE) as i64,
            tv_nsec: scale_rem_to_nsec(t % TS_SCALE, TS_SCALE),
        }
    }

    /// Monotonic clock. Shares the realtime representation: the clock is
    /// only ever slewed, never stepped, so the alias cannot run backwards.
    pub fn monotonic_timespec(&self) -> Timespec {
        self.real_time_timespec()
    }

    /// CPU time consumed by the current task.
    pub fn task_cpu_timespec(&self, sched: &dyn Scheduler) -> Timespec {
        let _guard = sched::preempt_disable();
        let ticks = sched.current_task_ticks();
        let duration = self.tick_duration();
        let total = ticks * duration as u64;
        Timespec {
            tv_sec: (total / TS_SCALE) as i64,
            tv_nsec: scale_rem_to_nsec(total % TS_SCALE, TS_SCALE),
        }
    }

    /// Atomically install a per-tick adjustment: `val` extra units per tick
    /// for the next `ticks` ticks. The tick handler sees either the old
    /// pair or the new pair, never a mix.
    pub fn set_adjustment(&self, val: i32, ticks: i32) {
        debug_assert!(ticks >= 0);
        let mut s = self.state.lock();
        s.tick_adj_val = val;
        s.tick_adj_ticks_rem = ticks;
    }

    /// Current `(tick_adj_val, tick_adj_ticks_rem)` pair.
    pub fn adjustment(&self) -> (i32, i32) {
        let s = self.state.lock();
        (s.tick_adj_val, s.tick_adj_ticks_rem)
    }

    pub fn tick_duration(&self) -> u32 {
        self.state.lock().tick_duration
    }

    /// Test/bring-up knob; the nominal value is `TICK_DURATION_NS`.
    pub fn set_tick_duration(&self, duration: u32) {
        self.state.lock().tick_duration = duration;
    }

    /// Arm the adjustment that pushes `time_ns` forward to the next whole
    /// second, at one tenth of a tick per tick. Returns the installed
    /// `(val, ticks)` pair, or None when already aligned.
    pub fn align_to_next_second(&self) -> Option<(i32, i32)> {
        let mut s = self.state.lock();
        let target = s.time_ns.next_multiple_of(TS_SCALE);
        if target == s.time_ns {
            return None;
        }
        let val = (TS_SCALE / TIMER_HZ as u64 / 10) as i32;
        let ticks = ((target - s.time_ns) / val as u64) as i32;
        s.tick_adj_val = val;
        s.tick_adj_ticks_rem = ticks;
        Some((val, ticks))
    }

    /// Milliseconds of monotonic time since boot.
    pub fn uptime_ms(&self) -> u64 {
        self.get_sys_time() / (TS_SCALE / 1000)
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Rescale a sub-second remainder in `scale` units to nanoseconds.
/// Multiplies when the scale is at or below nanosecond resolution,
/// divides otherwise, so the intermediate cannot overflow.
fn scale_rem_to_nsec(rem: u64, scale: u64) -> i64 {
    if scale <= BILLION {
        (rem * (BILLION / scale)) as i64
    } else {
        (rem / (scale / BILLION)) as i64
    }
}

// ============================================================================
// Clock IDs
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockId {
    Realtime,
    RealtimeCoarse,
    Monotonic,
    MonotonicCoarse,
    MonotonicRaw,
    ProcessCputime,
    ThreadCputime,
}

impl ClockId {
    pub fn from_raw(id: i32) -> Option<ClockId> {
        match id {
            CLOCK_REALTIME => Some(ClockId::Realtime),
            CLOCK_REALTIME_COARSE => Some(ClockId::RealtimeCoarse),
            CLOCK_MONOTONIC => Some(ClockId::Monotonic),
            CLOCK_MONOTONIC_COARSE => Some(ClockId::MonotonicCoarse),
            CLOCK_MONOTONIC_RAW => Some(ClockId::MonotonicRaw),
            CLOCK_PROCESS_CPUTIME_ID => Some(ClockId::ProcessCputime),
            CLOCK_THREAD_CPUTIME_ID => Some(ClockId::ThreadCputime),
            _ => None,
        }
    }
}

/// clock_gettime over an explicit clock and scheduler.
pub fn clock_gettime(
    clock: &SystemClock,
    sched: &dyn Scheduler,
    id: i32,
) -> Result<Timespec, KernelError> {
    let id = ClockId::from_raw(id).ok_or(KernelError::InvalidArgument)?;
    Ok(match id {
        ClockId::Realtime | ClockId::RealtimeCoarse => clock.real_time_timespec(),
        ClockId::Monotonic | ClockId::MonotonicCoarse | ClockId::MonotonicRaw => {
            clock.monotonic_timespec()
        }
        ClockId::ProcessCputime | ClockId::ThreadCputime => clock.task_cpu_timespec(sched),
    })
}

/// clock_getres: one tick for every supported clock.
pub fn clock_getres(id: i32) -> Result<Timespec, KernelError> {
    ClockId::from_raw(id).ok_or(KernelError::InvalidArgument)?;
    Ok(Timespec {
        tv_sec: 0,
        tv_nsec: (BILLION / TIMER_HZ as u64) as i64,
    })
}

// ============================================================================
// Ambient clock and interrupt entry
// ============================================================================

static TICKS: AtomicU64 = AtomicU64::new(0);

lazy_static::lazy_static! {
    static ref SYSTEM_CLOCK: Arc<SystemClock> = Arc::new(SystemClock::new());
}

/// The process-wide clock instance.
pub fn system_clock() -> &'static Arc<SystemClock> {
    &SYSTEM_CLOCK
}

/// Tick interrupt entry point (baremetal glue calls this from the ISR; the
/// hosted machine advances the ambient clock itself).
pub fn timer_interrupt() {
    TICKS.fetch_add(1, Ordering::SeqCst);
    SYSTEM_CLOCK.tick();
    sched::note_preemption();
}

/// Raw interrupt tick count.
pub fn get_ticks() -> u64 {
    TICKS.load(Ordering::SeqCst)
}

/// Capture the boot timestamp from the hardware RTC and start the drift
/// compensator task. A failed thread creation leaves the system running
/// with whatever drift accumulates.
pub fn init_system_time() {
    let machine = crate::platform::machine();
    let ts = machine.rtc_read_seconds();
    if ts < MIN_BOOT_TIMESTAMP {
        panic!("time: implausible boot timestamp {} from RTC", ts);
    }
    SYSTEM_CLOCK.set_boot_timestamp(ts);
    log::info!("time: boot timestamp {} ({} Hz tick)", ts, TIMER_HZ);

    if let Err(err) = sched::kthread_create("clock-drift", drift::drift_task) {
        log::warn!("time: no drift compensator ({:?}); clock will drift", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn ticks_accumulate_tick_duration() {
        let clock = SystemClock::new();
        for _ in 0..5 {
            clock.tick();
        }
        assert_eq!(clock.get_sys_time(), 5 * TICK_DURATION_NS as u64);
    }

    #[test]
    fn adjustment_applies_exactly_while_armed() {
        let clock = SystemClock::new();
        clock.set_adjustment(250, 3);
        for _ in 0..10 {
            clock.tick();
        }
        // 10 nominal ticks plus 3 perturbed ones
        assert_eq!(
            clock.get_sys_time(),
            10 * TICK_DURATION_NS as u64 + 3 * 250
        );
        assert_eq!(clock.adjustment(), (250, 0));
    }

    #[test]
    fn negative_adjustment_subtracts() {
        let clock = SystemClock::new();
        clock.set_adjustment(-1000, 4);
        for _ in 0..4 {
            clock.tick();
        }
        assert_eq!(clock.get_sys_time(), 4 * (TICK_DURATION_NS as u64 - 1000));
    }

    #[test]
    fn timestamp_is_boot_plus_whole_seconds() {
        let clock = SystemClock::new();
        clock.set_boot_timestamp(1_700_000_000);
        for _ in 0..(TIMER_HZ as u64 * 3 / 2) {
            clock.tick();
        }
        assert_eq!(clock.get_timestamp(), 1_700_000_001);
        let ts = clock.real_time_timespec();
        assert_eq!(ts.tv_sec, 1_700_000_001);
        assert_eq!(ts.tv_nsec, 500_000_000);
    }

    #[test]
    fn monotonic_matches_realtime_representation() {
        let clock = SystemClock::new();
        clock.set_boot_timestamp(123);
        clock.tick();
        assert_eq!(clock.monotonic_timespec(), clock.real_time_timespec());
    }

    #[test]
    fn align_to_next_second_programs_tenth_tick_steps() {
        let clock = SystemClock::new();
        for _ in 0..140 {
            clock.tick();
        }
        let (val, ticks) = clock.align_to_next_second().unwrap();
        assert_eq!(val, (TS_SCALE / TIMER_HZ as u64 / 10) as i32);
        // 600ms of catch-up at 1ms per tick
        assert_eq!(ticks, 600);
        for _ in 0..ticks {
            clock.tick();
        }
        // 1.4s + 600 nominal ticks + 600ms of catch-up = exactly 8s
        assert_eq!(clock.get_sys_time(), 8 * TS_SCALE);
    }

    #[test]
    fn align_is_noop_on_whole_second() {
        let clock = SystemClock::new();
        for _ in 0..TIMER_HZ {
            clock.tick();
        }
        assert!(clock.align_to_next_second().is_none());
        assert_eq!(clock.adjustment(), (0, 0));
    }

    #[test]
    fn scale_rem_multiplies_at_or_below_nanos() {
        assert_eq!(scale_rem_to_nsec(500, 1_000), 500_000_000);
        assert_eq!(scale_rem_to_nsec(123_456_789, BILLION), 123_456_789);
    }

    #[test]
    fn scale_rem_divides_above_nanos() {
        assert_eq!(scale_rem_to_nsec(5_000_000_000, 10_000_000_000), 500_000_000);
    }

    #[test]
    fn clock_id_mapping() {
        assert_eq!(ClockId::from_raw(0), Some(ClockId::Realtime));
        assert_eq!(ClockId::from_raw(4), Some(ClockId::MonotonicRaw));
        assert_eq!(ClockId::from_raw(99), None);
        assert_eq!(ClockId::from_raw(-1), None);
    }

    #[test]
    fn getres_reports_one_tick() {
        let res = clock_getres(CLOCK_MONOTONIC).unwrap();
        assert_eq!(res.tv_sec, 0);
        assert_eq!(res.tv_nsec, (BILLION / TIMER_HZ as u64) as i64);
        assert!(clock_getres(7).is_err());
    }

    #[test]
    fn cpu_clock_scales_task_ticks() {
        use crate::sched::MockScheduler;
        let clock = SystemClock::new();
        let mut sched = MockScheduler::new();
        sched.expect_current_task_ticks().return_const(150u64);
        let ts = clock.task_cpu_timespec(&sched);
        assert_eq!(ts.tv_sec, 1);
        assert_eq!(ts.tv_nsec, 500_000_000);
    }

    proptest! {
        #[test]
        fn sys_time_is_monotonic(ticks in proptest::collection::vec(0u8..4, 0..200)) {
            let clock = SystemClock::new();
            clock.set_adjustment(-(TICK_DURATION_NS as i32) / 10, 50);
            let mut last = clock.get_sys_time();
            for burst in ticks {
                for _ in 0..burst {
                    clock.tick();
                }
                let now = clock.get_sys_time();
                prop_assert!(now >= last);
                last = now;
            }
        }

        #[test]
        fn adjustment_bound_is_exact(
            val in -(TICK_DURATION_NS as i32) / 10..=(TICK_DURATION_NS as i32) / 10,
            rem in 0i32..500,
            extra in 0u32..100,
        ) {
            let clock = SystemClock::new();
            clock.set_adjustment(val, rem);
            let total = rem as u32 + extra;
            for _ in 0..total {
                clock.tick();
            }
            let expected = total as i64 * TICK_DURATION_NS as i64 + val as i64 * rem as i64;
            prop_assert_eq!(clock.get_sys_time() as i64, expected);
        }
    }
}
