//! Clock drift compensation against the hardware RTC.
//!
//! Runs as a dedicated kernel task. At boot it slews the system clock
//! forward onto the RTC's second boundary (phase A), proves the alignment
//! held (phase B), then re-measures drift on a long period and arms a
//! bounded counter-adjustment whenever the synthesized clock has walked
//! away from the RTC (phase C). Positive drift means the system clock is
//! ahead, so the armed per-tick value is negative, and vice versa.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::platform::Machine;
use crate::sched::{self, Scheduler};
use crate::time::{SystemClock, TIMER_HZ, TS_SCALE};

/// Default steady-state re-measurement period: one hour of ticks.
pub const DEFAULT_LOOP_DELAY_TICKS: u64 = 3600 * TIMER_HZ as u64;

/// Phase-B settle time before asserting the alignment held.
const VERIFY_DELAY_TICKS: u64 = 20 * TIMER_HZ as u64;

static LOOP_DELAY_TICKS: AtomicU64 = AtomicU64::new(DEFAULT_LOOP_DELAY_TICKS);

pub fn set_loop_delay_ticks(ticks: u64) {
    LOOP_DELAY_TICKS.store(ticks.max(1), Ordering::SeqCst);
}

pub fn loop_delay_ticks() -> u64 {
    LOOP_DELAY_TICKS.load(Ordering::SeqCst)
}

/// Per-tick adjustment opposing `drift_secs` of measured drift: a tenth of
/// a tick in the counter-direction, sustained long enough to cancel the
/// drift exactly. None when there is nothing to correct.
pub(crate) fn compute_adjustment(drift_secs: i64) -> Option<(i32, i32)> {
    if drift_secs == 0 {
        return None;
    }
    let step = (TS_SCALE / TIMER_HZ as u64 / 10) as i32;
    let val = if drift_secs > 0 { -step } else { step };
    let ticks = drift_secs
        .unsigned_abs()
        .saturating_mul(TIMER_HZ as u64 * 10)
        .min(i32::MAX as u64) as i32;
    Some((val, ticks))
}

pub struct DriftCompensator<'a> {
    clock: &'a SystemClock,
    sched: &'a dyn Scheduler,
    machine: &'a dyn Machine,
}

impl<'a> DriftCompensator<'a> {
    pub fn new(clock: &'a SystemClock, sched: &'a dyn Scheduler, machine: &'a dyn Machine) -> Self {
        Self {
            clock,
            sched,
            machine,
        }
    }

    /// Signed drift in whole seconds: system timestamp minus RTC, read as
    /// a pair under preemption-disable.
    fn measure_drift(&self) -> i64 {
        let _guard = sched::preempt_disable();
        self.clock.get_timestamp() - self.machine.rtc_read_seconds()
    }

    /// Phase A: wait out the first second of samples, catch the RTC's next
    /// second boundary, then slew `time_ns` up to the following whole
    /// second.
    pub fn align_to_hw_second(&self) {
        self.sched.sleep_ticks(TIMER_HZ as u64);

        let mut hw = {
            let _guard = sched::preempt_disable();
            self.machine.rtc_read_seconds()
        };
        loop {
            {
                let _guard = sched::preempt_disable();
                if self.machine.rtc_read_seconds() != hw {
                    break;
                }
            }
            if self.sched.yield_now() {
                // Another task ran for an unknown stretch; re-baseline.
                let _guard = sched::preempt_disable();
                hw = self.machine.rtc_read_seconds();
            }
        }

        match self.clock.align_to_next_second() {
            Some((val, ticks)) => {
                log::debug!(
                    "time: aligning to RTC second boundary (+{} units over {} ticks)",
                    val,
                    ticks
                );
            }
            None => log::debug!("time: already aligned to RTC second boundary"),
        }
    }

    /// Phase B: after the alignment has had time to complete, residual
    /// whole-second drift means the adjustment math is broken.
    pub fn verify_alignment(&self) {
        self.sched.sleep_ticks(VERIFY_DELAY_TICKS);
        let drift = self.measure_drift();
        if drift != 0 {
            panic!("time: {}s drift after boot alignment", drift);
        }
        log::info!("time: clock aligned with hardware RTC");
    }

    /// One phase-C iteration: sleep the loop delay, re-measure, arm a
    /// counter-adjustment if the clock has drifted.
    pub fn adjust_once(&self) {
        self.sched.sleep_ticks(loop_delay_ticks());
        let drift = self.measure_drift();
        if let Some((val, ticks)) = compute_adjustment(drift) {
            self.clock.set_adjustment(val, ticks);
            log::info!(
                "time: {}s drift, adjusting {} units/tick for {} ticks",
                drift,
                val,
                ticks
            );
        }
    }

    pub fn run(&self) -> ! {
        self.align_to_hw_second();
        self.verify_alignment();
        loop {
            self.adjust_once();
        }
    }
}

/// Entry point of the `clock-drift` kernel task.
pub fn drift_task() {
    let compensator = DriftCompensator::new(
        crate::time::system_clock(),
        sched::kernel_scheduler(),
        crate::platform::machine(),
    );
    compensator.run();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::sim::SimMachine;
    use crate::time::TICK_DURATION_NS;
    use alloc::sync::Arc;
    use proptest::prelude::*;

    fn rig(rtc_base: i64, rtc_phase_ticks: u64) -> SimMachine {
        let sim = SimMachine::new(Arc::new(SystemClock::new()));
        sim.set_rtc(rtc_base, rtc_phase_ticks);
        sim.clock().set_boot_timestamp(rtc_base);
        sim
    }

    #[test]
    fn adjustment_opposes_positive_drift() {
        let (val, ticks) = compute_adjustment(1).unwrap();
        assert_eq!(val, -((TS_SCALE / TIMER_HZ as u64 / 10) as i32));
        assert_eq!(ticks, (TIMER_HZ * 10) as i32);
    }

    #[test]
    fn adjustment_opposes_negative_drift() {
        let (val, ticks) = compute_adjustment(-3).unwrap();
        assert_eq!(val, (TS_SCALE / TIMER_HZ as u64 / 10) as i32);
        assert_eq!(ticks, (3 * TIMER_HZ * 10) as i32);
    }

    #[test]
    fn zero_drift_needs_no_adjustment() {
        assert_eq!(compute_adjustment(0), None);
    }

    #[test]
    fn huge_drift_clamps_to_knob_range() {
        let (_, ticks) = compute_adjustment(i64::MAX / TIMER_HZ as i64).unwrap();
        assert_eq!(ticks, i32::MAX);
    }

    #[test]
    fn boot_alignment_lands_on_rtc_second() {
        // RTC second boundary falls 40 ticks after boot.
        let sim = rig(100, 60);
        let comp = DriftCompensator::new(sim.clock(), &sim, &sim);

        comp.align_to_hw_second();
        // Boundary was observed at tick 140 with time_ns = 1.4s; let the
        // armed catch-up finish.
        let (_, ticks) = sim.clock().adjustment();
        assert!(ticks > 0);
        sim.sleep_ticks(ticks as u64);
        assert_eq!(sim.clock().get_sys_time() % TS_SCALE, 0);
        // From here on the synthesized timestamp tracks the RTC exactly.
        assert_eq!(comp.measure_drift(), 0);
        sim.sleep_ticks(1000);
        assert_eq!(comp.measure_drift(), 0);
    }

    #[test]
    fn verify_passes_after_alignment() {
        let sim = rig(500, 30);
        let comp = DriftCompensator::new(sim.clock(), &sim, &sim);
        comp.align_to_hw_second();
        comp.verify_alignment();
    }

    #[test]
    #[should_panic(expected = "drift after boot alignment")]
    fn verify_panics_on_residual_drift() {
        let sim = rig(500, 0);
        // A clock that gains 5% per tick cannot hold the alignment.
        sim.clock().set_tick_duration(TICK_DURATION_NS + TICK_DURATION_NS / 20);
        let comp = DriftCompensator::new(sim.clock(), &sim, &sim);
        comp.verify_alignment();
    }

    #[test]
    fn forced_fast_clock_converges_back_to_zero_drift() {
        let sim = rig(1_000_000, 0);
        let clock = sim.clock();
        let comp = DriftCompensator::new(clock, &sim, &sim);

        // +5% tick duration: after 20s of wall time the clock is 1s ahead.
        clock.set_tick_duration(TICK_DURATION_NS + TICK_DURATION_NS / 20);
        sim.sleep_ticks(20 * TIMER_HZ as u64);
        assert_eq!(comp.measure_drift(), 1);

        // The fault is corrected; the armed adjustment must now win the
        // drift back within a bounded number of loop iterations.
        clock.set_tick_duration(TICK_DURATION_NS);
        set_loop_delay_ticks(2 * TIMER_HZ as u64);
        let mut rounds = 0;
        while comp.measure_drift() != 0 {
            comp.adjust_once();
            rounds += 1;
            assert!(rounds < 20, "drift failed to converge");
        }
        let (val, _) = clock.adjustment();
        assert!(val < 0, "correction must oppose positive drift");
        // Once converged it stays converged.
        sim.sleep_ticks(30 * TIMER_HZ as u64);
        assert_eq!(comp.measure_drift(), 0);
    }

    #[test]
    fn slow_clock_gets_positive_adjustment() {
        let sim = rig(42_000_000, 0);
        let clock = sim.clock();
        let comp = DriftCompensator::new(clock, &sim, &sim);

        // -5% tick duration: after 20s the clock is 1s behind.
        clock.set_tick_duration(TICK_DURATION_NS - TICK_DURATION_NS / 20);
        sim.sleep_ticks(20 * TIMER_HZ as u64);
        assert_eq!(comp.measure_drift(), -1);

        clock.set_tick_duration(TICK_DURATION_NS);
        set_loop_delay_ticks(TIMER_HZ as u64);
        comp.adjust_once();
        let (val, ticks) = clock.adjustment();
        assert!(val > 0);
        assert!(ticks > 0);
    }

    proptest! {
        #[test]
        fn adjustment_always_opposes_drift(drift in -10_000i64..10_000) {
            match compute_adjustment(drift) {
                None => prop_assert_eq!(drift, 0),
                Some((val, ticks)) => {
                    prop_assert!(ticks > 0);
                    prop_assert_eq!(val > 0, drift < 0);
                    // The sustained adjustment cancels the drift exactly.
                    prop_assert_eq!(val as i64 * ticks as i64, -drift * TS_SCALE as i64);
                }
            }
        }

        #[test]
        fn alignment_converges_for_any_rtc_phase(phase in 0u64..100) {
            let sim = rig(7_000, phase);
            let comp = DriftCompensator::new(sim.clock(), &sim, &sim);
            comp.align_to_hw_second();
            let (_, ticks) = sim.clock().adjustment();
            sim.sleep_ticks(ticks as u64);
            prop_assert_eq!(sim.clock().get_sys_time() % TS_SCALE, 0);
            prop_assert_eq!(comp.measure_drift(), 0);
        }
    }
}
